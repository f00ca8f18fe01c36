//! Vorbis residue 解码与声道耦合反变换.
//!
//! 三种 residue 形式共享分区/分类框架, 差别在向量写入方式:
//! 形式 0 按步长交错写入, 形式 1 连续写入, 形式 2 把子映射内全部
//! 声道交错成一条虚拟声道后按形式 1 写入再分发回去.
//!
//! 解码过程中位流耗尽不是错误: 停止后续读取, 已写入的数据保持有效.

use log::warn;
use xun_core::{XunError, XunResult};

use crate::packet::Packet;

use super::codebook::Codebook;

/// residue 配置
#[derive(Debug)]
pub(crate) struct ResidueConfig {
    kind: u16,
    begin: usize,
    end: usize,
    partition_size: usize,
    classifications: usize,
    classbook: usize,
    cascades: Vec<u32>,
    /// 每类在各 pass 上使用的 book
    books: Vec<[Option<usize>; 8]>,
}

impl ResidueConfig {
    /// 从 setup 头包解析一个 residue 配置
    pub(crate) fn parse(packet: &mut Packet, codebooks: &[Codebook]) -> XunResult<Self> {
        let kind = packet.read_bits(16) as u16;
        if kind > 2 {
            return Err(XunError::HeaderMalformed(format!(
                "residue 类型不支持: {kind}",
            )));
        }

        let begin = packet.read_bits(24) as usize;
        let end = packet.read_bits(24) as usize;
        if end < begin {
            return Err(XunError::HeaderMalformed("residue 区间非法".into()));
        }
        let partition_size = packet.read_bits(24) as usize + 1;
        let classifications = packet.read_bits(6) as usize + 1;
        let classbook = packet.read_bits(8) as usize;
        let Some(classbook_ref) = codebooks.get(classbook) else {
            return Err(XunError::HeaderMalformed(
                "residue classbook 索引越界".into(),
            ));
        };
        // 分类字容量: classifications^dimensions 不得超过分类簿条目数
        let mut span = 1u64;
        for _ in 0..classbook_ref.dimensions() {
            span = span.saturating_mul(classifications as u64);
        }
        if span > classbook_ref.entries() as u64 {
            return Err(XunError::HeaderMalformed(
                "residue 分类数超出 classbook 容量".into(),
            ));
        }

        let mut cascades = Vec::with_capacity(classifications);
        for _ in 0..classifications {
            let low_bits = packet.read_bits(3) as u32;
            let high_bits = if packet.read_bit() {
                packet.read_bits(5) as u32
            } else {
                0
            };
            cascades.push((high_bits << 3) | low_bits);
        }

        let mut books = Vec::with_capacity(classifications);
        for &cascade in &cascades {
            let mut book_set = [None; 8];
            for (pass, slot) in book_set.iter_mut().enumerate() {
                if cascade & (1 << pass) == 0 {
                    continue;
                }
                let index = packet.read_bits(8) as usize;
                let Some(book) = codebooks.get(index) else {
                    return Err(XunError::HeaderMalformed(
                        "residue book 索引越界".into(),
                    ));
                };
                if !book.has_lookup() {
                    return Err(XunError::HeaderMalformed(
                        "residue book 缺少 VQ 查找表".into(),
                    ));
                }
                *slot = Some(index);
            }
            books.push(book_set);
        }
        if packet.is_short() {
            return Err(XunError::HeaderMalformed("residue 配置读取越界".into()));
        }

        Ok(Self {
            kind,
            begin,
            end,
            partition_size,
            classifications,
            classbook,
            cascades,
            books,
        })
    }

    fn max_pass(&self) -> usize {
        self.cascades
            .iter()
            .flat_map(|&c| (0..8).filter(move |b| c & (1 << b) != 0))
            .max()
            .unwrap_or(0)
    }

    /// 解码一个子映射的 residue 频谱, 叠加进各声道缓冲
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn decode(
        &self,
        packet: &mut Packet,
        codebooks: &[Codebook],
        channels: &[usize],
        do_not_decode: &[bool],
        n2: usize,
        spectra: &mut [Vec<f32>],
        interleave_scratch: &mut Vec<f32>,
    ) -> XunResult<()> {
        if channels.is_empty() {
            return Ok(());
        }
        if channels.iter().all(|&ch| do_not_decode[ch]) {
            return Ok(());
        }
        if self.kind == 2 {
            self.decode_interleaved(packet, codebooks, channels, n2, spectra, interleave_scratch)
        } else {
            self.decode_split(packet, codebooks, channels, do_not_decode, n2, spectra)
        }
    }

    /// 形式 0/1: 各声道独立的分区解码
    fn decode_split(
        &self,
        packet: &mut Packet,
        codebooks: &[Codebook],
        channels: &[usize],
        do_not_decode: &[bool],
        n2: usize,
        spectra: &mut [Vec<f32>],
    ) -> XunResult<()> {
        let begin = self.begin.min(n2);
        let end = self.end.min(n2);
        let psize = self.partition_size;
        if end <= begin || psize == 0 {
            return Ok(());
        }
        let partitions = (end - begin) / psize;
        if partitions == 0 {
            return Ok(());
        }

        let classbook = &codebooks[self.classbook];
        let classwords = classbook.dimensions();
        let mut classes = vec![vec![0usize; partitions + classwords]; channels.len()];

        for pass in 0..=self.max_pass() {
            let mut partition = 0usize;
            while partition < partitions {
                if pass == 0 {
                    for (slot, &ch) in channels.iter().enumerate() {
                        if do_not_decode[ch] {
                            continue;
                        }
                        let Some(word) = classbook.decode_scalar(packet) else {
                            return Ok(());
                        };
                        unpack_classword(
                            word as usize,
                            self.classifications,
                            &mut classes[slot][partition..partition + classwords],
                        );
                    }
                }
                for _ in 0..classwords {
                    if partition >= partitions {
                        break;
                    }
                    for (slot, &ch) in channels.iter().enumerate() {
                        if do_not_decode[ch] {
                            continue;
                        }
                        let class = classes[slot][partition];
                        let Some(book) = self.books[class][pass] else {
                            continue;
                        };
                        let offset = begin + partition * psize;
                        let done = write_partition(
                            self.kind,
                            &codebooks[book],
                            packet,
                            &mut spectra[ch][..end],
                            offset,
                            psize,
                        );
                        if !done {
                            return Ok(());
                        }
                    }
                    partition += 1;
                }
            }
        }
        Ok(())
    }

    /// 形式 2: 全部声道交错成一条虚拟声道解码
    fn decode_interleaved(
        &self,
        packet: &mut Packet,
        codebooks: &[Codebook],
        channels: &[usize],
        n2: usize,
        spectra: &mut [Vec<f32>],
        scratch: &mut Vec<f32>,
    ) -> XunResult<()> {
        let ch_count = channels.len();
        let actual = n2 * ch_count;
        let begin = self.begin.min(actual);
        let end = self.end.min(actual);
        let psize = self.partition_size;
        if end <= begin || psize == 0 {
            return Ok(());
        }
        let partitions = (end - begin) / psize;
        if partitions == 0 {
            return Ok(());
        }

        let classbook = &codebooks[self.classbook];
        let classwords = classbook.dimensions();
        let mut classes = vec![0usize; partitions + classwords];

        scratch.clear();
        scratch.resize(actual, 0.0);

        'passes: for pass in 0..=self.max_pass() {
            let mut partition = 0usize;
            while partition < partitions {
                if pass == 0 {
                    let Some(word) = classbook.decode_scalar(packet) else {
                        break 'passes;
                    };
                    unpack_classword(
                        word as usize,
                        self.classifications,
                        &mut classes[partition..partition + classwords],
                    );
                }
                for _ in 0..classwords {
                    if partition >= partitions {
                        break;
                    }
                    let class = classes[partition];
                    if let Some(book) = self.books[class][pass] {
                        let offset = begin + partition * psize;
                        let done = write_partition(
                            1,
                            &codebooks[book],
                            packet,
                            &mut scratch[..end],
                            offset,
                            psize,
                        );
                        if !done {
                            break 'passes;
                        }
                    }
                    partition += 1;
                }
            }
        }

        for (slot, &ch) in channels.iter().enumerate() {
            let spectrum = &mut spectra[ch];
            for (i, value) in spectrum.iter_mut().enumerate().take(n2) {
                *value += scratch[i * ch_count + slot];
            }
        }
        Ok(())
    }
}

/// 类别字按高槽位先填的顺序展开
fn unpack_classword(word: usize, class_count: usize, slots: &mut [usize]) {
    let mut temp = word;
    for slot in slots.iter_mut().rev() {
        *slot = temp % class_count;
        temp /= class_count;
    }
}

/// 解码一个分区的 VQ 向量并叠加写入, 返回 false 表示位流耗尽
fn write_partition(
    kind: u16,
    book: &Codebook,
    packet: &mut Packet,
    target: &mut [f32],
    offset: usize,
    psize: usize,
) -> bool {
    let dims = book.dimensions();
    match kind {
        0 => {
            let step = psize / dims;
            for j in 0..step {
                let Some(entry) = book.decode_scalar(packet) else {
                    return false;
                };
                let Some(vector) = book.vq_vector(entry as usize) else {
                    warn!("residue book 缺少查找表, 提前结束本包");
                    return false;
                };
                for (k, &v) in vector.iter().enumerate() {
                    if let Some(slot) = target.get_mut(offset + j + k * step) {
                        *slot += v;
                    }
                }
            }
        }
        _ => {
            let mut pos = 0usize;
            while pos < psize {
                let Some(entry) = book.decode_scalar(packet) else {
                    return false;
                };
                let Some(vector) = book.vq_vector(entry as usize) else {
                    warn!("residue book 缺少查找表, 提前结束本包");
                    return false;
                };
                for &v in vector {
                    if pos >= psize {
                        break;
                    }
                    if let Some(slot) = target.get_mut(offset + pos) {
                        *slot += v;
                    }
                    pos += 1;
                }
            }
        }
    }
    true
}

/// 方极坐标解耦: 把 (幅度, 带符号角度) 还原为两条声道的频谱
///
/// 按耦合步骤的逆序处理.
pub(crate) fn decouple_channels(
    spectra: &mut [Vec<f32>],
    couplings: &[(usize, usize)],
    n2: usize,
) {
    for &(mag, ang) in couplings.iter().rev() {
        if mag == ang || mag >= spectra.len() || ang >= spectra.len() {
            continue;
        }
        let (low, high) = (mag.min(ang), mag.max(ang));
        let (head, tail) = spectra.split_at_mut(high);
        let (mag_buf, ang_buf) = if mag < ang {
            (&mut head[low], &mut tail[0])
        } else {
            (&mut tail[0], &mut head[low])
        };
        for i in 0..n2.min(mag_buf.len()).min(ang_buf.len()) {
            let m = mag_buf[i];
            let a = ang_buf[i];
            let (new_m, new_a) = if m > 0.0 {
                if a >= 0.0 { (m, m - a) } else { (m + a, m) }
            } else if a >= 0.0 {
                (m, m + a)
            } else {
                (m - a, m)
            };
            mag_buf[i] = new_m;
            ang_buf[i] = new_a;
        }
    }
}
