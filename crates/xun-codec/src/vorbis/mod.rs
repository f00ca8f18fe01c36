//! Vorbis 音频解码器.
//!
//! 输入由包提供者按序交付的 Vorbis 包, 输出交错的 32 位浮点 PCM.
//!
//! 解码分两个阶段:
//! - 头阶段: 恰好三个头包 (identification/comment/setup) 建立全部配置
//! - 音频阶段: 每个包经 floor/residue 解码, 声道解耦, IMDCT 与加窗,
//!   再与上一包的尾部重叠相加后交付
//!
//! 解码器是单消费者的: 所有调用在调用方线程上完成, 唯一可被其他线程
//! 并发读取的是统计收集器. 音频阶段的坏包不中断解码: 坏包被丢弃,
//! 上一包已加窗的尾部自然淡出, 表现为短暂静音.

mod codebook;
mod floor;
mod headers;
mod imdct;
mod residue;
mod setup;
mod window;

pub use headers::{CommentHeader, IdentHeader};

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use xun_core::{XunError, XunResult};

use crate::packet::Packet;
use crate::provider::PacketProvider;
use crate::stats::{StatsSnapshot, StreamStats};

use self::floor::FloorData;
use self::imdct::Imdct;
use self::residue::decouple_channels;
use self::setup::{ModeConfig, SetupData};
use self::window::{BlockLayout, WindowSet, block_layout};

/// 样本上限, 区间 [-1.0, 1.0) 内 1.0 的最近下邻
const CLIP_CEILING: f32 = 0.999_999_94;

/// seek 的参照原点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// 流起点
    Start,
    /// 当前位置
    Current,
    /// 流末尾
    End,
}

impl std::fmt::Debug for VorbisDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VorbisDecoder")
            .field("current_position", &self.current_position)
            .field("has_position", &self.has_position)
            .field("eos_found", &self.eos_found)
            .finish()
    }
}

/// Vorbis 流解码器
pub struct VorbisDecoder {
    provider: Box<dyn PacketProvider>,
    ident: IdentHeader,
    comments: CommentHeader,
    setup: SetupData,
    /// mode 序号字段的位宽
    mode_bits: u32,
    windows: WindowSet,
    /// 短块与长块各自的 IMDCT
    transforms: [Imdct; 2],
    /// 输出交错时的声道重排
    channel_order: Vec<usize>,
    stats: Arc<StreamStats>,

    /// 上一包缓冲 (每声道 blocksize1 长), 与 next_buf 轮换复用
    prev_buf: Vec<Vec<f32>>,
    next_buf: Vec<Vec<f32>>,
    /// residue 形式 2 的交错暂存
    interleave_scratch: Vec<f32>,
    /// prev_buf 中下一个待交付样本
    prev_start: usize,
    /// prev_buf 中可交付区间的终点
    prev_end: usize,
    /// prev_buf 本包样本总长, [prev_end, prev_stop) 与下一包重叠
    prev_stop: usize,
    /// 是否已解码过音频包 (首包只建立重叠尾部, 不交付样本)
    primed: bool,
    /// prev_start 对应的绝对样本序号
    current_position: i64,
    has_position: bool,
    eos_found: bool,
}

impl VorbisDecoder {
    /// 从包提供者构造解码器, 消费并校验三个头包
    pub fn new(mut provider: Box<dyn PacketProvider>) -> XunResult<Self> {
        let Some(mut first) = provider.get_next() else {
            return Err(XunError::NotVorbis("流中没有任何包".into()));
        };

        let mut head = [0u8; 8];
        let got = first.read_bytes(&mut head);
        if let Some(codec) = headers::sniff_other_codec(&head[..got]) {
            return Err(XunError::NotVorbis(codec.into()));
        }
        if got < 7 || head[0] != 0x01 || &head[1..7] != headers::VORBIS_MAGIC {
            return Err(XunError::NotVorbis("无法识别的首包".into()));
        }
        first.reset();

        let ident = headers::parse_identification(&mut first)?;
        debug!(
            "Vorbis identification: {} 声道, {} Hz, 块长 {}/{}",
            ident.channels, ident.sample_rate, ident.blocksize0, ident.blocksize1,
        );

        let Some(mut comment_packet) = provider.get_next() else {
            return Err(XunError::HeaderMalformed("缺少 comment 头包".into()));
        };
        let Some(mut setup_packet) = provider.get_next() else {
            return Err(XunError::HeaderMalformed("缺少 setup 头包".into()));
        };
        if comment_packet.stream_serial != first.stream_serial
            || setup_packet.stream_serial != first.stream_serial
        {
            return Err(XunError::HeaderMalformed(
                "三个头包的流序列号不一致".into(),
            ));
        }

        let comments = headers::parse_comment(&mut comment_packet)?;
        let setup = setup::parse_setup(
            &mut setup_packet,
            ident.channels,
            (ident.blocksize0, ident.blocksize1),
        )?;
        debug!(
            "Vorbis setup: {} codebook, {} floor, {} residue, {} mapping, {} mode",
            setup.codebooks.len(),
            setup.floors.len(),
            setup.residues.len(),
            setup.mappings.len(),
            setup.modes.len(),
        );

        let mode_bits = ilog(setup.modes.len() as u32 - 1);
        let windows = WindowSet::new(ident.blocksize0, ident.blocksize1);
        let transforms = [Imdct::new(ident.blocksize0), Imdct::new(ident.blocksize1)];
        let channels = ident.channels;
        let channel_order = output_channel_order(channels);

        Ok(Self {
            provider,
            comments,
            setup,
            mode_bits,
            windows,
            transforms,
            channel_order,
            stats: Arc::new(StreamStats::new()),
            prev_buf: vec![vec![0.0; ident.blocksize1]; channels],
            next_buf: vec![vec![0.0; ident.blocksize1]; channels],
            interleave_scratch: Vec::new(),
            prev_start: 0,
            prev_end: 0,
            prev_stop: 0,
            primed: false,
            current_position: 0,
            has_position: true,
            eos_found: false,
            ident,
        })
    }

    /// 读取交错 PCM 到 `buf[offset..offset + count]`
    ///
    /// `count` 必须是声道数的整数倍. 每个样本被钳制到 [-1.0, 1.0).
    /// 返回写入的帧数 (每声道样本数); 返回 0 表示流已结束.
    pub fn read(&mut self, buf: &mut [f32], offset: usize, count: usize) -> XunResult<usize> {
        let channels = self.ident.channels;
        let end = offset.checked_add(count);
        if count % channels != 0 || end.is_none_or(|end| end > buf.len()) {
            return Err(XunError::InvalidArgument(
                "读取区间越界或与声道数不匹配".into(),
            ));
        }

        let target_frames = count / channels;
        let mut produced = 0usize;
        while produced < target_frames {
            if self.prev_start < self.prev_end {
                let frames = (self.prev_end - self.prev_start).min(target_frames - produced);
                for f in 0..frames {
                    let base = offset + (produced + f) * channels;
                    for (slot, &src) in self.channel_order.iter().enumerate() {
                        let v = self.prev_buf[src][self.prev_start + f];
                        buf[base + slot] = v.clamp(-1.0, CLIP_CEILING);
                    }
                }
                self.prev_start += frames;
                self.current_position += frames as i64;
                produced += frames;
                continue;
            }
            if self.eos_found {
                break;
            }
            self.advance_packet();
        }
        Ok(produced)
    }

    /// 拉取并解码下一个音频包, 更新重叠游标与位置
    fn advance_packet(&mut self) {
        let Some(mut packet) = self.provider.get_next() else {
            self.eos_found = true;
            return;
        };
        if packet.is_resync {
            self.has_position = false;
        }
        let granule = packet.granule_position;
        let is_eos = packet.is_end_of_stream;

        let decoded = self.decode_packet(&mut packet);
        self.stats.add_packet(
            packet.bits_read(),
            packet.total_bits(),
            packet.container_overhead_bits,
        );

        match decoded {
            Ok(layout) => {
                if self.primed {
                    // 上一包的重叠尾部加进新包头部
                    let overlap = (self.prev_stop - self.prev_end).min(layout.total - layout.start);
                    for (prev, next) in self.prev_buf.iter().zip(self.next_buf.iter_mut()) {
                        for i in 0..overlap {
                            next[layout.start + i] += prev[self.prev_end + i];
                        }
                    }
                    self.prev_start = layout.start;
                } else {
                    // 首个音频包的左半缺少重叠, 不可交付
                    self.primed = true;
                    self.prev_start = layout.valid_end;
                }
                mem::swap(&mut self.prev_buf, &mut self.next_buf);
                self.prev_end = layout.valid_end;
                self.prev_stop = layout.total;

                if let Some(g) = granule {
                    if !self.has_position {
                        // 由页末 granule 反推当前位置
                        self.has_position = true;
                        self.current_position =
                            g - (self.prev_end - self.prev_start) as i64;
                    }
                    if is_eos {
                        // 末包 granule 钳制: 总产出不得超过 granule 位置
                        let pending = (self.prev_end - self.prev_start) as i64;
                        let allowed = (g - self.current_position).clamp(0, pending);
                        self.prev_end = self.prev_start + allowed as usize;
                    }
                }
            }
            Err(e) => {
                warn!("音频包解码失败, 窗内淡出后继续: {e}");
                // 丢弃坏包, 放出上一包已加窗的尾部
                self.prev_end = self.prev_stop;
            }
        }
        if is_eos {
            self.eos_found = true;
        }
    }

    /// 解码一个音频包到 next_buf, 返回样本布局
    fn decode_packet(&mut self, packet: &mut Packet) -> XunResult<BlockLayout> {
        if packet.read_bits(1) != 0 || packet.is_short() {
            return Err(XunError::PacketCorrupt("音频包类型位非 0".into()));
        }
        let mode_index = packet.read_bits(self.mode_bits) as usize;
        if packet.is_short() || mode_index >= self.setup.modes.len() {
            return Err(XunError::PacketCorrupt(format!(
                "mode 索引非法: {mode_index}",
            )));
        }
        let mode = &self.setup.modes[mode_index];

        let (n, prev_flag, next_flag) = if mode.block_flag {
            let prev = packet.read_bit();
            let next = packet.read_bit();
            (self.ident.blocksize1, prev, next)
        } else {
            (self.ident.blocksize0, false, false)
        };
        if packet.is_short() {
            return Err(XunError::PacketCorrupt("窗口标志读取越界".into()));
        }
        let neighbor = |flag: bool| {
            if mode.block_flag && !flag {
                self.ident.blocksize0
            } else {
                n
            }
        };
        let layout = block_layout(n, neighbor(prev_flag), neighbor(next_flag));
        let window = self.windows.get(mode.block_flag, prev_flag, next_flag);
        let mapping = &self.setup.mappings[mode.mapping];
        let n2 = n / 2;
        let channels = self.ident.channels;

        // floor 解包, 记录无能量声道
        let mut floor_data = Vec::with_capacity(channels);
        for ch in 0..channels {
            let submap = mapping.channel_mux[ch];
            let floor = &self.setup.floors[mapping.submaps[submap].floor];
            floor_data.push(floor.unpack(packet, &self.setup.codebooks)?);
        }

        // 耦合传播: 耦合对中任一侧有能量, 双方都参与 residue 解码
        let mut no_energy: Vec<bool> = floor_data.iter().map(FloorData::is_unused).collect();
        for &(mag, ang) in &mapping.couplings {
            if !no_energy[mag] || !no_energy[ang] {
                no_energy[mag] = false;
                no_energy[ang] = false;
            }
        }

        // residue 解码进声道频谱
        for buf in self.next_buf.iter_mut() {
            buf[..n2].fill(0.0);
        }
        for (submap_index, submap) in mapping.submaps.iter().enumerate() {
            let submap_channels: Vec<usize> = (0..channels)
                .filter(|&ch| mapping.channel_mux[ch] == submap_index)
                .collect();
            let residue = &self.setup.residues[submap.residue];
            residue.decode(
                packet,
                &self.setup.codebooks,
                &submap_channels,
                &no_energy,
                n2,
                &mut self.next_buf,
                &mut self.interleave_scratch,
            )?;
        }

        decouple_channels(&mut self.next_buf, &mapping.couplings, n2);

        // floor 曲线乘入频谱, 无能量声道清零
        for ch in 0..channels {
            let spectrum = &mut self.next_buf[ch][..n2];
            if floor_data[ch].is_unused() {
                spectrum.fill(0.0);
                continue;
            }
            let submap = mapping.channel_mux[ch];
            let floor = &self.setup.floors[mapping.submaps[submap].floor];
            floor.apply(&floor_data[ch], spectrum);
        }

        // IMDCT 与整块加窗
        let transform = &mut self.transforms[usize::from(mode.block_flag)];
        for buf in self.next_buf.iter_mut() {
            transform.inverse(&mut buf[..n]);
            for (sample, &w) in buf[..n].iter_mut().zip(window.iter()) {
                *sample *= w;
            }
        }

        Ok(layout)
    }

    /// 定位到指定样本, 之后的 read 从该样本开始返回
    ///
    /// 页级搜索由包提供者完成; 本方法重置重叠状态, 静默消费预滚包与
    /// 目标包恢复连续性, 再精确推进到目标样本.
    pub fn seek_to_sample(&mut self, sample: i64, origin: SeekOrigin) -> XunResult<()> {
        let total = self.provider.granule_count()? as i64;
        let target = match origin {
            SeekOrigin::Start => sample,
            SeekOrigin::Current => self.current_position.saturating_add(sample),
            SeekOrigin::End => total.saturating_add(sample),
        };
        if target < 0 || target > total {
            return Err(XunError::SeekOutOfRange { target, total });
        }
        if target == total {
            // 定位到流末尾: 直接进入排空状态
            self.reset_overlap();
            self.eos_found = true;
            self.has_position = true;
            self.current_position = target;
            return Ok(());
        }

        let landed = {
            let modes = &self.setup.modes;
            let mode_bits = self.mode_bits;
            let blocksizes = (self.ident.blocksize0, self.ident.blocksize1);
            self.provider.seek_to(target as u64, 1, &mut |packet, last| {
                packet_sample_count(modes, mode_bits, blocksizes, packet, last)
            })?
        };

        // 两个包静默重建重叠状态 (预滚包 + 目标包)
        self.reset_overlap();
        self.has_position = true;
        self.current_position = landed as i64;
        for _ in 0..2 {
            self.advance_packet();
            if self.eos_found && self.prev_start >= self.prev_end {
                return Err(XunError::SeekPreRollFailed);
            }
        }

        // 在缓冲内精确推进到目标样本, 不产出
        let mut remaining = target.saturating_sub(self.current_position) as usize;
        loop {
            let available = self.prev_end - self.prev_start;
            if remaining <= available {
                self.prev_start += remaining;
                self.current_position = target;
                return Ok(());
            }
            remaining -= available;
            self.prev_start = self.prev_end;
            self.current_position += available as i64;
            if self.eos_found {
                self.current_position = target;
                return Ok(());
            }
            self.advance_packet();
        }
    }

    fn reset_overlap(&mut self) {
        self.prev_start = 0;
        self.prev_end = 0;
        self.prev_stop = 0;
        self.primed = false;
        self.eos_found = false;
    }

    /// 声道数
    pub fn channels(&self) -> usize {
        self.ident.channels
    }

    /// 采样率 (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.ident.sample_rate
    }

    /// 标称比特率 (bit/s, 0 表示未声明)
    pub fn bitrate_nominal(&self) -> i32 {
        self.ident.bitrate_nominal
    }

    /// 比特率上界
    pub fn bitrate_upper(&self) -> i32 {
        self.ident.bitrate_upper
    }

    /// 比特率下界
    pub fn bitrate_lower(&self) -> i32 {
        self.ident.bitrate_lower
    }

    /// 编码器 vendor 字符串
    pub fn vendor(&self) -> &str {
        &self.comments.vendor
    }

    /// 用户标签
    pub fn comments(&self) -> &CommentHeader {
        &self.comments
    }

    /// 逻辑流总样本数
    pub fn total_samples(&mut self) -> XunResult<u64> {
        self.provider.granule_count()
    }

    /// 下一个交付样本的绝对序号
    pub fn current_sample(&self) -> i64 {
        self.current_position
    }

    /// 位置是否可信 (resync 之后, 见到 granule 之前为 false)
    pub fn has_position(&self) -> bool {
        self.has_position
    }

    /// 总时长
    pub fn total_time(&mut self) -> XunResult<Duration> {
        let samples = self.total_samples()?;
        let rate = self.ident.sample_rate;
        Ok(Duration::from_secs_f64(samples as f64 / f64::from(rate)))
    }

    /// 当前时间位置
    pub fn current_time(&self) -> Duration {
        let position = self.current_position.max(0) as f64;
        Duration::from_secs_f64(position / f64::from(self.ident.sample_rate))
    }

    /// 是否已到流末尾且缓冲排空
    pub fn is_end_of_stream(&self) -> bool {
        self.eos_found && self.prev_start >= self.prev_end
    }

    /// 统计快照
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 统计收集器句柄, 可交给其他线程并发读取
    pub fn stats_handle(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }
}

/// 只读取包头少量比特, 估计该包将产出的样本数, 然后把包重置回起点
fn packet_sample_count(
    modes: &[ModeConfig],
    mode_bits: u32,
    blocksizes: (usize, usize),
    packet: &mut Packet,
    _is_last_in_page: bool,
) -> u64 {
    packet.reset();
    let count = (|| {
        if packet.read_bits(1) != 0 {
            return 0;
        }
        let mode_index = packet.read_bits(mode_bits) as usize;
        let Some(mode) = modes.get(mode_index) else {
            return 0;
        };
        let (n, prev_n, next_n) = if mode.block_flag {
            let pick = |flag: bool| if flag { blocksizes.1 } else { blocksizes.0 };
            let prev = packet.read_bit();
            let next = packet.read_bit();
            (blocksizes.1, pick(prev), pick(next))
        } else {
            (blocksizes.0, blocksizes.0, blocksizes.0)
        };
        if packet.is_short() {
            return 0;
        }
        let layout = block_layout(n, prev_n, next_n);
        (layout.valid_end - layout.start) as u64
    })();
    packet.reset();
    count
}

/// Vorbis 声道序到常规输出序的映射
///
/// Vorbis 多声道布局把中置排在第二位 (L, C, R, ...), 输出时换成
/// 常见的 L, R, C 顺序; 单声道与立体声为恒等映射.
fn output_channel_order(channels: usize) -> Vec<usize> {
    match channels {
        3 => vec![0, 2, 1],
        5 => vec![0, 2, 1, 3, 4],
        6 => vec![0, 2, 1, 5, 3, 4],
        _ => (0..channels).collect(),
    }
}

/// Vorbis ilog: 值的最高有效位位置, ilog(0) = 0
pub(crate) fn ilog(value: u32) -> u32 {
    32 - value.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ilog() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(4), 3);
        assert_eq!(ilog(7), 3);
        assert_eq!(ilog(255), 8);
    }

    #[test]
    fn test_output_channel_order() {
        assert_eq!(output_channel_order(1), vec![0]);
        assert_eq!(output_channel_order(2), vec![0, 1]);
        assert_eq!(output_channel_order(3), vec![0, 2, 1]);
        assert_eq!(output_channel_order(6), vec![0, 2, 1, 5, 3, 4]);
    }

    #[test]
    fn test_packet_sample_count_短块() {
        let modes = vec![ModeConfig {
            block_flag: false,
            mapping: 0,
        }];
        // 类型位 0 + 0 位 mode 序号
        let mut packet = Packet::from_data(vec![0u8]);
        let count = packet_sample_count(&modes, 0, (256, 2048), &mut packet, true);
        assert_eq!(count, 128);
        // 估计后游标回到起点
        assert_eq!(packet.bits_read(), 0);
    }

    #[test]
    fn test_packet_sample_count_长块() {
        let modes = vec![
            ModeConfig {
                block_flag: false,
                mapping: 0,
            },
            ModeConfig {
                block_flag: true,
                mapping: 0,
            },
        ];
        // 类型位 0, mode=1, prev=1, next=1
        let mut packet = Packet::from_data(vec![0b0000_1110]);
        let count = packet_sample_count(&modes, 1, (256, 2048), &mut packet, true);
        assert_eq!(count, 1024);
        // prev=0, next=0: 两侧都按短块重叠
        let mut packet = Packet::from_data(vec![0b0000_0010]);
        let count = packet_sample_count(&modes, 1, (256, 2048), &mut packet, true);
        // start = 512 - 64, valid_end = 1536 - 64
        assert_eq!(count, 1024);
    }

    #[test]
    fn test_packet_sample_count_坏包为零() {
        let modes = vec![ModeConfig {
            block_flag: false,
            mapping: 0,
        }];
        // 类型位为 1 的包不产出样本
        let mut packet = Packet::from_data(vec![0b0000_0001]);
        assert_eq!(packet_sample_count(&modes, 0, (256, 2048), &mut packet, true), 0);
    }
}
