//! Vorbis codebook: Huffman 解码树构建与矢量量化查表.
//!
//! codebook 在 setup 头包中定义, 初始化完成后不可变, 可被并发读取.

use xun_core::{XunError, XunResult};

use crate::packet::Packet;

use super::ilog;

/// codebook 同步字 ("BCV" 按位序读出的 24 位值)
const SYNC_PATTERN: u64 = 0x564342;

/// 码字长度上限 (比特)
const MAX_CODEWORD_LEN: u32 = 32;

/// 展开后 VQ 表的元素数上限, 防御畸形头部的超量分配
const MAX_LOOKUP_ELEMENTS: usize = 1 << 24;

/// 解析完成的 codebook
#[derive(Debug)]
pub(crate) struct Codebook {
    dimensions: usize,
    entries: usize,
    huffman: HuffmanTree,
    /// 展开后的 VQ 表 (entries x dimensions), lookup type 0 时为 None
    lookup: Option<Vec<f32>>,
}

impl Codebook {
    /// 从 setup 头包解析一个 codebook
    pub(crate) fn parse(packet: &mut Packet) -> XunResult<Self> {
        let sync = packet.read_bits(24);
        if sync != SYNC_PATTERN {
            return Err(XunError::HeaderMalformed(format!(
                "codebook 同步字错误: 0x{sync:06X}",
            )));
        }

        let dimensions = packet.read_bits(16) as usize;
        if dimensions == 0 {
            return Err(XunError::HeaderMalformed(
                "codebook dimensions 不能为 0".into(),
            ));
        }
        let entries = packet.read_bits(24) as usize;
        if entries == 0 {
            return Err(XunError::HeaderMalformed(
                "codebook entries 不能为 0".into(),
            ));
        }

        let ordered = packet.read_bit();
        let mut lengths = vec![0u8; entries];
        if ordered {
            let mut current_entry = 0usize;
            let mut current_length = packet.read_bits(5) as u32 + 1;
            while current_entry < entries {
                let left = (entries - current_entry) as u32;
                let number = packet.read_bits(ilog(left)) as usize;
                if number == 0 || current_entry + number > entries {
                    return Err(XunError::HeaderMalformed(
                        "codebook ordered 长度组无效".into(),
                    ));
                }
                if current_length > MAX_CODEWORD_LEN {
                    return Err(XunError::HeaderMalformed(
                        "codebook 码字长度超限".into(),
                    ));
                }
                for slot in &mut lengths[current_entry..current_entry + number] {
                    *slot = current_length as u8;
                }
                current_entry += number;
                current_length += 1;
            }
        } else {
            let sparse = packet.read_bit();
            for slot in &mut lengths {
                let used = if sparse { packet.read_bit() } else { true };
                if used {
                    *slot = packet.read_bits(5) as u8 + 1;
                }
            }
        }
        if packet.is_short() {
            return Err(XunError::HeaderMalformed(
                "codebook 长度表读取越界".into(),
            ));
        }

        let huffman = HuffmanTree::from_lengths(&lengths)?;
        let lookup = Self::parse_lookup(packet, entries, dimensions)?;

        Ok(Self {
            dimensions,
            entries,
            huffman,
            lookup,
        })
    }

    fn parse_lookup(
        packet: &mut Packet,
        entries: usize,
        dimensions: usize,
    ) -> XunResult<Option<Vec<f32>>> {
        let lookup_type = packet.read_bits(4);
        match lookup_type {
            0 => return Ok(None),
            1 | 2 => {}
            other => {
                return Err(XunError::HeaderMalformed(format!(
                    "codebook lookup_type 非法: {other}",
                )));
            }
        }

        let minimum = float32_unpack(packet.read_bits(32) as u32);
        let delta = float32_unpack(packet.read_bits(32) as u32);
        let value_bits = packet.read_bits(4) as u32 + 1;
        let sequence_p = packet.read_bit();

        let quant_count = if lookup_type == 1 {
            lookup1_values(entries, dimensions)
        } else {
            entries
                .checked_mul(dimensions)
                .ok_or_else(|| XunError::HeaderMalformed("codebook 量化值数溢出".into()))?
        };

        let mut mults = Vec::with_capacity(quant_count);
        for _ in 0..quant_count {
            let raw = packet.read_bits(value_bits) as f32;
            mults.push(minimum + delta * raw);
        }
        if packet.is_short() {
            return Err(XunError::HeaderMalformed(
                "codebook 量化表读取越界".into(),
            ));
        }

        let table_len = entries
            .checked_mul(dimensions)
            .filter(|&len| len <= MAX_LOOKUP_ELEMENTS)
            .ok_or_else(|| XunError::HeaderMalformed("codebook VQ 表过大".into()))?;

        // 将乘数表展开为 entries x dimensions 的最终取值, sequence_p 的
        // 逐维累加在此一次性折算.
        let mut table = Vec::with_capacity(table_len);
        for entry in 0..entries {
            let mut last = 0.0f32;
            if lookup_type == 1 {
                let mut index_divisor = 1u64;
                for _ in 0..dimensions {
                    let index = (entry as u64 / index_divisor) % quant_count as u64;
                    let value = mults[index as usize] + last;
                    table.push(value);
                    if sequence_p {
                        last = value;
                    }
                    index_divisor *= quant_count as u64;
                }
            } else {
                for dim in 0..dimensions {
                    let value = mults[entry * dimensions + dim] + last;
                    table.push(value);
                    if sequence_p {
                        last = value;
                    }
                }
            }
        }

        Ok(Some(table))
    }

    /// 逐位走 Huffman 树解码一个条目序号, 包耗尽时返回 `None`
    pub(crate) fn decode_scalar(&self, packet: &mut Packet) -> Option<u32> {
        self.huffman.decode(packet)
    }

    /// 取条目对应的 VQ 向量 (dimensions 个浮点), 无查找表时返回 `None`
    pub(crate) fn vq_vector(&self, entry: usize) -> Option<&[f32]> {
        let table = self.lookup.as_ref()?;
        let start = entry * self.dimensions;
        table.get(start..start + self.dimensions)
    }

    pub(crate) fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    pub(crate) fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }
}

/// 内部节点的条目占位值
const INTERNAL: u32 = u32::MAX;
/// 空子节点
const NO_CHILD: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    children: [u32; 2],
    entry: u32,
    /// 以该节点为根的子树是否已占满
    full: bool,
}

impl Node {
    fn new() -> Self {
        Self {
            children: [NO_CHILD; 2],
            entry: INTERNAL,
            full: false,
        }
    }
}

/// 前缀码解码树
///
/// 按条目序号顺序做最左可用槽位插入, 与 Vorbis 规定的规范码字分配
/// 等价. 插入失败说明长度表过度指定; 插入完成后根未满说明欠指定.
#[derive(Debug)]
pub(crate) struct HuffmanTree {
    nodes: Vec<Node>,
    max_len: u32,
}

impl HuffmanTree {
    /// 由码字长度表构建 (长度 0 表示未使用的条目)
    pub(crate) fn from_lengths(lengths: &[u8]) -> XunResult<Self> {
        let used: Vec<(usize, u8)> = lengths
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, len)| len > 0)
            .collect();

        if used.is_empty() {
            return Err(XunError::HeaderMalformed(
                "codebook 不含任何已用条目".into(),
            ));
        }

        // 单条目簿: 唯一条目的码长必须为 1, 任一比特都解码到它
        if used.len() == 1 {
            let (entry, len) = used[0];
            if len != 1 {
                return Err(XunError::HeaderMalformed(
                    "单条目 codebook 的码长必须为 1".into(),
                ));
            }
            let mut nodes = vec![Node::new(), Node::new(), Node::new()];
            nodes[0].children = [1, 2];
            nodes[1].entry = entry as u32;
            nodes[2].entry = entry as u32;
            return Ok(Self { nodes, max_len: 1 });
        }

        let mut tree = Self {
            nodes: vec![Node::new()],
            max_len: 0,
        };
        for &(entry, len) in &used {
            if u32::from(len) > MAX_CODEWORD_LEN {
                return Err(XunError::HeaderMalformed("codebook 码字长度超限".into()));
            }
            if !tree.insert(0, entry as u32, u32::from(len)) {
                return Err(XunError::HeaderMalformed(
                    "codebook Huffman 长度表过度指定".into(),
                ));
            }
            tree.max_len = tree.max_len.max(u32::from(len));
        }
        if !tree.nodes[0].full {
            return Err(XunError::HeaderMalformed(
                "codebook Huffman 长度表欠指定".into(),
            ));
        }
        Ok(tree)
    }

    fn insert(&mut self, idx: usize, entry: u32, depth: u32) -> bool {
        if self.nodes[idx].entry != INTERNAL {
            return false;
        }
        if depth == 0 {
            if self.nodes[idx].children != [NO_CHILD; 2] {
                return false;
            }
            self.nodes[idx].entry = entry;
            self.nodes[idx].full = true;
            return true;
        }
        for side in 0..2 {
            let child = self.nodes[idx].children[side];
            if child == NO_CHILD {
                let child = self.nodes.len();
                self.nodes.push(Node::new());
                self.nodes[idx].children[side] = child as u32;
                // 全新子树沿 0 分支下探, 必然成功
                let placed = self.insert(child, entry, depth - 1);
                self.refresh_full(idx);
                return placed;
            }
            let child = child as usize;
            if !self.nodes[child].full && self.insert(child, entry, depth - 1) {
                self.refresh_full(idx);
                return true;
            }
        }
        false
    }

    fn refresh_full(&mut self, idx: usize) {
        let [left, right] = self.nodes[idx].children;
        self.nodes[idx].full = left != NO_CHILD
            && right != NO_CHILD
            && self.nodes[left as usize].full
            && self.nodes[right as usize].full;
    }

    fn decode(&self, packet: &mut Packet) -> Option<u32> {
        let mut idx = 0usize;
        for _ in 0..=self.max_len {
            let node = self.nodes[idx];
            if node.entry != INTERNAL {
                return Some(node.entry);
            }
            let mut got = 0;
            let bit = packet.peek_bits(1, &mut got);
            if got == 0 {
                return None;
            }
            packet.skip_bits(1);
            let child = node.children[bit as usize];
            if child == NO_CHILD {
                return None;
            }
            idx = child as usize;
        }
        None
    }
}

/// Vorbis 32 位浮点解包 (1 符号 / 10 指数 / 21 尾数, 指数偏置 788)
fn float32_unpack(value: u32) -> f32 {
    let mantissa = (value & 0x1F_FFFF) as f64;
    let exponent = ((value >> 21) & 0x3FF) as i32;
    let signed = if value & 0x8000_0000 != 0 {
        -mantissa
    } else {
        mantissa
    };
    (signed * 2f64.powi(exponent - 788)) as f32
}

/// lookup type 1 的量化值数: 满足 v^dimensions <= entries 的最大整数
fn lookup1_values(entries: usize, dimensions: usize) -> usize {
    let mut value = (entries as f64).powf(1.0 / dimensions as f64).floor() as usize;
    while pow_at_most(value + 1, dimensions, entries) {
        value += 1;
    }
    while value > 0 && !pow_at_most(value, dimensions, entries) {
        value -= 1;
    }
    value
}

fn pow_at_most(base: usize, exp: usize, limit: usize) -> bool {
    let mut acc = 1u128;
    for _ in 0..exp {
        acc *= base as u128;
        if acc > limit as u128 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use xun_core::BitWriter;

    fn packet_from_bits(bits: &[(u64, u32)]) -> Packet {
        let mut w = BitWriter::new();
        for &(value, width) in bits {
            w.write_bits(value, width);
        }
        Packet::from_data(w.finish())
    }

    #[test]
    fn test_huffman_构建与解码() {
        let tree = HuffmanTree::from_lengths(&[1, 2, 2]).expect("构建失败");
        // 码字: e0=0, e1=10, e2=11 (码字高位先进流)
        let mut p = packet_from_bits(&[(0b0, 1), (0b1, 1), (0b0, 1), (0b1, 1), (0b1, 1)]);
        let book = Codebook {
            dimensions: 1,
            entries: 3,
            huffman: tree,
            lookup: None,
        };
        assert_eq!(book.decode_scalar(&mut p), Some(0));
        assert_eq!(book.decode_scalar(&mut p), Some(1));
        assert_eq!(book.decode_scalar(&mut p), Some(2));
        // 耗尽字节内的补齐位后返回 None
        p.skip_bits(p.bits_remaining());
        assert_eq!(book.decode_scalar(&mut p), None);
    }

    #[test]
    fn test_huffman_官方示例映射() {
        let tree = HuffmanTree::from_lengths(&[2, 4, 4, 4, 4, 2, 3, 3]).expect("构建失败");
        let book = Codebook {
            dimensions: 1,
            entries: 8,
            huffman: tree,
            lookup: None,
        };
        // (码字, 码长, 条目): 码字按高位先进流写入
        let cases = [
            (0b00u64, 2u32, 0u32),
            (0b0100, 4, 1),
            (0b0101, 4, 2),
            (0b0110, 4, 3),
            (0b0111, 4, 4),
            (0b10, 2, 5),
            (0b110, 3, 6),
            (0b111, 3, 7),
        ];
        for &(code, len, expect) in &cases {
            let mut w = BitWriter::new();
            for i in (0..len).rev() {
                w.write_bit(code >> i);
            }
            let mut p = Packet::from_data(w.finish());
            assert_eq!(book.decode_scalar(&mut p), Some(expect), "码字 {code:b}");
        }
    }

    #[test]
    fn test_huffman_单条目簿() {
        let tree = HuffmanTree::from_lengths(&[0, 1, 0]).expect("构建失败");
        let book = Codebook {
            dimensions: 1,
            entries: 3,
            huffman: tree,
            lookup: None,
        };
        for byte in [0x00u8, 0xFF] {
            let mut p = Packet::from_data(vec![byte]);
            for _ in 0..8 {
                assert_eq!(book.decode_scalar(&mut p), Some(1));
            }
        }
    }

    #[test]
    fn test_huffman_非法长度表() {
        // 欠指定
        assert!(HuffmanTree::from_lengths(&[1, 2]).is_err());
        // 过度指定
        assert!(HuffmanTree::from_lengths(&[1, 1, 1]).is_err());
        // 单条目但码长不是 1
        assert!(HuffmanTree::from_lengths(&[0, 2]).is_err());
        // 恰好填满
        assert!(HuffmanTree::from_lengths(&[2, 2, 2, 2]).is_ok());
        assert!(HuffmanTree::from_lengths(&[1, 2, 3, 3]).is_ok());
    }

    #[test]
    fn test_float32_unpack() {
        // 尾数 1, 指数 788 => 1.0
        assert_eq!(float32_unpack(1 | (788 << 21)), 1.0);
        assert_eq!(float32_unpack(1 | (788 << 21) | 0x8000_0000), -1.0);
        assert_eq!(float32_unpack(5 | (787 << 21)), 2.5);
    }

    #[test]
    fn test_lookup1_values() {
        assert_eq!(lookup1_values(9, 2), 3);
        assert_eq!(lookup1_values(10, 2), 3);
        assert_eq!(lookup1_values(16, 2), 4);
        assert_eq!(lookup1_values(8, 3), 2);
        assert_eq!(lookup1_values(1, 4), 1);
    }

    /// 构建一个完整的 codebook 头部位流再解析
    #[test]
    fn test_codebook_解析含查找表() {
        let mut w = BitWriter::new();
        w.write_bits(0x564342, 24);
        w.write_bits(2, 16); // dimensions
        w.write_bits(4, 24); // entries
        w.write_bit(0); // 非 ordered
        w.write_bit(0); // 非 sparse
        for _ in 0..4 {
            w.write_bits(1, 5); // 码长 2
        }
        w.write_bits(1, 4); // lookup type 1
        w.write_bits(788 << 21, 32); // minimum = 0.0 (尾数 0)
        w.write_bits(1 | (788 << 21), 32); // delta = 1.0
        w.write_bits(1, 4); // value_bits = 2
        w.write_bit(0); // sequence_p
        // quant_count = lookup1_values(4, 2) = 2
        w.write_bits(1, 2);
        w.write_bits(2, 2);

        let mut p = Packet::from_data(w.finish());
        let book = Codebook::parse(&mut p).expect("解析失败");
        assert_eq!(book.dimensions(), 2);
        assert_eq!(book.entries(), 4);
        assert!(book.has_lookup());
        // mults = [1.0, 2.0]; entry e 的第 d 维 = mults[(e / 2^d) % 2]
        assert_eq!(book.vq_vector(0).unwrap(), &[1.0, 1.0]);
        assert_eq!(book.vq_vector(1).unwrap(), &[2.0, 1.0]);
        assert_eq!(book.vq_vector(2).unwrap(), &[1.0, 2.0]);
        assert_eq!(book.vq_vector(3).unwrap(), &[2.0, 2.0]);
    }

    #[test]
    fn test_codebook_拒绝坏同步字() {
        let mut w = BitWriter::new();
        w.write_bits(0x123456, 24);
        let mut p = Packet::from_data(w.finish());
        assert!(Codebook::parse(&mut p).is_err());
    }
}
