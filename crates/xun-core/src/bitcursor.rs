//! Vorbis 位序的比特流读取游标.
//!
//! 按 Vorbis 位打包约定提取比特: 每个字节内从最低位 (bit 0) 开始消费,
//! 多比特字段的低位来自靠前的字节位置. 与编码侧的
//! [`BitWriter`](crate::bitwriter::BitWriter) 位序一致.
//!
//! 读取越过数据末尾不报错: 缺失部分按 0 补齐, 同时置内部 short 标志,
//! 调用方依赖该标志而非错误返回值.

use bytes::Bytes;

/// 比特流读取游标
///
/// 数据以若干 [`Bytes`] 分段的形式持有 (分段间逻辑上连续). 内部使用
/// 64 位累加器缓存待读比特; 当累加器装满时, 最多 8 个额外比特暂存于
/// 单字节溢出寄存器.
#[derive(Debug, Clone)]
pub struct BitCursor {
    segments: Vec<Bytes>,
    seg_index: usize,
    byte_index: usize,
    acc: u64,
    acc_bits: u32,
    overflow: u8,
    overflow_bits: u32,
    bits_read: u64,
    total_bits: u64,
    short: bool,
}

impl BitCursor {
    /// 基于分段字节序列创建游标
    pub fn new(segments: Vec<Bytes>) -> Self {
        let total_bits = segments.iter().map(|s| s.len() as u64 * 8).sum();
        Self {
            segments,
            seg_index: 0,
            byte_index: 0,
            acc: 0,
            acc_bits: 0,
            overflow: 0,
            overflow_bits: 0,
            bits_read: 0,
            total_bits,
            short: false,
        }
    }

    /// 基于单段连续数据创建游标
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self::new(vec![data.into()])
    }

    /// 预读至多 `count` 个比特 (不前移游标), `read` 返回实际可得的比特数
    ///
    /// 数据不足时返回值的高位按 0 补齐, 不置 short 标志 (由实际消费方置).
    pub fn peek_bits(&mut self, count: u32, read: &mut u32) -> u64 {
        debug_assert!(count <= 64);
        if count == 0 {
            *read = 0;
            return 0;
        }
        self.refill(count);
        *read = count.min(self.acc_bits);
        self.acc & low_mask(*read)
    }

    /// 读取 `count` 个比特 (`count` 不超过 64)
    pub fn read_bits(&mut self, count: u32) -> u64 {
        let mut got = 0;
        let value = self.peek_bits(count, &mut got);
        self.consume(count);
        value
    }

    /// 读取单个比特
    pub fn read_bit(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    /// 跳过 `count` 个比特
    pub fn skip_bits(&mut self, mut count: u64) {
        while count > 64 {
            self.consume(64);
            count -= 64;
        }
        self.consume(count as u32);
    }

    /// 按整字节读取, 返回完整读出的字节数
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        for (i, slot) in buf.iter_mut().enumerate() {
            let mut got = 0;
            let value = self.peek_bits(8, &mut got);
            if got < 8 {
                self.consume(got);
                self.short = true;
                return i;
            }
            self.consume(8);
            *slot = value as u8;
        }
        buf.len()
    }

    /// 重置游标到偏移 0, 清除 short 标志与统计
    pub fn reset(&mut self) {
        self.seg_index = 0;
        self.byte_index = 0;
        self.acc = 0;
        self.acc_bits = 0;
        self.overflow = 0;
        self.overflow_bits = 0;
        self.bits_read = 0;
        self.short = false;
    }

    /// 已消费的比特数
    pub fn bits_read(&self) -> u64 {
        self.bits_read
    }

    /// 数据总比特数
    pub fn total_bits(&self) -> u64 {
        self.total_bits
    }

    /// 剩余可读比特数
    pub fn bits_remaining(&self) -> u64 {
        self.total_bits - self.bits_read
    }

    /// 是否发生过越界读取
    pub fn is_short(&self) -> bool {
        self.short
    }

    fn next_byte(&mut self) -> Option<u8> {
        while self.seg_index < self.segments.len() {
            let seg = &self.segments[self.seg_index];
            if self.byte_index < seg.len() {
                let b = seg[self.byte_index];
                self.byte_index += 1;
                return Some(b);
            }
            self.seg_index += 1;
            self.byte_index = 0;
        }
        None
    }

    /// 补充累加器至至少 `want` 个比特 (数据不足时提前停止)
    fn refill(&mut self, want: u32) {
        while self.acc_bits < want {
            if self.overflow_bits > 0 {
                let take = (64 - self.acc_bits).min(self.overflow_bits);
                self.acc |= u64::from(self.overflow & low_mask8(take)) << self.acc_bits;
                self.overflow >>= take;
                self.overflow_bits -= take;
                self.acc_bits += take;
                continue;
            }
            let Some(b) = self.next_byte() else {
                return;
            };
            let space = 64 - self.acc_bits;
            if space >= 8 {
                self.acc |= u64::from(b) << self.acc_bits;
                self.acc_bits += 8;
            } else {
                // 累加器即将装满, 放不下的高位进溢出寄存器
                self.acc |= u64::from(b & low_mask8(space)) << self.acc_bits;
                self.overflow = b >> space;
                self.overflow_bits = 8 - space;
                self.acc_bits = 64;
            }
        }
    }

    /// 消费 `count` 个比特, 不足时置 short 标志
    fn consume(&mut self, count: u32) {
        if count == 0 {
            return;
        }
        self.refill(count);
        let take = count.min(self.acc_bits);
        if take < count {
            self.short = true;
        }
        if take >= 64 {
            self.acc = 0;
        } else {
            self.acc >>= take;
        }
        self.acc_bits -= take;
        self.bits_read += u64::from(take);
    }
}

fn low_mask(count: u32) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

fn low_mask8(count: u32) -> u8 {
    debug_assert!(count <= 8);
    if count >= 8 { 0xFF } else { (1u8 << count) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitwriter::BitWriter;

    #[test]
    fn test_bitcursor_位序() {
        let mut c = BitCursor::from_data(vec![0b1011_0010]);
        assert_eq!(c.read_bits(1), 0);
        assert_eq!(c.read_bits(3), 0b001);
        assert_eq!(c.read_bits(4), 0b1011);
        assert!(!c.is_short());
        assert_eq!(c.bits_read(), 8);
    }

    #[test]
    fn test_bitcursor_跨字节与跨分段() {
        let segs = vec![
            Bytes::from_static(&[0b0010_0110, 0b0111_0011]),
            Bytes::from_static(&[0b0110_1001]),
        ];
        let mut c = BitCursor::new(segs);
        assert_eq!(c.read_bits(7), 0b0100110);
        assert_eq!(c.read_bits(5), 0b0_0110);
        assert_eq!(c.read_bits(4), 0b0111);
        assert_eq!(c.read_bits(4), 0b1001);
        assert_eq!(c.read_bits(4), 0b0110);
        assert_eq!(c.bits_remaining(), 0);
    }

    #[test]
    fn test_bitcursor_越界读取补零并置标志() {
        let mut c = BitCursor::from_data(vec![0xFF]);
        assert_eq!(c.read_bits(4), 0xF);
        assert_eq!(c.read_bits(8), 0x0F);
        assert!(c.is_short());
        // 后续读取持续返回 0
        assert_eq!(c.read_bits(16), 0);
    }

    #[test]
    fn test_bitcursor_64位读取经过溢出寄存器() {
        let data: Vec<u8> = (1u8..=10).collect();
        let mut c = BitCursor::from_data(data.clone());
        assert_eq!(c.read_bits(3), 0b001);
        // 跨 9 个字节的 64 位读取 (比特 3..67)
        let mut expect = 0u64;
        for (i, &b) in data.iter().take(8).enumerate() {
            expect |= u64::from(b) << (8 * i);
        }
        expect >>= 3;
        expect |= u64::from(data[8] & 0b111) << 61;
        assert_eq!(c.read_bits(64), expect);
        assert_eq!(c.bits_read(), 67);
        assert!(!c.is_short());
    }

    #[test]
    fn test_bitcursor_peek不前移() {
        let mut c = BitCursor::from_data(vec![0b1010_1100, 0b0000_0001]);
        let mut got = 0;
        assert_eq!(c.peek_bits(6, &mut got), 0b101100);
        assert_eq!(got, 6);
        assert_eq!(c.bits_read(), 0);
        assert_eq!(c.read_bits(6), 0b101100);
    }

    #[test]
    fn test_bitcursor_reset() {
        let mut c = BitCursor::from_data(vec![0xAB, 0xCD]);
        c.read_bits(13);
        c.read_bits(10);
        assert!(c.is_short());
        c.reset();
        assert!(!c.is_short());
        assert_eq!(c.bits_read(), 0);
        assert_eq!(c.read_bits(8), 0xAB);
    }

    #[test]
    fn test_bitcursor_读字节() {
        let mut c = BitCursor::from_data(vec![0x12, 0x34, 0x56]);
        c.read_bits(4);
        let mut buf = [0u8; 2];
        assert_eq!(c.read_bytes(&mut buf), 2);
        assert_eq!(buf, [0x41, 0x63]);
    }

    #[test]
    fn test_bitcursor_写读往返() {
        let fields: Vec<(u64, u32)> = vec![
            (0b1, 1),
            (0x2A, 6),
            (0, 3),
            (0xDEAD_BEEF, 32),
            (0x1FFFF, 17),
            (0x0123_4567_89AB_CDEF, 64),
            (5, 5),
        ];
        let mut w = BitWriter::new();
        for &(value, width) in &fields {
            w.write_bits(value, width);
        }
        let total: u64 = fields.iter().map(|&(_, w)| u64::from(w)).sum();
        assert_eq!(w.bits_written() as u64, total);

        let mut c = BitCursor::from_data(w.finish());
        for &(value, width) in &fields {
            assert_eq!(c.read_bits(width), value, "宽度 {} 的字段不一致", width);
        }
        assert_eq!(c.bits_read(), total);
        assert!(!c.is_short());
    }
}
