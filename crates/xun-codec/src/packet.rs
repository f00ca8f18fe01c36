//! Vorbis 压缩数据包 (Packet).
//!
//! 表示容器层交付的一个完整 Vorbis 包: 不可变的字节内容加上 granule
//! 位置, EOS/resync 标志等元数据, 并暴露单调前移的位级读取游标
//! (仅能通过 [`reset`](Packet::reset) 回到偏移 0).

use bytes::Bytes;
use xun_core::BitCursor;

/// 压缩数据包
///
/// 字节内容以若干 [`Bytes`] 分段持有, 创建后不可变. 包级元数据由
/// 容器层在交付前填写.
#[derive(Debug, Clone)]
pub struct Packet {
    cursor: BitCursor,
    /// granule 位置 (该包完成的最后一个样本序号, 未携带时为 `None`)
    pub granule_position: Option<i64>,
    /// 是否为逻辑流的最后一个包
    pub is_end_of_stream: bool,
    /// 该包之前是否检测到数据间断 (重新同步)
    pub is_resync: bool,
    /// 容器层为交付该包付出的开销位数 (页头等)
    pub container_overhead_bits: u64,
    /// 所属逻辑流的序列号
    pub stream_serial: u32,
}

impl Packet {
    /// 基于分段字节序列创建包
    pub fn new(segments: Vec<Bytes>) -> Self {
        Self {
            cursor: BitCursor::new(segments),
            granule_position: None,
            is_end_of_stream: false,
            is_resync: false,
            container_overhead_bits: 0,
            stream_serial: 0,
        }
    }

    /// 基于单段连续数据创建包
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self::new(vec![data.into()])
    }

    /// 读取 `count` 个比特 (`count` 不超过 64), 越界部分补 0
    pub fn read_bits(&mut self, count: u32) -> u64 {
        self.cursor.read_bits(count)
    }

    /// 预读至多 `count` 个比特, `read` 返回实际可得的比特数
    pub fn peek_bits(&mut self, count: u32, read: &mut u32) -> u64 {
        self.cursor.peek_bits(count, read)
    }

    /// 跳过 `count` 个比特
    pub fn skip_bits(&mut self, count: u64) {
        self.cursor.skip_bits(count);
    }

    /// 读取单个比特
    pub fn read_bit(&mut self) -> bool {
        self.cursor.read_bit()
    }

    /// 按整字节读取, 返回完整读出的字节数
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        self.cursor.read_bytes(buf)
    }

    /// 重置读取游标到包起始处
    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    /// 已消费的比特数
    pub fn bits_read(&self) -> u64 {
        self.cursor.bits_read()
    }

    /// 包内容总比特数
    pub fn total_bits(&self) -> u64 {
        self.cursor.total_bits()
    }

    /// 剩余可读比特数
    pub fn bits_remaining(&self) -> u64 {
        self.cursor.bits_remaining()
    }

    /// 是否发生过越界读取
    pub fn is_short(&self) -> bool {
        self.cursor.is_short()
    }
}
