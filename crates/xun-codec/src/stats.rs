//! 解码统计.
//!
//! 解码线程逐包累计计数, 允许其他线程并发读取快照; 计数器由互斥锁
//! 保护. 这是解码器唯一可被外部线程访问的可变状态.

use std::sync::Mutex;

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// 已处理的包数
    pub packet_count: u64,
    /// 解码实际消费的位数
    pub audio_bits: u64,
    /// 包内未被消费的尾部位数
    pub waste_bits: u64,
    /// 容器层开销位数
    pub container_bits: u64,
}

/// 解码统计收集器
#[derive(Debug, Default)]
pub struct StreamStats {
    inner: Mutex<StatsSnapshot>,
}

impl StreamStats {
    /// 创建归零的收集器
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计一个包的读取情况
    pub fn add_packet(&self, audio_bits: u64, total_bits: u64, container_bits: u64) {
        let Ok(mut s) = self.inner.lock() else {
            return;
        };
        s.packet_count += 1;
        s.audio_bits += audio_bits;
        s.waste_bits += total_bits.saturating_sub(audio_bits);
        s.container_bits += container_bits;
    }

    /// 读取当前快照
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().map(|s| *s).unwrap_or_default()
    }

    /// 清零全部计数
    pub fn reset(&self) {
        if let Ok(mut s) = self.inner.lock() {
            *s = StatsSnapshot::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_stats_累计与快照() {
        let stats = StreamStats::new();
        stats.add_packet(100, 128, 16);
        stats.add_packet(50, 50, 8);
        let s = stats.snapshot();
        assert_eq!(s.packet_count, 2);
        assert_eq!(s.audio_bits, 150);
        assert_eq!(s.waste_bits, 28);
        assert_eq!(s.container_bits, 24);
    }

    #[test]
    fn test_stats_跨线程读取() {
        let stats = Arc::new(StreamStats::new());
        let reader = Arc::clone(&stats);
        let handle = std::thread::spawn(move || reader.snapshot().packet_count);
        stats.add_packet(1, 1, 0);
        handle.join().unwrap();
        assert!(stats.snapshot().packet_count >= 1);
    }
}
