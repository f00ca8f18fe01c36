//! 包提供者契约.
//!
//! 解码核心不解析 Ogg 页面; 它只消费实现了 [`PacketProvider`] 的协作者
//! 按顺序交付的 [`Packet`]. 页级 CRC 校验, 跨页包重组, 以及 seek 的
//! 粗粒度页面搜索都是提供者一侧的职责.

use xun_core::{XunError, XunResult};

use crate::packet::Packet;

/// seek 时用于估计单个包产出样本数的回调
///
/// 回调读取包头部少量比特后必须将包重置回偏移 0. 第二个参数指示该包
/// 是否为所在页的最后一个包.
pub type GranuleFn<'a> = &'a mut dyn FnMut(&mut Packet, bool) -> u64;

/// 包提供者 trait
///
/// 解码器通过该接口拉取包. 实现者保证包按逻辑流顺序交付, 并在包元数据
/// 中填写 granule 位置与 EOS/resync 标志.
pub trait PacketProvider {
    /// 预读下一个包 (不消费)
    fn peek_next(&mut self) -> Option<&Packet>;

    /// 取出下一个包, 流结束时返回 `None`
    fn get_next(&mut self) -> Option<Packet>;

    /// 页级 seek: 将交付位置回退到目标样本所在包之前 `preroll` 个包处
    ///
    /// `granule_fn` 用于估计每个音频包产出的样本数. 返回下一次解码
    /// (消费掉 `preroll` 个预滚包之后) 第一个产出样本的绝对序号.
    fn seek_to(
        &mut self,
        granule: u64,
        preroll: u32,
        granule_fn: GranuleFn<'_>,
    ) -> XunResult<u64>;

    /// 逻辑流总样本数
    fn granule_count(&mut self) -> XunResult<u64>;
}

/// 内存包提供者
///
/// 持有一组已经由容器层切分好的包, 按序交付. 交付的是内部包的副本
/// (字节分段共享, 游标归零), 因此可反复 seek 重放.
///
/// 约定: 前三个包为 Vorbis 头包, 其后均为音频包.
#[derive(Debug, Default)]
pub struct MemoryPacketProvider {
    packets: Vec<Packet>,
    next: usize,
}

/// 头包数量 (identification/comment/setup)
const HEADER_PACKETS: usize = 3;

impl MemoryPacketProvider {
    /// 创建空的提供者
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个包
    pub fn push(&mut self, packet: Packet) {
        self.packets.push(packet);
    }

    /// 包总数
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// 是否不含任何包
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl PacketProvider for MemoryPacketProvider {
    fn peek_next(&mut self) -> Option<&Packet> {
        self.packets.get(self.next)
    }

    fn get_next(&mut self) -> Option<Packet> {
        let mut packet = self.packets.get(self.next)?.clone();
        self.next += 1;
        packet.reset();
        Some(packet)
    }

    fn seek_to(
        &mut self,
        granule: u64,
        preroll: u32,
        granule_fn: GranuleFn<'_>,
    ) -> XunResult<u64> {
        if self.packets.len() <= HEADER_PACKETS {
            return Err(XunError::Internal("没有可用的音频包".into()));
        }

        // 首个音频包不产出样本, 从第二个音频包起逐包累计产出位置.
        let mut pos = 0u64;
        let mut target_index = None;
        for index in HEADER_PACKETS + 1..self.packets.len() {
            let mut probe = self.packets[index].clone();
            probe.reset();
            let count = granule_fn(&mut probe, true);
            if granule < pos + count {
                target_index = Some(index);
                break;
            }
            pos += count;
        }
        // 目标在流末尾之后时停在最后一个包上
        let target_index = target_index.unwrap_or(self.packets.len() - 1);

        self.next = target_index.saturating_sub(preroll as usize).max(HEADER_PACKETS);
        Ok(pos)
    }

    fn granule_count(&mut self) -> XunResult<u64> {
        let granule = self
            .packets
            .iter()
            .rev()
            .find_map(|p| p.granule_position)
            .unwrap_or(0);
        Ok(granule.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider(audio_packets: usize) -> MemoryPacketProvider {
        let mut p = MemoryPacketProvider::new();
        for i in 0..HEADER_PACKETS + audio_packets {
            p.push(Packet::from_data(vec![i as u8]));
        }
        p
    }

    #[test]
    fn test_memory_provider_顺序交付() {
        let mut p = make_provider(2);
        assert_eq!(p.len(), 5);
        for i in 0..5 {
            assert_eq!(p.peek_next().unwrap().total_bits(), 8);
            let mut packet = p.get_next().unwrap();
            assert_eq!(packet.read_bits(8), i as u64);
        }
        assert!(p.get_next().is_none());
    }

    #[test]
    fn test_memory_provider_seek定位到预滚包() {
        let mut p = make_provider(6);
        // 每个音频包产出 100 样本 (首包除外)
        let landed = p
            .seek_to(250, 1, &mut |_pkt, _last| 100)
            .unwrap();
        // 目标 250 落在第 4 个音频包 (产出区间 [200, 300)), 预滚一个包
        assert_eq!(landed, 200);
        let next = p.get_next().unwrap();
        assert_eq!(next.total_bits(), 8);
    }

    #[test]
    fn test_memory_provider_granule_count() {
        let mut p = make_provider(3);
        p.packets.last_mut().unwrap().granule_position = Some(12345);
        assert_eq!(p.granule_count().unwrap(), 12345);
    }
}
