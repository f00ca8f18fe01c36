//! # xun-codec
//!
//! Xun 解码框架的 Vorbis 解码器库.
//!
//! 本 crate 实现 Vorbis I 音频合成管线: 位级包解析, codebook
//! (Huffman + 矢量量化) 解码, floor 与 residue 恢复, 声道耦合,
//! 逆 MDCT 与加窗, 以及跨包边界的重叠相加状态机. 容器层 (如 Ogg
//! 页面解析) 不在本 crate 范围内, 由实现了
//! [`PacketProvider`] 的协作者按顺序交付包.
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use xun_codec::{MemoryPacketProvider, VorbisDecoder};
//!
//! let provider = MemoryPacketProvider::new(); // 由容器层填充包
//! let mut decoder = VorbisDecoder::new(Box::new(provider)).unwrap();
//!
//! let channels = decoder.channels();
//! let mut pcm = vec![0.0f32; 4096 * channels];
//! loop {
//!     let frames = decoder.read(&mut pcm, 0, pcm.len()).unwrap();
//!     if frames == 0 {
//!         break;
//!     }
//!     // 使用 pcm[..frames * channels] 中的交错样本
//! }
//! ```

pub mod packet;
pub mod provider;
pub mod stats;
pub mod vorbis;

// 重导出常用类型
pub use packet::Packet;
pub use provider::{MemoryPacketProvider, PacketProvider};
pub use stats::{StatsSnapshot, StreamStats};
pub use vorbis::{SeekOrigin, VorbisDecoder};
