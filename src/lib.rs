//! # Xun (埙)
//!
//! 纯 Rust 实现的 Ogg/Vorbis 音频解码库.
//!
//! Xun 实现完整的 Vorbis I 合成管线: 位级包解析, codebook 解码,
//! floor/residue 恢复, 声道耦合, 逆 MDCT 与加窗, 以及跨包边界的
//! 重叠相加. 容器层 (Ogg 页面解析) 由实现了
//! [`codec::PacketProvider`] 的协作者承担.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use xun::codec::{MemoryPacketProvider, VorbisDecoder};
//!
//! let provider = MemoryPacketProvider::new(); // 由容器层填充包
//! let mut decoder = VorbisDecoder::new(Box::new(provider)).unwrap();
//! let mut pcm = vec![0.0f32; 4096 * decoder.channels()];
//! let len = pcm.len();
//! while decoder.read(&mut pcm, 0, len).unwrap() > 0 {
//!     // 消费交错浮点样本
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `xun-core` | 错误类型与比特流读写原语 |
//! | `xun-codec` | Vorbis 解码器与包提供者契约 |

/// 核心类型与比特流工具
pub use xun_core as core;

/// Vorbis 解码器框架
pub use xun_codec as codec;

/// 获取 Xun 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
