//! 统一错误类型定义.
//!
//! 所有 Xun crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// Xun 框架统一错误类型
#[derive(Debug, Error)]
pub enum XunError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 码流不是 Vorbis (可能为其他已知编码格式)
    #[error("不是 Vorbis 码流: {0}")]
    NotVorbis(String),

    /// 头包非法 (标识错误, codebook 无效, framing 位缺失等), 构造阶段致命
    #[error("Vorbis 头包非法: {0}")]
    HeaderMalformed(String),

    /// 音频包损坏 (位流中途耗尽, 索引越界等), 解码器内部丢弃该包后继续
    #[error("音频包损坏: {0}")]
    PacketCorrupt(String),

    /// seek 目标超出有效范围
    #[error("seek 目标越界: 目标样本 {target}, 总样本数 {total}")]
    SeekOutOfRange {
        /// 请求的目标样本序号
        target: i64,
        /// 逻辑流总样本数
        total: i64,
    },

    /// seek 后无法取得恢复重叠状态所需的两个预滚包
    #[error("seek 预滚包获取失败")]
    SeekPreRollFailed,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Xun 框架统一 Result 类型
pub type XunResult<T> = Result<T, XunError>;
