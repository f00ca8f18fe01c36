//! Vorbis 头包解析 (identification 与 comment).
//!
//! setup 头包的解析见 [`super::setup`].

use xun_core::{XunError, XunResult};

use crate::packet::Packet;

/// 头包类型字节后的魔数
pub(crate) const VORBIS_MAGIC: &[u8; 6] = b"vorbis";

/// identification 头信息
#[derive(Debug, Clone)]
pub struct IdentHeader {
    /// 声道数
    pub channels: usize,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 比特率上界 (bit/s, 0 表示未声明)
    pub bitrate_upper: i32,
    /// 标称比特率
    pub bitrate_nominal: i32,
    /// 比特率下界
    pub bitrate_lower: i32,
    /// 短块长度 (样本数, 2 的幂)
    pub blocksize0: usize,
    /// 长块长度 (样本数, 2 的幂, 不小于短块)
    pub blocksize1: usize,
}

/// 校验头包类型字节与 "vorbis" 魔数
pub(crate) fn expect_header_magic(packet: &mut Packet, kind: u8) -> XunResult<()> {
    let mut head = [0u8; 7];
    if packet.read_bytes(&mut head) != head.len() {
        return Err(XunError::HeaderMalformed("头包长度不足".into()));
    }
    if head[0] != kind || &head[1..7] != VORBIS_MAGIC {
        return Err(XunError::HeaderMalformed(format!(
            "头包标识无效 (期望类型 0x{kind:02X})",
        )));
    }
    Ok(())
}

/// 解析 identification 头包
pub(crate) fn parse_identification(packet: &mut Packet) -> XunResult<IdentHeader> {
    expect_header_magic(packet, 0x01)?;

    let version = packet.read_bits(32) as u32;
    if version != 0 {
        return Err(XunError::HeaderMalformed(format!(
            "Vorbis 版本不支持: {version}",
        )));
    }

    let channels = packet.read_bits(8) as usize;
    if channels == 0 {
        return Err(XunError::HeaderMalformed("声道数不能为 0".into()));
    }

    let sample_rate = packet.read_bits(32) as u32;
    if sample_rate == 0 {
        return Err(XunError::HeaderMalformed("采样率不能为 0".into()));
    }

    let bitrate_upper = packet.read_bits(32) as i32;
    let bitrate_nominal = packet.read_bits(32) as i32;
    let bitrate_lower = packet.read_bits(32) as i32;

    let bs0_exp = packet.read_bits(4) as u32;
    let bs1_exp = packet.read_bits(4) as u32;
    if !(6..=13).contains(&bs0_exp) || !(6..=13).contains(&bs1_exp) || bs1_exp < bs0_exp {
        return Err(XunError::HeaderMalformed(format!(
            "blocksize 非法: bs0_exp={bs0_exp}, bs1_exp={bs1_exp}",
        )));
    }

    if !packet.read_bit() || packet.is_short() {
        return Err(XunError::HeaderMalformed(
            "identification 头包 framing 位非法".into(),
        ));
    }

    Ok(IdentHeader {
        channels,
        sample_rate,
        bitrate_upper,
        bitrate_nominal,
        bitrate_lower,
        blocksize0: 1usize << bs0_exp,
        blocksize1: 1usize << bs1_exp,
    })
}

/// comment 头信息 (vendor 字符串与用户标签)
#[derive(Debug, Clone, Default)]
pub struct CommentHeader {
    /// 编码器 vendor 字符串
    pub vendor: String,
    /// 用户标签, 形如 "TITLE=xxx" 的原始条目
    pub user_comments: Vec<String>,
}

impl CommentHeader {
    /// 按标签名查找全部取值 (名称按 ASCII 大小写不敏感匹配)
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.user_comments
            .iter()
            .filter_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                key.eq_ignore_ascii_case(name).then_some(value)
            })
            .collect()
    }
}

/// 解析 comment 头包
pub(crate) fn parse_comment(packet: &mut Packet) -> XunResult<CommentHeader> {
    expect_header_magic(packet, 0x03)?;

    let vendor = read_length_prefixed_string(packet, "vendor 字段")?;
    let count = packet.read_bits(32) as usize;
    let mut user_comments = Vec::new();
    for _ in 0..count {
        user_comments.push(read_length_prefixed_string(packet, "comment 项")?);
    }

    if !packet.read_bit() || packet.is_short() {
        return Err(XunError::HeaderMalformed(
            "comment 头包 framing 位非法".into(),
        ));
    }

    Ok(CommentHeader {
        vendor,
        user_comments,
    })
}

fn read_length_prefixed_string(packet: &mut Packet, what: &str) -> XunResult<String> {
    let len = packet.read_bits(32) as usize;
    if len as u64 * 8 > packet.bits_remaining() {
        return Err(XunError::HeaderMalformed(format!(
            "{what} 长度越界: {len}",
        )));
    }
    let mut buf = vec![0u8; len];
    packet.read_bytes(&mut buf);
    // 非法 UTF-8 按替换字符宽松处理, 不让标签内容影响解码
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// 已知的非 Vorbis 码流魔数
const KNOWN_MAGICS: &[(&[u8], &str)] = &[
    (b"OpusHead", "OPUS"),
    (b"Speex   ", "Speex"),
    (b"fishead\0", "Ogg Skeleton"),
    (b"\x80theora", "Theora"),
];

/// 识别首包是否属于其他已知编码, 返回编码名称
pub(crate) fn sniff_other_codec(head: &[u8]) -> Option<&'static str> {
    for &(magic, name) in KNOWN_MAGICS {
        if head.len() >= magic.len() && &head[..magic.len()] == magic {
            return Some(name);
        }
    }
    if head.first() == Some(&0x7F) {
        return Some("FLAC");
    }
    None
}
