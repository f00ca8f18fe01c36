//! 集成测试共用的合成 Vorbis 流构建工具.
//!
//! 流参数固定为短长块均 256 样本, 单 mode, floor1 + residue1,
//! 两个 codebook (标量分类簿 + 二维 VQ 簿). 每个音频包 (首包除外)
//! 产出 128 帧. 音频包有两种: 全声道无能量的静音包, 以及 floor 拉平,
//! residue 前 32 个频点置 1 的有声包.

#![allow(dead_code)]

use xun::codec::{MemoryPacketProvider, Packet};
use xun::core::BitWriter;

/// 测试流的逻辑流序列号
pub const SERIAL: u32 = 0x0051_0874;
/// 块长 (两种块长相同)
pub const BLOCK: usize = 256;
/// 每个音频包产出的帧数 (首包除外)
pub const FRAMES_PER_PACKET: usize = BLOCK / 2;

pub fn make_packet(data: Vec<u8>) -> Packet {
    let mut p = Packet::from_data(data);
    p.stream_serial = SERIAL;
    p
}

pub fn ident_bytes(channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut v = Vec::new();
    v.push(0x01);
    v.extend_from_slice(b"vorbis");
    v.extend_from_slice(&0u32.to_le_bytes());
    v.push(channels);
    v.extend_from_slice(&sample_rate.to_le_bytes());
    v.extend_from_slice(&0i32.to_le_bytes());
    v.extend_from_slice(&96_000i32.to_le_bytes());
    v.extend_from_slice(&0i32.to_le_bytes());
    // 两种块长均为 2^8
    v.push(8 | (8 << 4));
    v.push(1);
    v
}

pub fn comment_bytes() -> Vec<u8> {
    let mut v = Vec::new();
    v.push(0x03);
    v.extend_from_slice(b"vorbis");
    let vendor = b"xun synthetic stream";
    v.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    v.extend_from_slice(vendor);
    v.extend_from_slice(&1u32.to_le_bytes());
    let tag = b"TITLE=silence";
    v.extend_from_slice(&(tag.len() as u32).to_le_bytes());
    v.extend_from_slice(tag);
    v.push(1);
    v
}

/// setup 头包: 2 个 codebook, floor1, residue1, 单 mapping 单 mode
pub fn setup_bytes() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0x05, 8);
    w.write_bytes(b"vorbis");

    // 2 个 codebook
    w.write_bits(1, 8);

    // book0: 分类簿, 1 维 2 条目, 码长均 1, 无查找表
    w.write_bits(0x564342, 24);
    w.write_bits(1, 16);
    w.write_bits(2, 24);
    w.write_bit(0);
    w.write_bit(0);
    w.write_bits(0, 5);
    w.write_bits(0, 5);
    w.write_bits(0, 4);

    // book1: VQ 簿, 2 维 4 条目, 码长均 2, lookup type 1
    w.write_bits(0x564342, 24);
    w.write_bits(2, 16);
    w.write_bits(4, 24);
    w.write_bit(0);
    w.write_bit(0);
    for _ in 0..4 {
        w.write_bits(1, 5);
    }
    w.write_bits(1, 4);
    w.write_bits(788 << 21, 32); // minimum = 0.0
    w.write_bits(1 | (788 << 21), 32); // delta = 1.0
    w.write_bits(1, 4); // value_bits = 2
    w.write_bit(0); // sequence_p
    w.write_bits(1, 2); // 量化值: 1.0
    w.write_bits(2, 2); // 量化值: 2.0

    // 时域变换
    w.write_bits(0, 6);
    w.write_bits(0, 16);

    // floor1: 1 个分区, 类 0 (1 维, 无 subclass 簿)
    w.write_bits(0, 6);
    w.write_bits(1, 16);
    w.write_bits(1, 5);
    w.write_bits(0, 4);
    w.write_bits(0, 3);
    w.write_bits(0, 2);
    w.write_bits(0, 8);
    w.write_bits(0, 2); // multiplier = 1
    w.write_bits(6, 4); // rangebits
    w.write_bits(32, 6); // posit X = 32

    // residue1: 区间 [0, 32), 分区 16, 单分类, pass0 用 book1
    w.write_bits(0, 6);
    w.write_bits(1, 16);
    w.write_bits(0, 24);
    w.write_bits(32, 24);
    w.write_bits(15, 24);
    w.write_bits(0, 6);
    w.write_bits(0, 8);
    w.write_bits(1, 3); // cascade bit0
    w.write_bit(0);
    w.write_bits(1, 8); // pass0 book = book1

    // mapping: 单 submap, 无耦合
    w.write_bits(0, 6);
    w.write_bits(0, 16);
    w.write_bit(0);
    w.write_bit(0);
    w.write_bits(0, 2);
    w.write_bits(0, 8);
    w.write_bits(0, 8);
    w.write_bits(0, 8);

    // mode: 短块
    w.write_bits(0, 6);
    w.write_bit(0);
    w.write_bits(0, 16);
    w.write_bits(0, 16);
    w.write_bits(0, 8);

    w.write_bit(1);
    w.finish()
}

/// 全声道无能量的静音音频包
pub fn silent_audio_bytes(channels: usize) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bit(0);
    for _ in 0..channels {
        w.write_bit(0);
    }
    w.finish()
}

/// 有声音频包: floor 取平直曲线 (Y 值 `floor_y`), residue 前 32 个
/// 频点叠加 1.0
pub fn active_audio_bytes(channels: usize, floor_y: u64) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bit(0);
    for _ in 0..channels {
        w.write_bit(1);
        w.write_bits(floor_y, 8);
        w.write_bits(floor_y, 8);
    }
    // residue: 2 个分区, 每分区先各声道 1 位分类字, 再各声道 8 个
    // 二维向量 (条目 0, 码字 00)
    for _ in 0..2 {
        for _ in 0..channels {
            w.write_bit(0);
        }
        for _ in 0..channels {
            w.write_bits(0, 16);
        }
    }
    w.finish()
}

/// 三个头包
pub fn header_packets(channels: u8, sample_rate: u32) -> Vec<Packet> {
    vec![
        make_packet(ident_bytes(channels, sample_rate)),
        make_packet(comment_bytes()),
        make_packet(setup_bytes()),
    ]
}

/// 由音频包列表组装提供者 (头包自动前置)
pub fn provider_from_audio(
    channels: u8,
    sample_rate: u32,
    audio: Vec<Packet>,
) -> MemoryPacketProvider {
    let mut provider = MemoryPacketProvider::new();
    for p in header_packets(channels, sample_rate) {
        provider.push(p);
    }
    for p in audio {
        provider.push(p);
    }
    provider
}

/// 纯静音流: `audio_count` 个静音包, 末包携带 granule 并标记 EOS
pub fn silent_provider(
    channels: usize,
    sample_rate: u32,
    audio_count: usize,
    final_granule: i64,
) -> MemoryPacketProvider {
    let mut audio = Vec::with_capacity(audio_count);
    for i in 0..audio_count {
        let mut p = make_packet(silent_audio_bytes(channels));
        if i + 1 == audio_count {
            p.granule_position = Some(final_granule);
            p.is_end_of_stream = true;
        }
        audio.push(p);
    }
    provider_from_audio(channels as u8, sample_rate, audio)
}

/// 有声流: 全部为有声包, 末包携带 granule 并标记 EOS
pub fn active_provider(
    channels: usize,
    sample_rate: u32,
    audio_count: usize,
    floor_y: u64,
    final_granule: i64,
) -> MemoryPacketProvider {
    let mut audio = Vec::with_capacity(audio_count);
    for i in 0..audio_count {
        let mut p = make_packet(active_audio_bytes(channels, floor_y));
        if i + 1 == audio_count {
            p.granule_position = Some(final_granule);
            p.is_end_of_stream = true;
        }
        audio.push(p);
    }
    provider_from_audio(channels as u8, sample_rate, audio)
}
