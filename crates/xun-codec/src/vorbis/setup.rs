//! Vorbis setup 头包解析.
//!
//! 产出解码全程使用的配置表: codebook, floor, residue, mapping, mode.
//! 所有索引在此交叉校验, 之后的音频包解码不再怀疑配置.

use xun_core::{XunError, XunResult};

use crate::packet::Packet;

use super::codebook::Codebook;
use super::floor::Floor;
use super::headers::expect_header_magic;
use super::ilog;
use super::residue::ResidueConfig;

/// 子映射: 一组声道共享的 floor 与 residue
#[derive(Debug)]
pub(crate) struct SubmapConfig {
    pub(crate) floor: usize,
    pub(crate) residue: usize,
}

/// mapping 配置
#[derive(Debug)]
pub(crate) struct MappingConfig {
    /// (幅度声道, 角度声道) 耦合对
    pub(crate) couplings: Vec<(usize, usize)>,
    /// 声道到子映射的分配
    pub(crate) channel_mux: Vec<usize>,
    pub(crate) submaps: Vec<SubmapConfig>,
}

/// mode 配置
#[derive(Debug)]
pub(crate) struct ModeConfig {
    /// false 用短块, true 用长块
    pub(crate) block_flag: bool,
    pub(crate) mapping: usize,
}

/// setup 头包的全部解析结果
#[derive(Debug)]
pub(crate) struct SetupData {
    pub(crate) codebooks: Vec<Codebook>,
    pub(crate) floors: Vec<Floor>,
    pub(crate) residues: Vec<ResidueConfig>,
    pub(crate) mappings: Vec<MappingConfig>,
    pub(crate) modes: Vec<ModeConfig>,
}

/// 解析 setup 头包
pub(crate) fn parse_setup(
    packet: &mut Packet,
    channels: usize,
    blocksizes: (usize, usize),
) -> XunResult<SetupData> {
    expect_header_magic(packet, 0x05)?;

    let codebook_count = packet.read_bits(8) as usize + 1;
    let mut codebooks = Vec::with_capacity(codebook_count);
    for _ in 0..codebook_count {
        codebooks.push(Codebook::parse(packet)?);
    }

    skip_time_domain_transforms(packet)?;

    let floor_count = packet.read_bits(6) as usize + 1;
    let mut floors = Vec::with_capacity(floor_count);
    for _ in 0..floor_count {
        floors.push(Floor::parse(packet, &codebooks, blocksizes)?);
    }

    let residue_count = packet.read_bits(6) as usize + 1;
    let mut residues = Vec::with_capacity(residue_count);
    for _ in 0..residue_count {
        residues.push(ResidueConfig::parse(packet, &codebooks)?);
    }

    let mapping_count = packet.read_bits(6) as usize + 1;
    let mut mappings = Vec::with_capacity(mapping_count);
    for _ in 0..mapping_count {
        mappings.push(parse_mapping(
            packet,
            channels,
            floors.len(),
            residues.len(),
        )?);
    }

    let mode_count = packet.read_bits(6) as usize + 1;
    let mut modes = Vec::with_capacity(mode_count);
    for _ in 0..mode_count {
        modes.push(parse_mode(packet, mappings.len())?);
    }

    if !packet.read_bit() || packet.is_short() {
        return Err(XunError::HeaderMalformed(
            "setup 头包 framing 位非法".into(),
        ));
    }

    Ok(SetupData {
        codebooks,
        floors,
        residues,
        mappings,
        modes,
    })
}

/// 过时的时域变换列表, 每项 16 位且必须为 0
fn skip_time_domain_transforms(packet: &mut Packet) -> XunResult<()> {
    let count = packet.read_bits(6) + 1;
    for _ in 0..count {
        if packet.read_bits(16) != 0 {
            return Err(XunError::HeaderMalformed(
                "时域变换字段必须为 0".into(),
            ));
        }
    }
    Ok(())
}

fn parse_mapping(
    packet: &mut Packet,
    channels: usize,
    floor_count: usize,
    residue_count: usize,
) -> XunResult<MappingConfig> {
    if packet.read_bits(16) != 0 {
        return Err(XunError::HeaderMalformed("mapping 类型不支持".into()));
    }

    let submap_count = if packet.read_bit() {
        packet.read_bits(4) as usize + 1
    } else {
        1
    };

    let couplings = if packet.read_bit() {
        let steps = packet.read_bits(8) as usize + 1;
        let bits = ilog(channels as u32 - 1);
        let mut couplings = Vec::with_capacity(steps);
        for _ in 0..steps {
            let magnitude = packet.read_bits(bits) as usize;
            let angle = packet.read_bits(bits) as usize;
            if magnitude == angle || magnitude >= channels || angle >= channels {
                return Err(XunError::HeaderMalformed(
                    "耦合声道对非法".into(),
                ));
            }
            couplings.push((magnitude, angle));
        }
        couplings
    } else {
        Vec::new()
    };

    if packet.read_bits(2) != 0 {
        return Err(XunError::HeaderMalformed(
            "mapping 保留位必须为 0".into(),
        ));
    }

    let channel_mux = if submap_count > 1 {
        let mut mux = Vec::with_capacity(channels);
        for _ in 0..channels {
            let submap = packet.read_bits(4) as usize;
            if submap >= submap_count {
                return Err(XunError::HeaderMalformed(
                    "mapping mux 值越界".into(),
                ));
            }
            mux.push(submap);
        }
        mux
    } else {
        vec![0; channels]
    };

    let mut submaps = Vec::with_capacity(submap_count);
    for _ in 0..submap_count {
        // 时域配置残留字段, 弃用
        packet.read_bits(8);
        let floor = packet.read_bits(8) as usize;
        let residue = packet.read_bits(8) as usize;
        if floor >= floor_count || residue >= residue_count {
            return Err(XunError::HeaderMalformed(
                "mapping floor/residue 索引越界".into(),
            ));
        }
        submaps.push(SubmapConfig { floor, residue });
    }

    Ok(MappingConfig {
        couplings,
        channel_mux,
        submaps,
    })
}

fn parse_mode(packet: &mut Packet, mapping_count: usize) -> XunResult<ModeConfig> {
    let block_flag = packet.read_bit();
    let window_type = packet.read_bits(16);
    let transform_type = packet.read_bits(16);
    if window_type != 0 || transform_type != 0 {
        return Err(XunError::HeaderMalformed(
            "mode window/transform 类型必须为 0".into(),
        ));
    }
    let mapping = packet.read_bits(8) as usize;
    if mapping >= mapping_count {
        return Err(XunError::HeaderMalformed("mode mapping 索引越界".into()));
    }
    Ok(ModeConfig {
        block_flag,
        mapping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xun_core::BitWriter;

    /// 最小可解析的 setup 头包: 单 codebook, floor1, residue1, 无耦合
    fn build_minimal_setup() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(0x05, 8);
        w.write_bytes(b"vorbis");

        // 1 个 codebook: 两条目等长码, 无查找表
        w.write_bits(0, 8);
        w.write_bits(0x564342, 24);
        w.write_bits(1, 16);
        w.write_bits(2, 24);
        w.write_bit(0); // 非 ordered
        w.write_bit(0); // 非 sparse
        w.write_bits(0, 5);
        w.write_bits(0, 5);
        w.write_bits(0, 4); // lookup type 0

        // 时域变换
        w.write_bits(0, 6);
        w.write_bits(0, 16);

        // 1 个 floor, 类型 1
        w.write_bits(0, 6);
        w.write_bits(1, 16);
        w.write_bits(1, 5); // partitions = 1
        w.write_bits(0, 4); // class 0
        w.write_bits(0, 3); // class dim = 1
        w.write_bits(0, 2); // subclass bits = 0
        w.write_bits(0, 8); // subclass book: 无
        w.write_bits(0, 2); // multiplier = 1
        w.write_bits(6, 4); // rangebits
        w.write_bits(32, 6); // 1 个 posit X 值

        // 1 个 residue, 类型 1
        w.write_bits(0, 6);
        w.write_bits(1, 16);
        w.write_bits(0, 24); // begin
        w.write_bits(32, 24); // end
        w.write_bits(15, 24); // partition_size = 16
        w.write_bits(0, 6); // 1 类
        w.write_bits(0, 8); // classbook 0
        w.write_bits(0, 3); // cascade low
        w.write_bit(0); // 无 high bits

        // 1 个 mapping
        w.write_bits(0, 6);
        w.write_bits(0, 16);
        w.write_bit(0); // 单 submap
        w.write_bit(0); // 无耦合
        w.write_bits(0, 2); // 保留位
        w.write_bits(0, 8); // time
        w.write_bits(0, 8); // floor
        w.write_bits(0, 8); // residue

        // 1 个 mode
        w.write_bits(0, 6);
        w.write_bit(0); // 短块
        w.write_bits(0, 16);
        w.write_bits(0, 16);
        w.write_bits(0, 8);

        w.write_bit(1); // framing
        w.finish()
    }

    #[test]
    fn test_parse_setup_最小配置() {
        let mut p = Packet::from_data(build_minimal_setup());
        let setup = parse_setup(&mut p, 2, (256, 256)).expect("解析失败");
        assert_eq!(setup.codebooks.len(), 1);
        assert_eq!(setup.floors.len(), 1);
        assert_eq!(setup.residues.len(), 1);
        assert_eq!(setup.mappings.len(), 1);
        assert_eq!(setup.modes.len(), 1);
        assert!(!setup.modes[0].block_flag);
        assert_eq!(setup.mappings[0].channel_mux, vec![0, 0]);
    }

    #[test]
    fn test_parse_setup_framing缺失报错() {
        let mut data = build_minimal_setup();
        // framing 位是最后一个有效位, 清掉它
        let last = data.len() - 1;
        data[last] = 0;
        let mut p = Packet::from_data(data);
        assert!(parse_setup(&mut p, 2, (256, 256)).is_err());
    }

    #[test]
    fn test_parse_setup_时域变换非零报错() {
        let mut w = BitWriter::new();
        w.write_bits(0x05, 8);
        w.write_bytes(b"vorbis");
        w.write_bits(0, 8);
        w.write_bits(0x564342, 24);
        w.write_bits(1, 16);
        w.write_bits(2, 24);
        w.write_bit(0);
        w.write_bit(0);
        w.write_bits(0, 5);
        w.write_bits(0, 5);
        w.write_bits(0, 4);
        w.write_bits(0, 6);
        w.write_bits(7, 16); // 非法
        let mut p = Packet::from_data(w.finish());
        assert!(parse_setup(&mut p, 2, (256, 256)).is_err());
    }
}
