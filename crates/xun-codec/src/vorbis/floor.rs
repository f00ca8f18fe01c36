//! Vorbis floor 解码: 每声道的频谱包络.
//!
//! 两种 floor 形式: floor 0 以 LSP 系数描述包络, 解码时在 bark 频标
//! 上求值; floor 1 以分段线性曲线描述, 解码时做整数画线. 两者最终都
//! 逐点乘入 residue 频谱.

use xun_core::{XunError, XunResult};

use crate::packet::Packet;

use super::codebook::Codebook;
use super::ilog;

/// floor 配置 (setup 头包中定义, 之后不可变)
#[derive(Debug)]
pub(crate) enum Floor {
    Lsp(Floor0),
    Piecewise(Floor1),
}

/// 单个音频包中一条声道的 floor 解码结果
#[derive(Debug, Clone)]
pub(crate) enum FloorData {
    /// 该声道本包无能量, 不参与后续解码
    Unused,
    /// floor 0: 幅度与 LSP 系数
    Lsp { amplitude: f64, coefficients: Vec<f32> },
    /// floor 1: 预测还原后的各 posit 绝对 Y 值与有效标记
    Points { ys: Vec<(i32, bool)> },
}

impl FloorData {
    pub(crate) fn is_unused(&self) -> bool {
        matches!(self, FloorData::Unused)
    }
}

impl Floor {
    /// 从 setup 头包解析一个 floor 配置
    pub(crate) fn parse(
        packet: &mut Packet,
        codebooks: &[Codebook],
        blocksizes: (usize, usize),
    ) -> XunResult<Self> {
        let floor_type = packet.read_bits(16);
        match floor_type {
            0 => Ok(Floor::Lsp(Floor0::parse(packet, codebooks, blocksizes)?)),
            1 => Ok(Floor::Piecewise(Floor1::parse(packet, codebooks)?)),
            other => Err(XunError::HeaderMalformed(format!(
                "floor 类型不支持: {other}",
            ))),
        }
    }

    /// 从音频包解出本声道的 floor 数据
    pub(crate) fn unpack(
        &self,
        packet: &mut Packet,
        codebooks: &[Codebook],
    ) -> XunResult<FloorData> {
        match self {
            Floor::Lsp(f) => f.unpack(packet, codebooks),
            Floor::Piecewise(f) => f.unpack(packet, codebooks),
        }
    }

    /// 将 floor 曲线逐点乘入频谱
    pub(crate) fn apply(&self, data: &FloorData, spectrum: &mut [f32]) {
        match (self, data) {
            (Floor::Lsp(f), FloorData::Lsp { amplitude, coefficients }) => {
                f.apply(*amplitude, coefficients, spectrum);
            }
            (Floor::Piecewise(f), FloorData::Points { ys }) => {
                f.apply(ys, spectrum);
            }
            _ => spectrum.fill(0.0),
        }
    }
}

/// floor 0 配置 (LSP 包络)
#[derive(Debug)]
pub(crate) struct Floor0 {
    order: usize,
    bark_map_size: usize,
    amplitude_bits: u32,
    amplitude_offset: u32,
    books: Vec<usize>,
    /// 两种块长各自的 bark 频标映射 (长度 blocksize/2)
    maps: [Vec<u32>; 2],
}

impl Floor0 {
    fn parse(
        packet: &mut Packet,
        codebooks: &[Codebook],
        blocksizes: (usize, usize),
    ) -> XunResult<Self> {
        let order = packet.read_bits(8) as usize;
        let rate = packet.read_bits(16) as u32;
        let bark_map_size = packet.read_bits(16) as usize;
        let amplitude_bits = packet.read_bits(6) as u32;
        let amplitude_offset = packet.read_bits(8) as u32;
        let book_count = packet.read_bits(4) as usize + 1;

        if order == 0 || rate == 0 || bark_map_size == 0 || amplitude_bits == 0 {
            return Err(XunError::HeaderMalformed("floor0 参数非法".into()));
        }

        let mut books = Vec::with_capacity(book_count);
        for _ in 0..book_count {
            let book = packet.read_bits(8) as usize;
            let Some(codebook) = codebooks.get(book) else {
                return Err(XunError::HeaderMalformed(
                    "floor0 book 索引越界".into(),
                ));
            };
            if !codebook.has_lookup() {
                return Err(XunError::HeaderMalformed(
                    "floor0 book 缺少 VQ 查找表".into(),
                ));
            }
            books.push(book);
        }
        if packet.is_short() {
            return Err(XunError::HeaderMalformed("floor0 配置读取越界".into()));
        }

        let maps = [
            Self::build_bark_map(rate, bark_map_size, blocksizes.0 / 2),
            Self::build_bark_map(rate, bark_map_size, blocksizes.1 / 2),
        ];

        Ok(Self {
            order,
            bark_map_size,
            amplitude_bits,
            amplitude_offset,
            books,
            maps,
        })
    }

    /// bark 频标映射: 把线性频点折算到 bark 曲线上的离散位置
    fn build_bark_map(rate: u32, bark_map_size: usize, n: usize) -> Vec<u32> {
        let scale = bark_map_size as f64 / bark(0.5 * rate as f64);
        (0..n)
            .map(|i| {
                let freq = rate as f64 * i as f64 / (2.0 * n as f64);
                let pos = (bark(freq) * scale).floor() as i64;
                pos.clamp(0, bark_map_size as i64 - 1) as u32
            })
            .collect()
    }

    fn unpack(&self, packet: &mut Packet, codebooks: &[Codebook]) -> XunResult<FloorData> {
        let amplitude = packet.read_bits(self.amplitude_bits);
        if packet.is_short() || amplitude == 0 {
            return Ok(FloorData::Unused);
        }

        let book_index = packet.read_bits(ilog(self.books.len() as u32)) as usize;
        if packet.is_short() {
            return Ok(FloorData::Unused);
        }
        let Some(&book) = self.books.get(book_index) else {
            return Err(XunError::PacketCorrupt(format!(
                "floor0 book 选择越界: {book_index}",
            )));
        };
        let book = &codebooks[book];

        let mut coefficients = Vec::with_capacity(self.order);
        let mut last = 0.0f32;
        while coefficients.len() < self.order {
            let Some(entry) = book.decode_scalar(packet) else {
                return Ok(FloorData::Unused);
            };
            let Some(vector) = book.vq_vector(entry as usize) else {
                return Err(XunError::PacketCorrupt("floor0 book 无查找表".into()));
            };
            for &v in vector {
                coefficients.push(v + last);
            }
            last = *coefficients.last().unwrap_or(&0.0);
        }
        coefficients.truncate(self.order);

        Ok(FloorData::Lsp {
            amplitude: amplitude as f64,
            coefficients,
        })
    }

    fn apply(&self, amplitude: f64, coefficients: &[f32], spectrum: &mut [f32]) {
        let n = spectrum.len();
        let map = if n == self.maps[0].len() {
            &self.maps[0]
        } else {
            &self.maps[1]
        };
        if map.len() < n {
            spectrum.fill(0.0);
            return;
        }

        let cos_coeffs: Vec<f64> = coefficients.iter().map(|&c| (c as f64).cos()).collect();
        let amp_offset = self.amplitude_offset as f64;
        let amp_scale = ((1u64 << self.amplitude_bits) - 1) as f64;

        let mut i = 0;
        while i < n {
            let m = map[i];
            let omega = std::f64::consts::PI * m as f64 / self.bark_map_size as f64;
            let cos_omega = omega.cos();

            // LSP 多项式在 cos(omega) 处的取值
            let mut p;
            let mut q;
            if self.order % 2 == 1 {
                p = 1.0 - cos_omega * cos_omega;
                q = 0.25;
                for j in 0..(self.order - 1) / 2 {
                    let d = cos_coeffs[2 * j + 1] - cos_omega;
                    p *= 4.0 * d * d;
                }
                for j in 0..(self.order + 1) / 2 {
                    let d = cos_coeffs[2 * j] - cos_omega;
                    q *= 4.0 * d * d;
                }
            } else {
                p = (1.0 - cos_omega) / 2.0;
                q = (1.0 + cos_omega) / 2.0;
                for j in 0..self.order / 2 {
                    let d = cos_coeffs[2 * j + 1] - cos_omega;
                    p *= 4.0 * d * d;
                    let d = cos_coeffs[2 * j] - cos_omega;
                    q *= 4.0 * d * d;
                }
            }

            let mut linear = (0.115_129_25
                * (amplitude * amp_offset / (amp_scale * (p + q).sqrt()) - amp_offset))
                .exp() as f32;
            if !linear.is_finite() {
                linear = 0.0;
            }

            while i < n && map[i] == m {
                spectrum[i] *= linear;
                i += 1;
            }
        }
    }
}

/// bark 频标函数
fn bark(x: f64) -> f64 {
    13.1 * (0.000_74 * x).atan() + 2.24 * (1.85e-8 * x * x).atan() + 1e-4 * x
}

/// floor 1 的分段类配置
#[derive(Debug)]
struct Floor1Class {
    dimensions: usize,
    subclass_bits: u32,
    master_book: Option<usize>,
    subclass_books: Vec<Option<usize>>,
}

/// floor 1 配置 (分段线性包络)
#[derive(Debug)]
pub(crate) struct Floor1 {
    partition_classes: Vec<usize>,
    classes: Vec<Floor1Class>,
    multiplier: i32,
    range: i32,
    x_list: Vec<u16>,
    /// 按 X 值升序排列的 posit 序号
    sorted_order: Vec<usize>,
    /// posit i (i >= 2) 的低/高邻居序号
    neighbors: Vec<(usize, usize)>,
}

impl Floor1 {
    fn parse(packet: &mut Packet, codebooks: &[Codebook]) -> XunResult<Self> {
        let partition_count = packet.read_bits(5) as usize;
        let mut partition_classes = Vec::with_capacity(partition_count);
        let mut max_class = -1i32;
        for _ in 0..partition_count {
            let class = packet.read_bits(4) as i32;
            max_class = max_class.max(class);
            partition_classes.push(class as usize);
        }

        let mut classes = Vec::with_capacity((max_class + 1) as usize);
        for _ in 0..max_class + 1 {
            let dimensions = packet.read_bits(3) as usize + 1;
            let subclass_bits = packet.read_bits(2) as u32;
            let master_book = if subclass_bits != 0 {
                let book = packet.read_bits(8) as usize;
                if book >= codebooks.len() {
                    return Err(XunError::HeaderMalformed(
                        "floor1 master book 索引越界".into(),
                    ));
                }
                Some(book)
            } else {
                None
            };
            let subclass_count = 1usize << subclass_bits;
            let mut subclass_books = Vec::with_capacity(subclass_count);
            for _ in 0..subclass_count {
                let book = match packet.read_bits(8) as usize {
                    0 => None,
                    index => {
                        let index = index - 1;
                        if index >= codebooks.len() {
                            return Err(XunError::HeaderMalformed(
                                "floor1 subclass book 索引越界".into(),
                            ));
                        }
                        Some(index)
                    }
                };
                subclass_books.push(book);
            }
            classes.push(Floor1Class {
                dimensions,
                subclass_bits,
                master_book,
                subclass_books,
            });
        }

        let multiplier = packet.read_bits(2) as i32 + 1;
        let range = [256, 128, 86, 64][multiplier as usize - 1];
        let rangebits = packet.read_bits(4) as u32;

        let mut x_list: Vec<u16> = vec![0, 1 << rangebits];
        for &class in &partition_classes {
            for _ in 0..classes[class].dimensions {
                if x_list.len() >= 65 {
                    return Err(XunError::HeaderMalformed(
                        "floor1 X 列表元素过多".into(),
                    ));
                }
                x_list.push(packet.read_bits(rangebits) as u16);
            }
        }
        if packet.is_short() {
            return Err(XunError::HeaderMalformed("floor1 配置读取越界".into()));
        }

        let mut sorted_order: Vec<usize> = (0..x_list.len()).collect();
        sorted_order.sort_by_key(|&i| x_list[i]);
        for pair in sorted_order.windows(2) {
            if x_list[pair[0]] == x_list[pair[1]] {
                return Err(XunError::HeaderMalformed(
                    "floor1 X 列表包含重复值".into(),
                ));
            }
        }

        let neighbors = (2..x_list.len())
            .map(|i| find_neighbors(&x_list, i))
            .collect();

        Ok(Self {
            partition_classes,
            classes,
            multiplier,
            range,
            x_list,
            sorted_order,
            neighbors,
        })
    }

    fn unpack(&self, packet: &mut Packet, codebooks: &[Codebook]) -> XunResult<FloorData> {
        let non_zero = packet.read_bit();
        if packet.is_short() || !non_zero {
            return Ok(FloorData::Unused);
        }

        let y_bits = ilog(self.range as u32 - 1);
        let mut ys: Vec<(i32, bool)> = Vec::with_capacity(self.x_list.len());
        ys.push((packet.read_bits(y_bits) as i32, true));
        ys.push((packet.read_bits(y_bits) as i32, true));
        if packet.is_short() {
            return Ok(FloorData::Unused);
        }

        for &class_index in &self.partition_classes {
            let class = &self.classes[class_index];
            let cbits = class.subclass_bits;
            let csub = (1usize << cbits) - 1;
            let mut cval = match class.master_book {
                Some(book) => match codebooks[book].decode_scalar(packet) {
                    Some(v) => v as usize,
                    None => return Ok(FloorData::Unused),
                },
                None => 0,
            };
            for _ in 0..class.dimensions {
                let book = class.subclass_books[cval & csub];
                cval >>= cbits;
                let y = match book {
                    Some(book) => match codebooks[book].decode_scalar(packet) {
                        Some(v) => v as i32,
                        None => return Ok(FloorData::Unused),
                    },
                    None => 0,
                };
                ys.push((y, true));
            }
        }

        self.resolve_predictions(&mut ys);
        Ok(FloorData::Points { ys })
    }

    /// 把编码残差折算回绝对 Y 值 (基于两侧已解码邻居的线性预测)
    fn resolve_predictions(&self, ys: &mut [(i32, bool)]) {
        for i in 2..ys.len() {
            let (low, high) = self.neighbors[i - 2];
            let predicted = render_point(
                self.x_list[low] as i32,
                ys[low].0,
                self.x_list[high] as i32,
                ys[high].0,
                self.x_list[i] as i32,
            );
            let high_room = self.range - predicted;
            let low_room = predicted;
            let room = 2 * high_room.min(low_room);
            let y = ys[i].0;
            if y != 0 {
                ys[low].1 = true;
                ys[high].1 = true;
                ys[i].1 = true;
                let value = if y >= room {
                    if high_room > low_room {
                        predicted + y - low_room
                    } else {
                        predicted - y + high_room - 1
                    }
                } else if y % 2 == 0 {
                    predicted + y / 2
                } else {
                    predicted - (y + 1) / 2
                };
                ys[i].0 = value.clamp(0, self.range - 1);
            } else {
                ys[i].1 = false;
                ys[i].0 = predicted.clamp(0, self.range - 1);
            }
        }
    }

    fn apply(&self, ys: &[(i32, bool)], spectrum: &mut [f32]) {
        if ys.len() < self.x_list.len() {
            spectrum.fill(0.0);
            return;
        }
        let mut hx = 0i32;
        let mut hy = ys[self.sorted_order[0]].0 * self.multiplier;
        let mut lx = 0i32;
        let mut ly = hy;
        for &i in self.sorted_order.iter().skip(1) {
            if !ys[i].1 {
                continue;
            }
            hy = ys[i].0 * self.multiplier;
            hx = self.x_list[i] as i32;
            render_line(spectrum, lx, ly, hx, hy);
            lx = hx;
            ly = hy;
        }
        let n = spectrum.len() as i32;
        if hx < n {
            render_line(spectrum, hx, hy, n, hy);
        }
    }
}

/// 在已有 posit 中找出 X 值最紧贴 `arr[end]` 的低/高邻居
fn find_neighbors(arr: &[u16], end: usize) -> (usize, usize) {
    let v = arr[end];
    let mut low: Option<(usize, u16)> = None;
    let mut high: Option<(usize, u16)> = None;
    for (i, &x) in arr[..end].iter().enumerate() {
        if x < v && low.is_none_or(|(_, lx)| x > lx) {
            low = Some((i, x));
        }
        if x > v && high.is_none_or(|(_, hx)| x < hx) {
            high = Some((i, x));
        }
    }
    // X 列表以 0 与最大值开头, 两侧邻居必然存在
    (low.map_or(0, |(i, _)| i), high.map_or(1, |(i, _)| i))
}

/// 两点线性插值在 x 处的取值 (整数算法)
fn render_point(x0: i32, y0: i32, x1: i32, y1: i32, x: i32) -> i32 {
    let dy = y1 - y0;
    let adx = x1 - x0;
    let err = dy.abs() * (x - x0);
    let off = err / adx;
    if dy < 0 { y0 - off } else { y0 + off }
}

/// 整数画线, 将衰减表取值乘入 [x0, x1) 区间
fn render_line(result: &mut [f32], x0: i32, y0: i32, x1: i32, y1: i32) {
    let n = result.len() as i32;
    if x0 >= n || x1 <= x0 {
        return;
    }
    let dy = y1 - y0;
    let adx = x1 - x0;
    let base = dy / adx;
    let ady = dy.abs() - base.abs() * adx;
    let sy = if dy < 0 { base - 1 } else { base + 1 };

    result[x0 as usize] *= INVERSE_DB_TABLE[y0 as usize];

    let mut y = y0;
    let mut err = 0;
    for x in x0 + 1..x1.min(n) {
        err += ady;
        if err >= adx {
            err -= adx;
            y += sy;
        } else {
            y += base;
        }
        result[x as usize] *= INVERSE_DB_TABLE[y as usize];
    }
}

/// floor 1 衰减表: 编码 Y 值到线性幅度
const INVERSE_DB_TABLE: [f32; 256] = [
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07,
    1.3699951e-07, 1.4590251e-07, 1.5538408e-07, 1.6548181e-07,
    1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07,
    2.9163793e-07, 3.1059021e-07, 3.3077411e-07, 3.5226968e-07,
    3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07,
    6.2082472e-07, 6.6116941e-07, 7.0413592e-07, 7.4989464e-07,
    7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06,
    1.3215816e-06, 1.4074654e-06, 1.4989305e-06, 1.5963394e-06,
    1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06,
    2.8133190e-06, 2.9961443e-06, 3.1908506e-06, 3.3982101e-06,
    3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06,
    5.9888572e-06, 6.3780469e-06, 6.7925283e-06, 7.2339451e-06,
    7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05,
    1.2748789e-05, 1.3577278e-05, 1.4459606e-05, 1.5399272e-05,
    1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05,
    2.7139006e-05, 2.8902651e-05, 3.0780908e-05, 3.2781225e-05,
    3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05,
    5.7772202e-05, 6.1526565e-05, 6.5524908e-05, 6.9783085e-05,
    7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 0.00010181521, 0.00010843174, 0.00011547824,
    0.00012298267, 0.00013097477, 0.00013948625, 0.00014855085,
    0.00015820453, 0.00016848555, 0.00017943469, 0.00019109536,
    0.00020351382, 0.00021673929, 0.00023082423, 0.00024582449,
    0.00026179955, 0.00027881276, 0.00029693158, 0.00031622787,
    0.00033677814, 0.00035866388, 0.00038197188, 0.00040679456,
    0.00043323036, 0.00046138411, 0.00049136745, 0.00052329927,
    0.00055730621, 0.00059352311, 0.00063209358, 0.00067317058,
    0.00071691700, 0.00076350630, 0.00081312324, 0.00086596457,
    0.00092223983, 0.00098217216, 0.0010459992,  0.0011139742,
    0.0011863665,  0.0012634633,  0.0013455702,  0.0014330129,
    0.0015261382,  0.0016253153,  0.0017309374,  0.0018434235,
    0.0019632195,  0.0020908006,  0.0022266726,  0.0023713743,
    0.0025254795,  0.0026895994,  0.0028643847,  0.0030505286,
    0.0032487691,  0.0034598925,  0.0036847358,  0.0039241906,
    0.0041792066,  0.0044507950,  0.0047400328,  0.0050480668,
    0.0053761186,  0.0057254891,  0.0060975636,  0.0064938176,
    0.0069158225,  0.0073652516,  0.0078438871,  0.0083536271,
    0.0088964928,  0.009474637,   0.010090352,   0.010746080,
    0.011444421,   0.012188144,   0.012980198,   0.013823725,
    0.014722068,   0.015678791,   0.016697687,   0.017782797,
    0.018938423,   0.020169149,   0.021479854,   0.022875735,
    0.024362330,   0.025945531,   0.027631618,   0.029427276,
    0.031339626,   0.033376252,   0.035545228,   0.037855157,
    0.040315199,   0.042935108,   0.045725273,   0.048696758,
    0.051861348,   0.055231591,   0.058820850,   0.062643361,
    0.066714279,   0.071049749,   0.075666962,   0.080584227,
    0.085821044,   0.091398179,   0.097337747,   0.10366330,
    0.11039993,    0.11757434,    0.12521498,    0.13335215,
    0.14201813,    0.15124727,    0.16107617,    0.17154380,
    0.18269168,    0.19456402,    0.20720788,    0.22067342,
    0.23501402,    0.25028656,    0.26655159,    0.28387361,
    0.30232132,    0.32196786,    0.34289114,    0.36517414,
    0.38890521,    0.41417847,    0.44109412,    0.46975890,
    0.50028648,    0.53279791,    0.56742212,    0.60429640,
    0.64356699,    0.68538959,    0.72993007,    0.77736504,
    0.82788260,    0.88168307,    0.9389798,     1.0,
];
