//! Vorbis 合成窗与块布局.
//!
//! 窗形为正弦套正弦: `sin((PI/2) * sin^2(...))`. 斜边长度由相邻块中
//! 较短者决定, 因此长块有四种 (前短/长 x 后短/长) 预计算窗形, 短块
//! 只有一种. 窗在 IMDCT 输出后整块逐点相乘, 重叠相加阶段只做加法.

/// 单个音频包的样本布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    /// 可交付区间起点 (与上一包重叠相加之后)
    pub(crate) start: usize,
    /// 可交付区间终点
    pub(crate) valid_end: usize,
    /// 本包时域样本总长, 尾部 [valid_end, total) 留给下一包重叠
    pub(crate) total: usize,
}

/// 按当前块长与相邻块长计算布局
///
/// `prev_n` / `next_n` 是窗口标志折算出的邻块长度; 短块恒以自身长度
/// 作为邻块长度.
pub(crate) fn block_layout(n: usize, prev_n: usize, next_n: usize) -> BlockLayout {
    BlockLayout {
        start: n / 4 - prev_n / 4,
        valid_end: n * 3 / 4 - next_n / 4,
        total: n * 3 / 4 + next_n / 4,
    }
}

/// 生成整块窗形
pub(crate) fn generate_window(n: usize, prev_n: usize, next_n: usize) -> Vec<f32> {
    let left_len = prev_n / 2;
    let right_len = next_n / 2;
    let left_start = n / 4 - prev_n / 4;
    let left_end = left_start + left_len;
    let right_end = n * 3 / 4 + next_n / 4;
    let right_start = right_end - right_len;

    let mut window = vec![0.0f32; n];
    for (t, slot) in window[left_start..left_end].iter_mut().enumerate() {
        *slot = slope(t, left_len);
    }
    for slot in window[left_end..right_start].iter_mut() {
        *slot = 1.0;
    }
    for (i, slot) in window[right_start..right_end].iter_mut().enumerate() {
        *slot = slope(right_len - 1 - i, right_len);
    }
    window
}

/// 上升斜边在第 `t` 点的取值
fn slope(t: usize, len: usize) -> f32 {
    let inner = (std::f64::consts::PI * (t as f64 + 0.5) / (2.0 * len as f64)).sin();
    (std::f64::consts::FRAC_PI_2 * inner * inner).sin() as f32
}

/// 一条流的全部预计算窗形
#[derive(Debug)]
pub(crate) struct WindowSet {
    short: Vec<f32>,
    /// 按 prev_flag + 2 * next_flag 索引
    long: [Vec<f32>; 4],
}

impl WindowSet {
    pub(crate) fn new(blocksize0: usize, blocksize1: usize) -> Self {
        let pick = |flag: bool| if flag { blocksize1 } else { blocksize0 };
        Self {
            short: generate_window(blocksize0, blocksize0, blocksize0),
            long: [
                generate_window(blocksize1, pick(false), pick(false)),
                generate_window(blocksize1, pick(true), pick(false)),
                generate_window(blocksize1, pick(false), pick(true)),
                generate_window(blocksize1, pick(true), pick(true)),
            ],
        }
    }

    pub(crate) fn get(&self, block_flag: bool, prev_flag: bool, next_flag: bool) -> &[f32] {
        if block_flag {
            &self.long[usize::from(prev_flag) + 2 * usize::from(next_flag)]
        } else {
            &self.short
        }
    }
}
