//! 逆修正离散余弦变换 (IMDCT).
//!
//! 对块长 N, 由 N/2 个频域系数产出 N 个时域样本:
//!
//! ```text
//! y[i] = sum_k X[k] * cos((PI / (2N)) * (2i + 1 + N/2) * (2k + 1))
//! ```
//!
//! 实现把变换折算为 N/4 点复数 FFT 加前后旋转, 复杂度 O(N log N).
//! 输出前半段关于 N/4 反对称, 后半段关于 3N/4 对称, 因此只需计算中间
//! 一半再镜像展开. 三角表与中间缓冲在构造时按块长预分配.

/// 单一块长的 IMDCT 变换器
#[derive(Debug)]
pub(crate) struct Imdct {
    n: usize,
    /// 前/后旋转角 theta_t = (PI / (N/2)) * (t + 1/8), cos/sin 交错
    rotation: Vec<f32>,
    /// FFT 旋转因子 e^{-j 2 PI k / (N/4)}, k < N/8, cos/sin 交错
    twiddles: Vec<f32>,
    bit_reverse: Vec<u32>,
    scratch_re: Vec<f32>,
    scratch_im: Vec<f32>,
}

impl Imdct {
    /// 创建块长为 `n` 的变换器 (`n` 为 2 的幂且不小于 16)
    pub(crate) fn new(n: usize) -> Self {
        assert!(n.is_power_of_two() && n >= 16);
        let m = n / 2;
        let n4 = n / 4;

        let mut rotation = Vec::with_capacity(n4 * 2);
        for t in 0..n4 {
            let theta = std::f64::consts::PI * (t as f64 + 0.125) / m as f64;
            rotation.push(theta.cos() as f32);
            rotation.push(theta.sin() as f32);
        }

        let mut twiddles = Vec::with_capacity(n4);
        for k in 0..n4 / 2 {
            let phi = 2.0 * std::f64::consts::PI * k as f64 / n4 as f64;
            twiddles.push(phi.cos() as f32);
            twiddles.push(-(phi.sin()) as f32);
        }

        let bits = n4.trailing_zeros();
        let bit_reverse = (0..n4 as u32)
            .map(|i| i.reverse_bits() >> (32 - bits))
            .collect();

        Self {
            n,
            rotation,
            twiddles,
            bit_reverse,
            scratch_re: vec![0.0; n4],
            scratch_im: vec![0.0; n4],
        }
    }

    /// 就地变换: `buf[..n/2]` 为频域输入, 返回时 `buf[..n]` 为时域输出
    pub(crate) fn inverse(&mut self, buf: &mut [f32]) {
        let n = self.n;
        let m = n / 2;
        let n4 = n / 4;
        debug_assert!(buf.len() >= n);

        // 前旋转: c[t] = (X[m-1-2t] - j X[2t]) * e^{-j theta_t}
        for t in 0..n4 {
            let a = buf[m - 1 - 2 * t];
            let b = buf[2 * t];
            let cos_t = self.rotation[2 * t];
            let sin_t = self.rotation[2 * t + 1];
            self.scratch_re[t] = a * cos_t - b * sin_t;
            self.scratch_im[t] = -b * cos_t - a * sin_t;
        }

        fft_in_place(
            &mut self.scratch_re,
            &mut self.scratch_im,
            &self.twiddles,
            &self.bit_reverse,
        );

        // 后旋转, 偶数位取实部, 奇数位 (从尾部) 取虚部
        for t in 0..n4 {
            let cos_t = self.rotation[2 * t];
            let sin_t = self.rotation[2 * t + 1];
            let re = self.scratch_re[t];
            let im = self.scratch_im[t];
            buf[n4 + 2 * t] = re * cos_t + im * sin_t;
            buf[n4 + m - 1 - 2 * t] = im * cos_t - re * sin_t;
        }

        // 镜像展开: 头部反对称, 尾部对称
        for k in 0..n4 {
            buf[k] = -buf[m - 1 - k];
        }
        for k in 0..n4 {
            buf[n - 1 - k] = buf[m + k];
        }
    }
}

/// 迭代式基 2 复数 FFT (正向, 核为 e^{-j 2 PI nk / len})
fn fft_in_place(re: &mut [f32], im: &mut [f32], twiddles: &[f32], bit_reverse: &[u32]) {
    let n = re.len();
    for i in 0..n {
        let j = bit_reverse[i] as usize;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = n / len;
        let mut base = 0;
        while base < n {
            for k in 0..half {
                let wr = twiddles[2 * k * step];
                let wi = twiddles[2 * k * step + 1];
                let i1 = base + k;
                let i2 = base + k + half;
                let tr = re[i2] * wr - im[i2] * wi;
                let ti = re[i2] * wi + im[i2] * wr;
                re[i2] = re[i1] - tr;
                im[i2] = im[i1] - ti;
                re[i1] += tr;
                im[i1] += ti;
            }
            base += len;
        }
        len <<= 1;
    }
}
