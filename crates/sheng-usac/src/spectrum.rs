//! 块浮点频谱表示与全部定点数值运算.
//!
//! 每声道频谱为: 每条谱线一个 i32 mantissa (Q31), 每个 (窗口, SFB) 对
//! 一个共享 exponent; 谱线真值 = mantissa * 2^(exponent - 31).
//!
//! 舍入/饱和行为集中在本模块: 对齐移位硬性截断在 31 位 (不保留超出
//! 表示范围的额外精度), 组合运算统一预留 1 位 headroom.

use crate::tables::{FRAME_LEN, MAX_SFB, SHORT_WINDOWS};

/// exponent 槽位数: 每 (窗口, SFB) 一个
pub const EXP_SLOTS: usize = SHORT_WINDOWS * MAX_SFB;

/// 移位量硬上限; 达到上限的右移把 mantissa 清为 0/符号位
pub const MAX_SHIFT: i32 = 31;

/// 立体声填充能量下限: 低于该能量的 band 直接截断为精确 0
pub const ENERGY_EPS: f64 = 8.271806125530277e-13; // 2^-40

/// 块浮点频谱缓冲
#[derive(Clone)]
pub struct SpectralBuffer {
    /// 谱线 mantissa (Q31)
    pub mantissas: [i32; FRAME_LEN],
    /// 每 (窗口, SFB) 的 exponent, 索引 = `window * MAX_SFB + sfb`
    pub exponents: [i8; EXP_SLOTS],
}

impl Default for SpectralBuffer {
    fn default() -> Self {
        Self {
            mantissas: [0; FRAME_LEN],
            exponents: [0; EXP_SLOTS],
        }
    }
}

impl SpectralBuffer {
    /// 全部清零
    pub fn clear(&mut self) {
        self.mantissas.fill(0);
        self.exponents.fill(0);
    }

    /// (窗口, SFB) 的 exponent 槽位索引
    #[inline]
    pub fn exp_index(window: usize, sfb: usize) -> usize {
        window * MAX_SFB + sfb
    }

    /// 读取 (窗口, SFB) 的 exponent
    #[inline]
    pub fn exponent(&self, window: usize, sfb: usize) -> i8 {
        self.exponents[Self::exp_index(window, sfb)]
    }

    /// 写入 (窗口, SFB) 的 exponent
    #[inline]
    pub fn set_exponent(&mut self, window: usize, sfb: usize, e: i8) {
        self.exponents[Self::exp_index(window, sfb)] = e;
    }
}

// ============================================================
// 定点原语
// ============================================================

/// Q31 小数乘法: (a * b) >> 31
#[inline]
pub fn fmul_q31(a: i32, b: i32) -> i32 {
    ((i64::from(a) * i64::from(b)) >> 31) as i32
}

/// 带硬上限的算术右移; shift < 0 时按 0 处理
#[inline]
pub fn sat_shr(v: i32, shift: i32) -> i32 {
    let s = shift.clamp(0, MAX_SHIFT);
    v >> s
}

/// mantissa 的符号位冗余量 (0 值按最大冗余 31 处理)
#[inline]
pub fn headroom(v: i32) -> i32 {
    ((v ^ (v >> 31)).leading_zeros() as i32 - 1).min(31)
}

/// band 内全部 mantissa 的最小冗余量
pub fn band_headroom(mantissas: &[i32]) -> i32 {
    mantissas.iter().fold(31, |h, &m| h.min(headroom(m)))
}

/// 把 (m, e) 对齐到更大的目标 exponent (只右移, 上限 31)
#[inline]
pub fn align_to_exp(m: i32, e: i8, target: i8) -> i32 {
    debug_assert!(target >= e);
    sat_shr(m, i32::from(target) - i32::from(e))
}

/// band 真值能量: sum((m * 2^(e-31))^2)
pub fn band_energy(mantissas: &[i32], e: i8) -> f64 {
    let scale = (i32::from(e) - 31) as f64;
    let f = scale.exp2();
    mantissas
        .iter()
        .map(|&m| {
            let v = m as f64 * f;
            v * v
        })
        .sum()
}

/// 把一组 f64 真值转为块浮点: 返回 band exponent, mantissa 写入 `out`
///
/// exponent 取 `floor(log2(max|v|)) + 1`, 保证全部 mantissa 落在 Q31
/// 表示范围内; 全零 band 的 exponent 为 0.
pub fn band_to_bfp(values: &[f64], out: &mut [i32]) -> i8 {
    debug_assert_eq!(values.len(), out.len());
    let max = values.iter().fold(0.0f64, |a, &v| a.max(v.abs()));
    if max == 0.0 {
        out.fill(0);
        return 0;
    }
    let e = (max.log2().floor() as i32 + 1).clamp(-128, 127);
    let f = ((31 - e) as f64).exp2();
    for (o, &v) in out.iter_mut().zip(values) {
        // 四舍五入后夹在 i32 范围内
        *o = (v * f).round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    }
    e as i8
}

/// 块浮点 (m, e) 的真值
#[inline]
pub fn bfp_to_f64(m: i32, e: i8) -> f64 {
    m as f64 * ((i32::from(e) - 31) as f64).exp2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmul_q31() {
        // 0.5 * 0.5 = 0.25
        let half = 1 << 30;
        assert_eq!(fmul_q31(half, half), 1 << 29);
        // 1.0(饱和) * x ≈ x
        let x = 12345678;
        let prod = fmul_q31(i32::MAX, x);
        assert!((prod - x).abs() <= 1);
    }

    #[test]
    fn test_sat_shr_硬上限() {
        assert_eq!(sat_shr(0x4000_0000, 3), 0x0800_0000);
        assert_eq!(sat_shr(0x4000_0000, 31), 0);
        assert_eq!(sat_shr(0x4000_0000, 100), 0);
        assert_eq!(sat_shr(-1, 100), -1); // 算术移位保留符号
    }

    #[test]
    fn test_headroom() {
        assert_eq!(headroom(0), 31);
        assert_eq!(headroom(1), 30);
        assert_eq!(headroom(i32::MAX), 0);
        assert_eq!(headroom(-1), 31);
        assert_eq!(headroom(i32::MIN), 0);
        // 1<<20 可左移 10 位, -(1<<25) 可左移 6 位 (恰到 i32::MIN)
        assert_eq!(headroom(1 << 20), 10);
        assert_eq!(headroom(-(1 << 25)), 6);
        assert_eq!(band_headroom(&[0, 1 << 20, -(1 << 25)]), 6);
    }

    #[test]
    fn test_band_to_bfp_互逆() {
        let values = [0.5, -0.25, 0.125, 0.0];
        let mut m = [0i32; 4];
        let e = band_to_bfp(&values, &mut m);
        for (i, &v) in values.iter().enumerate() {
            let back = bfp_to_f64(m[i], e);
            assert!((back - v).abs() < 1e-6, "line {i}: {back} vs {v}");
        }
    }

    #[test]
    fn test_band_to_bfp_全零() {
        let mut m = [7i32; 3];
        let e = band_to_bfp(&[0.0, 0.0, 0.0], &mut m);
        assert_eq!(e, 0);
        assert_eq!(m, [0, 0, 0]);
    }

    #[test]
    fn test_band_energy() {
        // m = 2^30, e = 0 → 真值 0.5, 能量 0.25
        let e = band_energy(&[1 << 30], 0);
        assert!((e - 0.25).abs() < 1e-12);
        // e = 1 时真值翻倍, 能量 1.0
        let e = band_energy(&[1 << 30], 1);
        assert!((e - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_对齐移位() {
        let m = 1 << 20;
        assert_eq!(align_to_exp(m, 2, 5), m >> 3);
        assert_eq!(align_to_exp(m, 0, 0), m);
    }
}
