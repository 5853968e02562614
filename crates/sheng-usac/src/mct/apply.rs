//! MCT 旋转/预测算子: 对声道对的 band 频谱就地做 2x2 变换.
//!
//! 全程定点: 旋转用 Q31 cos/sin, 预测用 Q28 alpha. 变换前把两声道
//! mantissa 对齐到公共 exponent 并预留增长位 (旋转 1 位, 预测 4 位,
//! 因 |alpha| 最大 3.2); 对齐移位沿用 31 位硬上限.

use crate::mct::coeffs::{ALPHA_Q28, ANGLE_COS_Q31, ANGLE_SIN_Q31};
use crate::spectrum::{self, fmul_q31, SpectralBuffer};

/// 旋转算子的 exponent 增长位
const ROTATE_HEADROOM: i8 = 1;

/// 预测算子的 exponent 增长位
const PREDICT_HEADROOM: i8 = 4;

/// 对一个 band 应用角度旋转
///
/// `[a'; b'] = [[cos, -sin], [sin, cos]] * [a; b]`
pub fn rotate_band(
    angle_idx: i32,
    a: &mut SpectralBuffer,
    b: &mut SpectralBuffer,
    win: usize,
    sfb: usize,
    range: std::ops::Range<usize>,
) {
    let cos = ANGLE_COS_Q31[angle_idx as usize];
    let sin = ANGLE_SIN_Q31[angle_idx as usize];
    let e_a = a.exponent(win, sfb);
    let e_b = b.exponent(win, sfb);
    let e = e_a.max(e_b).saturating_add(ROTATE_HEADROOM);
    for line in range {
        let va = spectrum::align_to_exp(a.mantissas[line], e_a, e);
        let vb = spectrum::align_to_exp(b.mantissas[line], e_b, e);
        a.mantissas[line] = fmul_q31(cos, va) - fmul_q31(sin, vb);
        b.mantissas[line] = fmul_q31(sin, va) + fmul_q31(cos, vb);
    }
    a.set_exponent(win, sfb, e);
    b.set_exponent(win, sfb, e);
}

/// 对一个 band 应用 alpha 预测并重建 upmix
///
/// `side = b ± alpha * a`, 然后 `a' = a + side`, `b' = a - side`.
pub fn predict_band(
    alpha_idx: i32,
    pred_dir: bool,
    a: &mut SpectralBuffer,
    b: &mut SpectralBuffer,
    win: usize,
    sfb: usize,
    range: std::ops::Range<usize>,
) {
    let mut alpha = i64::from(ALPHA_Q28[alpha_idx as usize]);
    if pred_dir {
        alpha = -alpha;
    }
    let e_a = a.exponent(win, sfb);
    let e_b = b.exponent(win, sfb);
    let e = e_a.max(e_b).saturating_add(PREDICT_HEADROOM);
    for line in range {
        let dmx = spectrum::align_to_exp(a.mantissas[line], e_a, e);
        let res = spectrum::align_to_exp(b.mantissas[line], e_b, e);
        let side = res + ((alpha * i64::from(dmx)) >> 28) as i32;
        a.mantissas[line] = dmx + side;
        b.mantissas[line] = dmx - side;
    }
    a.set_exponent(win, sfb, e);
    b.set_exponent(win, sfb, e);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mct::coeffs::DEFAULT_ANGLE_IDX;
    use crate::spectrum::bfp_to_f64;

    fn buf_with(line: usize, value: f64) -> SpectralBuffer {
        let mut buf = SpectralBuffer::default();
        let mut m = [0i32; 1];
        let e = spectrum::band_to_bfp(&[value], &mut m);
        buf.mantissas[line] = m[0];
        buf.set_exponent(0, 0, e);
        buf
    }

    #[test]
    fn test_旋转45度() {
        // 45 度: a' = (a - b)/√2, b' = (a + b)/√2
        let mut a = buf_with(0, 1.0);
        let mut b = buf_with(0, 0.5);
        rotate_band(DEFAULT_ANGLE_IDX, &mut a, &mut b, 0, 0, 0..1);
        let va = bfp_to_f64(a.mantissas[0], a.exponent(0, 0));
        let vb = bfp_to_f64(b.mantissas[0], b.exponent(0, 0));
        let inv_sqrt2 = 0.5f64.sqrt();
        assert!((va - (1.0 - 0.5) * inv_sqrt2).abs() < 1e-6);
        assert!((vb - (1.0 + 0.5) * inv_sqrt2).abs() < 1e-6);
    }

    #[test]
    fn test_旋转0度恒等() {
        let mut a = buf_with(0, 0.75);
        let mut b = buf_with(0, -0.25);
        rotate_band(0, &mut a, &mut b, 0, 0, 0..1);
        let va = bfp_to_f64(a.mantissas[0], a.exponent(0, 0));
        let vb = bfp_to_f64(b.mantissas[0], b.exponent(0, 0));
        assert!((va - 0.75).abs() < 1e-6);
        assert!((vb + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_旋转能量守恒() {
        let mut a = buf_with(0, 0.6);
        let mut b = buf_with(0, -0.3);
        let before = 0.6f64 * 0.6 + 0.3 * 0.3;
        rotate_band(17, &mut a, &mut b, 0, 0, 0..1);
        let va = bfp_to_f64(a.mantissas[0], a.exponent(0, 0));
        let vb = bfp_to_f64(b.mantissas[0], b.exponent(0, 0));
        assert!((va * va + vb * vb - before).abs() < 1e-6);
    }

    #[test]
    fn test_alpha预测upmix() {
        // alpha_idx 42 → alpha = 1.0: side = b + a, a' = a + side, b' = a - side
        let mut a = buf_with(0, 0.25);
        let mut b = buf_with(0, 0.125);
        predict_band(42, false, &mut a, &mut b, 0, 0, 0..1);
        let va = bfp_to_f64(a.mantissas[0], a.exponent(0, 0));
        let vb = bfp_to_f64(b.mantissas[0], b.exponent(0, 0));
        let side = 0.125 + 0.25;
        assert!((va - (0.25 + side)).abs() < 1e-6);
        assert!((vb - (0.25 - side)).abs() < 1e-6);
    }

    #[test]
    fn test_alpha预测方向翻转() {
        let mut a = buf_with(0, 0.25);
        let mut b = buf_with(0, 0.125);
        predict_band(42, true, &mut a, &mut b, 0, 0, 0..1);
        let va = bfp_to_f64(a.mantissas[0], a.exponent(0, 0));
        let side = 0.125 - 0.25;
        assert!((va - (0.25 + side)).abs() < 1e-6);
    }

    #[test]
    fn test_alpha为0退化为MS() {
        // 索引 32: alpha = 0 → a' = a + b, b' = a - b
        let mut a = buf_with(0, 0.5);
        let mut b = buf_with(0, 0.25);
        predict_band(32, false, &mut a, &mut b, 0, 0, 0..1);
        let va = bfp_to_f64(a.mantissas[0], a.exponent(0, 0));
        let vb = bfp_to_f64(b.mantissas[0], b.exponent(0, 0));
        assert!((va - 0.75).abs() < 1e-6);
        assert!((vb - 0.25).abs() < 1e-6);
    }
}
