//! 立体声填充: 用上一帧输出重建残差声道的噪声填充 band.
//!
//! 仅角度模式 + 长块 + box 标志置位时生效. 合成 downmix 来自对
//! 上一帧两声道输出做逆旋转; 合成能量向 scale factor 隐含的目标
//! 能量看齐, 增益封顶 10 倍, 低于能量下限的 band 截断为精确 0.

use log::trace;

use crate::channel::scale_gain;
use crate::mct::boxes::McBox;
use crate::mct::coeffs::{ANGLE_COS_Q31, ANGLE_SIN_Q31};
use crate::spectrum::{self, ENERGY_EPS, SpectralBuffer};
use crate::state::{ChannelHistory, ChannelSpectralState};
use crate::tables::SfbTable;

/// 填充增益上限
pub const MAX_FILL_GAIN: f64 = 10.0;

/// 对一个 box 的残差声道执行立体声填充
///
/// `prev_a`/`prev_b` 为 box 两声道的上一帧历史; 残差声道 (`res`) 中
/// 被噪声填充标记的 band 逐个处理, 标记读取后即清除.
pub fn stereo_fill_box(
    sfb_table: &SfbTable,
    mc_box: &McBox,
    res: &mut ChannelSpectralState,
    prev_a: &ChannelHistory,
    prev_b: &ChannelHistory,
) {
    debug_assert!(!res.ics.is_short());
    let max_sfb = res.ics.max_sfb;
    let active_bands = if mc_box.num_bands > 0 {
        mc_box.num_bands.min(max_sfb)
    } else {
        max_sfb
    };
    let (a_usable, b_usable) = usable_refs(prev_a, prev_b);

    let mut synth = [0.0f64; 1024];
    for sfb in 0..active_bands {
        if !mc_box.mask[sfb] {
            continue;
        }
        let slot = ChannelSpectralState::gs_index(0, sfb);
        // 读取即清除: 同一帧内不会重复填充
        if !res.band_is_noise[slot] {
            continue;
        }
        res.band_is_noise[slot] = false;

        let range = sfb_table.line_range(false, 0, sfb);
        fill_band(
            &mut res.spectrum,
            &mut synth,
            sfb,
            range,
            res.scale_factors[slot],
            mc_box.coef_indices[sfb] as usize,
            prev_a,
            prev_b,
            a_usable,
            b_usable,
        );
    }
}

/// 对一个 IGF tile 的辅助频谱重复填充 pass
///
/// `noise_marks` 为主频谱 pass 清除标记前的快照 (按 gs_index(0, sfb)
/// 索引); 合成参考仍取两声道上一帧保存的主频谱, tile 自带 exponent
/// 数组并在此就地归一.
pub fn stereo_fill_tile(
    sfb_table: &SfbTable,
    mc_box: &McBox,
    max_sfb: usize,
    noise_marks: &[bool],
    scale_factors: &[i32],
    tile: &mut SpectralBuffer,
    prev_a: &ChannelHistory,
    prev_b: &ChannelHistory,
) {
    let active_bands = if mc_box.num_bands > 0 {
        mc_box.num_bands.min(max_sfb)
    } else {
        max_sfb
    };
    let (a_usable, b_usable) = usable_refs(prev_a, prev_b);

    let mut synth = [0.0f64; 1024];
    for sfb in 0..active_bands {
        if !mc_box.mask[sfb] {
            continue;
        }
        let slot = ChannelSpectralState::gs_index(0, sfb);
        if !noise_marks[slot] {
            continue;
        }
        let range = sfb_table.line_range(false, 0, sfb);
        fill_band(
            tile,
            &mut synth,
            sfb,
            range,
            scale_factors[slot],
            mc_box.coef_indices[sfb] as usize,
            prev_a,
            prev_b,
            a_usable,
            b_usable,
        );
    }
}

/// 上一帧参考可用性: 块类型或渲染路径不连续的声道按零贡献处理
fn usable_refs(prev_a: &ChannelHistory, prev_b: &ChannelHistory) -> (bool, bool) {
    let same_path = prev_a.prev_render_path == prev_b.prev_render_path;
    (
        prev_a.prev_valid && !prev_a.prev_short && same_path,
        prev_b.prev_valid && !prev_b.prev_short && same_path,
    )
}

/// 单 band 填充: 合成 downmix, 能量匹配后叠加进 `buf` 并归一 exponent
#[allow(clippy::too_many_arguments)]
fn fill_band(
    buf: &mut SpectralBuffer,
    synth: &mut [f64; 1024],
    sfb: usize,
    range: std::ops::Range<usize>,
    target_sf: i32,
    angle_idx: usize,
    prev_a: &ChannelHistory,
    prev_b: &ChannelHistory,
    a_usable: bool,
    b_usable: bool,
) {
    let cos = f64::from(ANGLE_COS_Q31[angle_idx]) / f64::from(1u32 << 31);
    let sin = f64::from(ANGLE_SIN_Q31[angle_idx]) / f64::from(1u32 << 31);

    let width = range.len();
    let e_a = prev_a.prev_spectrum.exponent(0, sfb);
    let e_b = prev_b.prev_spectrum.exponent(0, sfb);

    // 合成 downmix = 逆旋转第一行: cos * prevA + sin * prevB
    let mut synth_energy = 0.0f64;
    for (i, line) in range.clone().enumerate() {
        let va = if a_usable {
            spectrum::bfp_to_f64(prev_a.prev_spectrum.mantissas[line], e_a)
        } else {
            0.0
        };
        let vb = if b_usable {
            spectrum::bfp_to_f64(prev_b.prev_spectrum.mantissas[line], e_b)
        } else {
            0.0
        };
        let v = cos * va + sin * vb;
        synth[i] = v;
        synth_energy += v * v;
    }

    if synth_energy < ENERGY_EPS {
        // 能量下限以下: 精确置零, 避免跨帧数值漂移
        zero_band(buf, 0, sfb, range);
        return;
    }

    let target_amp = scale_gain(target_sf);
    let target_energy = target_amp * target_amp * width as f64;
    let gain = (target_energy / synth_energy).sqrt().min(MAX_FILL_GAIN);
    trace!("立体声填充: sfb={sfb}, gain={gain:.3}");

    // 合成内容叠加进目标频谱, 再做 exponent 归一
    let e_res = buf.exponent(0, sfb);
    for (i, line) in range.clone().enumerate() {
        let existing = spectrum::bfp_to_f64(buf.mantissas[line], e_res);
        synth[i] = existing + gain * synth[i];
    }
    let e = spectrum::band_to_bfp(&synth[..width], &mut buf.mantissas[range]);
    buf.set_exponent(0, sfb, e);
}

fn zero_band(
    buf: &mut SpectralBuffer,
    win: usize,
    sfb: usize,
    range: std::ops::Range<usize>,
) {
    buf.mantissas[range].fill(0);
    buf.set_exponent(win, sfb, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mct::coeffs::DEFAULT_ANGLE_IDX;
    use crate::state::IcsInfo;
    use crate::tables::MAX_SFB;

    fn table() -> SfbTable {
        SfbTable::for_sample_rate(48000).unwrap()
    }

    fn full_band_box(angle_idx: i32) -> McBox {
        McBox {
            ch_a: 0,
            ch_b: 1,
            has_mask: false,
            has_bandwise: false,
            num_bands: 0,
            mask: [true; MAX_SFB],
            pred_dir: false,
            delta_time: false,
            coef_indices: [angle_idx; MAX_SFB],
        }
    }

    fn res_state(max_sfb: usize) -> ChannelSpectralState {
        let mut st = ChannelSpectralState::default();
        st.ics = IcsInfo {
            max_sfb,
            ..IcsInfo::default()
        };
        st
    }

    /// 上一帧历史: band 0 内恒值 value
    fn history_with(value: f64, width: usize) -> ChannelHistory {
        let mut h = ChannelHistory::default();
        let values = vec![value; width];
        let e = spectrum::band_to_bfp(&values, &mut h.prev_spectrum.mantissas[..width]);
        h.prev_spectrum.set_exponent(0, 0, e);
        h.prev_valid = true;
        h
    }

    #[test]
    fn test_能量匹配与增益上限() {
        let t = table();
        let width = t.line_range(false, 0, 0).len();
        let mut res = res_state(1);
        res.scale_factors[0] = 100; // 目标每线幅值 1.0
        res.band_is_noise[0] = true;
        let prev_a = history_with(0.5, width);
        let prev_b = ChannelHistory::default(); // 无效参考 → 零贡献

        // 0 度旋转: synth = prevA
        stereo_fill_box(&t, &full_band_box(0), &mut res, &prev_a, &prev_b);
        let e = res.spectrum.exponent(0, 0);
        // synth 能量 = 0.25 * width, 目标 = width → gain = 2
        for line in t.line_range(false, 0, 0) {
            let v = spectrum::bfp_to_f64(res.spectrum.mantissas[line], e);
            assert!((v - 1.0).abs() < 1e-5, "line {line}: {v}");
        }
        // 标记读取后清除
        assert!(!res.band_is_noise[0]);
    }

    #[test]
    fn test_增益封顶10倍() {
        let t = table();
        let width = t.line_range(false, 0, 0).len();
        let mut res = res_state(1);
        res.scale_factors[0] = 200; // 很高的目标能量
        res.band_is_noise[0] = true;
        let prev_a = history_with(0.001, width);
        let prev_b = ChannelHistory::default();

        stereo_fill_box(&t, &full_band_box(0), &mut res, &prev_a, &prev_b);
        let e = res.spectrum.exponent(0, 0);
        let line0 = t.line_range(false, 0, 0).start;
        let v = spectrum::bfp_to_f64(res.spectrum.mantissas[line0], e);
        // gain 被钳到 10: 结果 = 0.001 * 10
        assert!((v - 0.01).abs() < 1e-7, "{v}");
    }

    #[test]
    fn test_能量下限截断为零() {
        let t = table();
        let mut res = res_state(1);
        res.scale_factors[0] = 100;
        res.band_is_noise[0] = true;
        // 残差里留一个非零 mantissa, 验证被精确清零
        res.spectrum.mantissas[0] = 123;
        let prev_a = ChannelHistory::default();
        let prev_b = ChannelHistory::default();

        stereo_fill_box(&t, &full_band_box(0), &mut res, &prev_a, &prev_b);
        for line in t.line_range(false, 0, 0) {
            assert_eq!(res.spectrum.mantissas[line], 0);
        }
        assert_eq!(res.spectrum.exponent(0, 0), 0);
    }

    #[test]
    fn test_上一帧短块按零处理() {
        let t = table();
        let width = t.line_range(false, 0, 0).len();
        let mut res = res_state(1);
        res.scale_factors[0] = 100;
        res.band_is_noise[0] = true;
        let mut prev_a = history_with(0.5, width);
        prev_a.prev_short = true; // 块类型不连续
        let prev_b = ChannelHistory::default();

        stereo_fill_box(&t, &full_band_box(0), &mut res, &prev_a, &prev_b);
        // 两声道参考都不可用 → 合成能量 0 → band 置零
        for line in t.line_range(false, 0, 0) {
            assert_eq!(res.spectrum.mantissas[line], 0);
        }
    }

    #[test]
    fn test_渲染路径不一致按零处理() {
        let t = table();
        let width = t.line_range(false, 0, 0).len();
        let mut res = res_state(1);
        res.scale_factors[0] = 100;
        res.band_is_noise[0] = true;
        let mut prev_a = history_with(0.5, width);
        prev_a.prev_render_path = 1; // 与 prev_b 的路径 0 不一致
        let prev_b = history_with(0.5, width);

        stereo_fill_box(&t, &full_band_box(0), &mut res, &prev_a, &prev_b);
        // 路径不一致时两声道参考都不可用 → band 置零
        for line in t.line_range(false, 0, 0) {
            assert_eq!(res.spectrum.mantissas[line], 0);
        }
        assert!(!res.band_is_noise[0]);
    }

    #[test]
    fn test_tile辅助频谱填充() {
        let t = table();
        let width = t.line_range(false, 0, 0).len();
        let prev_a = history_with(0.5, width);
        let prev_b = ChannelHistory::default();

        let mut marks = [false; crate::state::GS_SLOTS];
        marks[0] = true;
        let mut scale_factors = [0i32; crate::state::GS_SLOTS];
        scale_factors[0] = 100; // 目标每线幅值 1.0
        let mut tile = SpectralBuffer::default();

        // 0 度旋转: tile 填充与主频谱同一能量匹配规则
        stereo_fill_tile(
            &t,
            &full_band_box(0),
            1,
            &marks,
            &scale_factors,
            &mut tile,
            &prev_a,
            &prev_b,
        );
        let e = tile.exponent(0, 0);
        for line in t.line_range(false, 0, 0) {
            let v = spectrum::bfp_to_f64(tile.mantissas[line], e);
            assert!((v - 1.0).abs() < 1e-5, "line {line}: {v}");
        }
        // 未标记 band 不动
        assert_eq!(tile.mantissas[t.line_range(false, 0, 1).start], 0);
    }

    #[test]
    fn test_未标记band不动() {
        let t = table();
        let width = t.line_range(false, 0, 0).len();
        let mut res = res_state(1);
        res.scale_factors[0] = 100;
        // band_is_noise 未置位
        res.spectrum.mantissas[0] = 999;
        let prev_a = history_with(0.5, width);
        let prev_b = ChannelHistory::default();

        stereo_fill_box(&t, &full_band_box(DEFAULT_ANGLE_IDX), &mut res, &prev_a, &prev_b);
        assert_eq!(res.spectrum.mantissas[0], 999);
    }
}
