//! 每声道频谱重建: 反量化、联合立体声、噪声填充与外部协作者调用.
//!
//! 量化谱线 → 块浮点频谱的数值约定:
//! `iq = sign(q) * |q|^(4/3) * 2^(0.25 * (sf - 100))`,
//! 每 (窗口, SFB) 一个共享 exponent, 由 `spectrum::band_to_bfp` 归一.

use log::trace;
use sheng_core::ShengResult;

use crate::config::DecoderConfig;
use crate::external::{GapFiller, TnsProcessor};
use crate::huffman::NOISE_CB;
use crate::spectrum::{self, SpectralBuffer};
use crate::state::{ChannelHistory, ChannelSpectralState, JointStereoState};
use crate::tables::{NOISE_FILL_START_LINE, SHORT_WINDOWS};

/// scale factor → 线性增益指数的基准偏移
const SF_BASE: i32 = 100;

/// 噪声填充 offset 字段 (5 位) 的居中偏移
const NOISE_OFFSET_BIAS: i32 = 16;

/// 每声道频谱解码器
pub struct ChannelSpectralDecoder<'a> {
    config: &'a DecoderConfig,
}

impl<'a> ChannelSpectralDecoder<'a> {
    pub fn new(config: &'a DecoderConfig) -> Self {
        Self { config }
    }

    /// 末段协作者调用: TNS 综合滤波与 IGF tile 注入
    pub fn finish(
        &self,
        ch_index: usize,
        st: &mut ChannelSpectralState,
        tns: &mut dyn TnsProcessor,
        igf: &mut dyn GapFiller,
    ) -> ShengResult<()> {
        if st.tns_present {
            let ics = st.ics;
            let tns_data = st.tns.clone();
            tns.apply(ch_index, &ics, &tns_data, &mut st.spectrum)?;
        }
        if self.config.gap_filling {
            let ics = st.ics;
            igf.inject(ch_index, &ics, &mut st.spectrum)?;
        }
        Ok(())
    }

    /// 反量化: 量化谱线 → 块浮点频谱
    pub fn inverse_quantize(&self, st: &mut ChannelSpectralState) {
        let is_short = st.ics.is_short();
        let mut band = [0.0f64; 1024];
        for group in 0..st.ics.num_window_groups {
            let group_start = st.ics.group_start(group);
            let group_len = st.ics.group_lengths[group] as usize;
            for sfb in 0..st.ics.max_sfb {
                let slot = ChannelSpectralState::gs_index(group, sfb);
                let sf = st.scale_factors[slot];
                let gain = scale_gain(sf);
                for win_in_group in 0..group_len {
                    let win = group_start + win_in_group;
                    let range = self.config.sfb_table.line_range(is_short, win, sfb);
                    let width = range.len();
                    for (i, line) in range.clone().enumerate() {
                        band[i] = inverse_quantize_line(st.quant[line], gain);
                    }
                    let e = spectrum::band_to_bfp(
                        &band[..width],
                        &mut st.spectrum.mantissas[range],
                    );
                    st.spectrum.set_exponent(win, sfb, e);
                }
            }
        }
    }

    /// 联合立体声: 按 (组, band) mask 做 M/S 反变换或实部复数预测
    ///
    /// `left` 在预测模式下承载 downmix, `right` 承载残差.
    pub fn apply_joint_stereo(
        &self,
        pair: &JointStereoState,
        left: &mut ChannelSpectralState,
        right: &mut ChannelSpectralState,
    ) {
        if pair.ms_mask_mode == 0 {
            return;
        }
        let ics = left.ics;
        let is_short = ics.is_short();
        let predict = pair.ms_mask_mode == 3;

        for group in 0..ics.num_window_groups {
            let group_start = ics.group_start(group);
            let group_len = ics.group_lengths[group] as usize;
            for sfb in 0..ics.max_sfb {
                let slot = ChannelSpectralState::gs_index(group, sfb);
                if !pair.ms_used[slot] {
                    continue;
                }
                // 噪声/强度 band 不参与 M/S
                if left.band_codebook[slot] >= NOISE_CB
                    || right.band_codebook[slot] >= NOISE_CB
                {
                    continue;
                }
                let alpha = if predict {
                    let a = pair.alpha_q[sfb.min(pair.alpha_q.len() - 1)] as f64 * 0.1;
                    if pair.pred_dir { -a } else { a }
                } else {
                    0.0
                };
                for win_in_group in 0..group_len {
                    let win = group_start + win_in_group;
                    let range = self.config.sfb_table.line_range(is_short, win, sfb);
                    ms_band(
                        &mut left.spectrum,
                        &mut right.spectrum,
                        win,
                        sfb,
                        range,
                        predict,
                        alpha,
                    );
                }
            }
        }
    }

    /// 帧关闭时刷新声道对历史 (downmix 频谱与块类型连续性)
    pub fn update_pair_history(
        &self,
        pair: &mut JointStereoState,
        left: &ChannelSpectralState,
        right: &ChannelSpectralState,
    ) {
        let is_short = left.ics.is_short();
        let num_windows = left.ics.num_windows();
        let num_sfb = self.config.sfb_table.num_sfb(is_short);
        for win in 0..num_windows {
            for sfb in 0..num_sfb {
                let range = self.config.sfb_table.line_range(is_short, win, sfb);
                let e_l = left.spectrum.exponent(win, sfb);
                let e_r = right.spectrum.exponent(win, sfb);
                // downmix = (L + R) / 2, 对齐到公共 exponent
                let e = e_l.max(e_r);
                for line in range {
                    let l = spectrum::align_to_exp(
                        left.spectrum.mantissas[line],
                        e_l,
                        e,
                    );
                    let r = spectrum::align_to_exp(
                        right.spectrum.mantissas[line],
                        e_r,
                        e,
                    );
                    pair.prev_dmx.mantissas[line] = (l >> 1) + (r >> 1);
                }
                pair.prev_dmx.set_exponent(win, sfb, e);
            }
        }
        pair.prev_alpha_q = pair.alpha_q;
        pair.prev_window_sequence = left.ics.window_sequence;
        pair.prev_window_shape = left.ics.window_shape;
    }

    /// 噪声填充: 合成"已传输但为空"的 band
    ///
    /// 两条路径共用声道持久随机种子:
    /// - 经典 PNS band (码本 13): 按传输能量归一的 LCG 噪声
    /// - USAC 噪声填充: 起始谱线以上的全零 band, 幅值由 noise_level
    ///   决定, scale factor 由 noise_offset 修正
    ///
    /// 已填充过的 band (标记已置且频谱非零) 不会重复触发.
    pub fn noise_fill(&self, st: &mut ChannelSpectralState, hist: &mut ChannelHistory) {
        let is_short = st.ics.is_short();
        let usac_active = self.config.noise_filling && st.noise_level != 0;
        // noise_level n → 幅值 2^((n-14)/4)
        let level = if usac_active {
            ((f64::from(st.noise_level) - 14.0) / 4.0).exp2()
        } else {
            0.0
        };
        let start_line = if is_short {
            NOISE_FILL_START_LINE / SHORT_WINDOWS
        } else {
            NOISE_FILL_START_LINE
        };

        let mut band = [0.0f64; 1024];
        for group in 0..st.ics.num_window_groups {
            let group_start = st.ics.group_start(group);
            let group_len = st.ics.group_lengths[group] as usize;
            for sfb in 0..st.ics.max_sfb {
                let slot = ChannelSpectralState::gs_index(group, sfb);

                if st.band_codebook[slot] == NOISE_CB {
                    let mut filled = false;
                    for win_in_group in 0..group_len {
                        let win = group_start + win_in_group;
                        let range = self.config.sfb_table.line_range(is_short, win, sfb);
                        let width = range.len();
                        if width == 0 {
                            continue;
                        }
                        // 已填充过的窗口不重复触发
                        if st.spectrum.mantissas[range.clone()].iter().any(|&m| m != 0) {
                            continue;
                        }
                        let target = scale_gain(st.scale_factors[slot]);
                        let mut energy = 0.0f64;
                        for v in band[..width].iter_mut() {
                            let n = lcg_next(&mut hist.noise_seed);
                            *v = f64::from(n as i32);
                            energy += *v * *v;
                        }
                        if energy > 0.0 {
                            let scale = target / energy.sqrt();
                            for v in band[..width].iter_mut() {
                                *v *= scale;
                            }
                        }
                        let e = spectrum::band_to_bfp(
                            &band[..width],
                            &mut st.spectrum.mantissas[range],
                        );
                        st.spectrum.set_exponent(win, sfb, e);
                        filled = true;
                    }
                    if filled {
                        st.band_is_noise[slot] = true;
                        trace!("噪声填充 (PNS): group={group}, sfb={sfb}");
                    }
                } else {
                    // USAC 路径: 候选与标记按 (组, band) 判定一次,
                    // 组内全部窗口一起填充
                    if !usac_active || st.band_is_noise[slot] {
                        continue;
                    }
                    let range0 = self.config.sfb_table.line_range(is_short, group_start, sfb);
                    if range0.is_empty() {
                        continue;
                    }
                    // 候选: 起始谱线以上, 且组内量化谱线全零
                    let line0 = range0.start % if is_short { 128 } else { 1024 };
                    if line0 < start_line {
                        continue;
                    }
                    let all_zero = (0..group_len).all(|w| {
                        let r = self.config.sfb_table.line_range(is_short, group_start + w, sfb);
                        st.quant[r].iter().all(|&q| q == 0)
                    });
                    if !all_zero {
                        continue;
                    }
                    let sf = st.scale_factors[slot]
                        + i32::from(st.noise_offset)
                        - NOISE_OFFSET_BIAS;
                    let gain = scale_gain(sf);
                    for win_in_group in 0..group_len {
                        let win = group_start + win_in_group;
                        let range = self.config.sfb_table.line_range(is_short, win, sfb);
                        let width = range.len();
                        for v in band[..width].iter_mut() {
                            let n = lcg_next(&mut hist.noise_seed);
                            // 随机符号的定幅噪声
                            *v = if n & 0x10000 != 0 { -level } else { level };
                            *v *= gain;
                        }
                        let e = spectrum::band_to_bfp(
                            &band[..width],
                            &mut st.spectrum.mantissas[range],
                        );
                        st.spectrum.set_exponent(win, sfb, e);
                    }
                    st.band_is_noise[slot] = true;
                    trace!("噪声填充: group={group}, sfb={sfb}");
                }
            }
        }
    }
}

/// scale factor → 线性增益 2^(0.25 * (sf - 100))
#[inline]
pub(crate) fn scale_gain(sf: i32) -> f64 {
    (0.25 * f64::from(sf - SF_BASE)).exp2()
}

/// 单条谱线反量化
#[inline]
fn inverse_quantize_line(q: i32, gain: f64) -> f64 {
    if q == 0 {
        return 0.0;
    }
    let sign = if q > 0 { 1.0 } else { -1.0 };
    let mag = f64::from(q.unsigned_abs());
    sign * mag.powf(4.0 / 3.0) * gain
}

/// LCG 随机源 (与参考解码器一致的乘加常数)
#[inline]
pub fn lcg_next(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    *seed
}

/// band 内 M/S 反变换 (可叠加实部预测), 预留 1 位 headroom
#[allow(clippy::too_many_arguments)]
fn ms_band(
    left: &mut SpectralBuffer,
    right: &mut SpectralBuffer,
    win: usize,
    sfb: usize,
    range: std::ops::Range<usize>,
    predict: bool,
    alpha: f64,
) {
    let e_l = left.exponent(win, sfb);
    let e_r = right.exponent(win, sfb);
    // 相加最多增长 1 位, 预测项 |alpha| <= 3.2 再加 2 位
    let extra = if predict { 3 } else { 1 };
    let e = e_l.max(e_r).saturating_add(extra);
    for line in range {
        let l = spectrum::align_to_exp(left.mantissas[line], e_l, e);
        let mut r = spectrum::align_to_exp(right.mantissas[line], e_r, e);
        if predict && alpha != 0.0 {
            // 残差 + alpha * downmix (f64 系数, 结果截断回 i32)
            let pred = (f64::from(l) * alpha) as i64;
            r = (i64::from(r) + pred).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        }
        left.mantissas[line] = l + r;
        right.mantissas[line] = l - r;
    }
    left.set_exponent(win, sfb, e);
    right.set_exponent(win, sfb, e);
}
