//! MCT (multi-channel coding tool) 引擎.
//!
//! 每帧的处理按固定状态机推进:
//! `Idle → BoxesParsed → RotationApplied → SavedForNextFrame`.
//! 跨帧状态 (系数历史与上一帧输出频谱) 只在帧关闭点提交; 失败帧改为
//! 清除频谱参考, 下一帧的立体声填充按零贡献处理.

pub mod apply;
pub mod boxes;
pub mod coeffs;
pub mod filling;

use log::debug;
use sheng_core::{BitReader, ShengError, ShengResult};

use crate::config::DecoderConfig;
use crate::external::GapFiller;
use crate::state::{ChannelSpectralState, DecoderState};
use crate::tables::MAX_SFB;

pub use boxes::{McBox, McFrame, MAX_MCT_BOXES};
pub use coeffs::{CoefCodebooks, SignalingMode};

use coeffs::BoxCoefHistory;

/// MCT 跨帧历史 (解码器实例独占)
#[derive(Clone)]
pub struct McHistory {
    /// 上一帧信令模式 (delta_time 合法性判定)
    pub prev_mode: Option<SignalingMode>,
    /// 逐 box 系数历史
    pub boxes: [BoxCoefHistory; MAX_MCT_BOXES],
    /// 上一帧拓扑 (keep_topology 复用)
    pub prev_pairs: [(usize, usize); MAX_MCT_BOXES],
    pub prev_num_boxes: usize,
}

impl Default for McHistory {
    fn default() -> Self {
        Self {
            prev_mode: None,
            boxes: [BoxCoefHistory::default(); MAX_MCT_BOXES],
            prev_pairs: [(0, 0); MAX_MCT_BOXES],
            prev_num_boxes: 0,
        }
    }
}

/// 帧内状态机阶段
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum McPhase {
    Idle,
    BoxesParsed,
    RotationApplied,
    SavedForNextFrame,
}

/// MCT 引擎: 解析 box、应用变换、管理帧关闭
pub struct MctEngine {
    config: DecoderConfig,
    codebooks: CoefCodebooks,
    phase: McPhase,
    frame: Option<McFrame>,
    /// 本帧块类型 (系数历史提交时记录)
    frame_is_short: bool,
}

impl MctEngine {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            config: config.clone(),
            codebooks: CoefCodebooks::build(),
            phase: McPhase::Idle,
            frame: None,
            frame_is_short: false,
        }
    }

    pub fn phase(&self) -> McPhase {
        self.phase
    }

    /// 本帧解析出的信令 (测试与诊断用)
    pub fn frame(&self) -> Option<&McFrame> {
        self.frame.as_ref()
    }

    /// `Idle → BoxesParsed`: 解析 box 信令并重建全部系数
    ///
    /// 独立帧先整体复位跨帧历史 (噪声种子除外).
    pub fn parse_frame(
        &mut self,
        br: &mut BitReader,
        state: &mut DecoderState,
        is_short: bool,
        independent: bool,
    ) -> ShengResult<()> {
        if independent {
            state.reset();
        }
        self.phase = McPhase::Idle;
        let frame = boxes::parse_mct_frame(
            br,
            &self.codebooks,
            &state.mct,
            self.config.num_channels,
            is_short,
            independent,
        )?;
        for mc_box in &frame.boxes {
            if mc_box.ch_a >= self.config.num_channels
                || mc_box.ch_b >= self.config.num_channels
            {
                return Err(ShengError::InvalidData(format!(
                    "MCT 声道对 ({}, {}) 超出声道数 {}",
                    mc_box.ch_a, mc_box.ch_b, self.config.num_channels
                )));
            }
        }
        debug!(
            "MCT 帧解析: mode={:?}, boxes={}, stereo_filling={}",
            frame.mode,
            frame.boxes.len(),
            frame.stereo_filling
        );
        self.frame = Some(frame);
        self.frame_is_short = is_short;
        self.phase = McPhase::BoxesParsed;
        Ok(())
    }

    /// `BoxesParsed → RotationApplied`: 逐 box 应用变换与立体声填充
    ///
    /// `channels` 按稳定声道 id 排列; IGF tile 激活时同一算子对每个
    /// tile 的辅助频谱重复应用.
    pub fn apply(
        &mut self,
        channels: &mut [ChannelSpectralState],
        state: &mut DecoderState,
        igf: &mut dyn GapFiller,
    ) -> ShengResult<()> {
        if self.phase != McPhase::BoxesParsed {
            return Err(ShengError::Internal(format!(
                "MCT apply 阶段错误: {:?}",
                self.phase
            )));
        }
        let frame = self.frame.as_ref().ok_or_else(|| {
            ShengError::Internal("MCT apply 无已解析帧".into())
        })?;

        for mc_box in &frame.boxes {
            let (ch_a, ch_b) = (mc_box.ch_a, mc_box.ch_b);

            // 立体声填充: 仅角度模式 + 长块 + 帧标志
            if frame.stereo_filling
                && frame.mode == SignalingMode::AngleRotation
                && !self.frame_is_short
            {
                // tile pass 需要主频谱 pass 清除前的噪声标记
                let noise_marks = channels[ch_b].band_is_noise;
                let (prev_a, prev_b) = (&state.channels[ch_a], &state.channels[ch_b]);
                filling::stereo_fill_box(
                    &self.config.sfb_table,
                    mc_box,
                    &mut channels[ch_b],
                    prev_a,
                    prev_b,
                );
                // IGF tile 辅助频谱: 同一填充按 tile 重复
                if self.config.gap_filling {
                    let tiles = igf.tile_count(ch_a).min(igf.tile_count(ch_b));
                    for tile in 0..tiles {
                        if let Some((_, tile_b)) = igf.tile_pair(ch_a, ch_b, tile) {
                            filling::stereo_fill_tile(
                                &self.config.sfb_table,
                                mc_box,
                                channels[ch_b].ics.max_sfb,
                                &noise_marks,
                                &channels[ch_b].scale_factors,
                                tile_b,
                                &state.channels[ch_a],
                                &state.channels[ch_b],
                            );
                        }
                    }
                }
                // 强白化下同步两声道噪声种子, 保持声道间噪声相干
                if self.config.gap_filling
                    && (igf.whitening_strong(ch_a) || igf.whitening_strong(ch_b))
                {
                    let seed = state.channels[ch_a].noise_seed;
                    state.channels[ch_b].noise_seed = seed;
                }
            }

            if self.config.gap_filling {
                igf.sync_bands(ch_a, ch_b);
            }

            // 主频谱变换
            {
                let (a, b) = pair_mut(channels, ch_a, ch_b)?;
                let ics = a.ics;
                apply_box_transform(
                    &self.config,
                    frame.mode,
                    mc_box,
                    &ics,
                    &mut a.spectrum,
                    &mut b.spectrum,
                );
            }

            // IGF tile 辅助频谱: 同一算子按 tile 重复
            if self.config.gap_filling {
                let tiles = igf.tile_count(ch_a).min(igf.tile_count(ch_b));
                let ics = channels[ch_a].ics;
                for tile in 0..tiles {
                    if let Some((ta, tb)) = igf.tile_pair(ch_a, ch_b, tile) {
                        apply_box_transform(&self.config, frame.mode, mc_box, &ics, ta, tb);
                    }
                }
            }
        }

        self.phase = McPhase::RotationApplied;
        Ok(())
    }

    /// `RotationApplied → SavedForNextFrame`: 帧关闭, 提交跨帧历史
    pub fn save_frame(
        &mut self,
        channels: &[ChannelSpectralState],
        state: &mut DecoderState,
    ) -> ShengResult<()> {
        if self.phase != McPhase::RotationApplied {
            return Err(ShengError::Internal(format!(
                "MCT save_frame 阶段错误: {:?}",
                self.phase
            )));
        }
        let frame = self.frame.as_ref().ok_or_else(|| {
            ShengError::Internal("MCT save_frame 无已解析帧".into())
        })?;

        for (box_idx, mc_box) in frame.boxes.iter().enumerate() {
            let h = &mut state.mct.boxes[box_idx];
            let active = if mc_box.num_bands > 0 {
                mc_box.num_bands
            } else {
                MAX_SFB
            };
            h.indices = mc_box.coef_indices;
            h.was_short = self.frame_is_short;
            h.valid = true;
            // 激活宽度以上每帧回落到模式默认
            h.prepare(frame.mode, self.frame_is_short, active);
            state.mct.prev_pairs[box_idx] = (mc_box.ch_a, mc_box.ch_b);
        }
        state.mct.prev_num_boxes = frame.boxes.len();
        state.mct.prev_mode = Some(frame.mode);

        // 参与 box 的声道: 最终频谱存为下一帧的填充/预测参考
        for mc_box in &frame.boxes {
            for ch in [mc_box.ch_a, mc_box.ch_b] {
                let hist = &mut state.channels[ch];
                hist.prev_spectrum = channels[ch].spectrum.clone();
                hist.prev_valid = true;
                hist.prev_short = self.frame_is_short;
                hist.prev_render_path = channels[ch].render_path;
            }
        }

        self.phase = McPhase::SavedForNextFrame;
        Ok(())
    }

    /// 失败帧: 清除参与声道的频谱参考, 历史其余部分保持上一成功帧
    pub fn mark_failed(&mut self, state: &mut DecoderState) {
        if let Some(frame) = &self.frame {
            for mc_box in &frame.boxes {
                for ch in [mc_box.ch_a, mc_box.ch_b] {
                    if let Some(hist) = state.channels.get_mut(ch) {
                        hist.prev_spectrum.clear();
                        hist.prev_valid = false;
                    }
                }
            }
        }
        self.frame = None;
        self.phase = McPhase::Idle;
    }
}

/// 对 box 覆盖的全部 band 应用模式算子
fn apply_box_transform(
    config: &DecoderConfig,
    mode: SignalingMode,
    mc_box: &McBox,
    ics: &crate::state::IcsInfo,
    a: &mut crate::spectrum::SpectralBuffer,
    b: &mut crate::spectrum::SpectralBuffer,
) {
    let is_short = ics.is_short();
    let max_sfb = ics.max_sfb;
    let active_bands = if mc_box.num_bands > 0 {
        mc_box.num_bands.min(max_sfb)
    } else {
        max_sfb
    };

    for group in 0..ics.num_window_groups {
        let group_start = ics.group_start(group);
        let group_len = ics.group_lengths[group] as usize;
        for sfb in 0..active_bands {
            if !mc_box.mask[sfb] {
                continue;
            }
            let idx = mc_box.coef_indices[sfb];
            for win_in_group in 0..group_len {
                let win = group_start + win_in_group;
                let range = config.sfb_table.line_range(is_short, win, sfb);
                match mode {
                    SignalingMode::AngleRotation => {
                        apply::rotate_band(idx, a, b, win, sfb, range);
                    }
                    SignalingMode::AlphaPrediction => {
                        apply::predict_band(idx, mc_box.pred_dir, a, b, win, sfb, range);
                    }
                }
            }
        }
    }
}

/// 同一切片中借出两个不同声道的可变引用
fn pair_mut(
    channels: &mut [ChannelSpectralState],
    a: usize,
    b: usize,
) -> ShengResult<(&mut ChannelSpectralState, &mut ChannelSpectralState)> {
    if a == b || a >= channels.len() || b >= channels.len() {
        return Err(ShengError::Internal(format!("非法声道对 ({a}, {b})")));
    }
    if a < b {
        let (lo, hi) = channels.split_at_mut(b);
        Ok((&mut lo[a], &mut hi[0]))
    } else {
        let (lo, hi) = channels.split_at_mut(a);
        Ok((&mut hi[0], &mut lo[b]))
    }
}
