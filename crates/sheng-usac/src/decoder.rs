//! 帧级解码门面: 串起 sequencer、声道重建与 MCT.
//!
//! 一帧处理到底, 无内部并行; 任何错误整帧上抛, 跨帧历史只在帧关闭点
//! 提交, 失败帧改为清除频谱参考. 调用方 (外部传输层) 负责逐帧供给
//! 定位好的位流与元素布局.

use log::{debug, warn};
use sheng_core::{BitReader, ShengError, ShengResult};

use crate::channel::ChannelSpectralDecoder;
use crate::config::{DecoderConfig, ElementShape};
use crate::external::{GapFiller, TnsProcessor};
use crate::huffman::Codebooks;
use crate::mct::MctEngine;
use crate::sequencer::BitstreamElementSequencer;
use crate::state::{ChannelSpectralState, DecoderState};

/// 一帧的外部引导参数
pub struct FrameParams<'a> {
    /// 元素布局 (声道按元素出现顺序编号)
    pub elements: &'a [ElementShape],
    /// 独立帧标志 (流不连续, 复位跨帧历史)
    pub independent: bool,
    /// 帧尾是否携带 MCT 信令
    pub mct_present: bool,
}

/// 帧解码器 (每实例独占全部跨帧状态)
pub struct FrameDecoder {
    config: DecoderConfig,
    codebooks: Codebooks,
    state: DecoderState,
    mct: MctEngine,
    /// 逐帧重建的声道状态 (持久分配)
    channels: Vec<ChannelSpectralState>,
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        let num_channels = config.num_channels;
        // 声道对元素数量上限: 每对声道一个
        let num_pairs = num_channels / 2;
        let mct = MctEngine::new(&config);
        Self {
            config,
            codebooks: Codebooks::build(),
            state: DecoderState::new(num_channels, num_pairs),
            mct,
            channels: vec![ChannelSpectralState::default(); num_channels],
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// 跨帧状态 (测试与诊断用)
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// 本帧重建的声道频谱
    pub fn channels(&self) -> &[ChannelSpectralState] {
        &self.channels
    }

    /// 解码一帧; 错误时本帧输出不可用, 跨帧参考已按失败处理
    pub fn decode_frame(
        &mut self,
        br: &mut BitReader,
        params: &FrameParams,
        tns: &mut dyn TnsProcessor,
        igf: &mut dyn GapFiller,
    ) -> ShengResult<()> {
        match self.decode_frame_inner(br, params, tns, igf) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("帧解码失败: {e}");
                self.mct.mark_failed(&mut self.state);
                // 全部声道的填充参考清除, 避免向前传播损坏数据
                for hist in &mut self.state.channels {
                    hist.prev_spectrum.clear();
                    hist.prev_valid = false;
                }
                Err(e)
            }
        }
    }

    fn decode_frame_inner(
        &mut self,
        br: &mut BitReader,
        params: &FrameParams,
        tns: &mut dyn TnsProcessor,
        igf: &mut dyn GapFiller,
    ) -> ShengResult<()> {
        let total: usize = params.elements.iter().map(|e| e.num_channels()).sum();
        if total != self.config.num_channels {
            return Err(ShengError::InvalidArgument(format!(
                "元素布局声道数 {total} 与配置 {} 不符",
                self.config.num_channels
            )));
        }
        if params.independent {
            self.state.reset();
        }

        let sequencer = BitstreamElementSequencer::new(&self.config, &self.codebooks);
        let ch_decoder = ChannelSpectralDecoder::new(&self.config);

        // 1. 元素级语法解析
        let mut ch = 0usize;
        let mut pair_idx = 0usize;
        let mut pair_of_channel = vec![None::<usize>; self.config.num_channels];
        for &shape in params.elements {
            let n = shape.num_channels();
            let slice = &mut self.channels[ch..ch + n];
            let pair = if shape == ElementShape::Cpe {
                pair_of_channel[ch] = Some(pair_idx);
                pair_of_channel[ch + 1] = Some(pair_idx);
                pair_idx += 1;
                Some(&mut self.state.pairs[pair_idx - 1])
            } else {
                None
            };
            sequencer.decode_element(br, shape, slice, pair)?;
            // 渲染路径由元素形态决定, 在帧关闭时提交到跨帧历史
            for st in self.channels[ch..ch + n].iter_mut() {
                st.render_path = shape.render_path();
            }
            ch += n;
        }

        // 2. 每声道反量化, 声道对做联合立体声, 然后噪声填充
        let mut ch = 0usize;
        for &shape in params.elements {
            let n = shape.num_channels();
            for c in ch..ch + n {
                ch_decoder.inverse_quantize(&mut self.channels[c]);
            }
            if shape == ElementShape::Cpe {
                let pair = &self.state.pairs[pair_of_channel[ch].unwrap_or(0)];
                let (left, right) = split_two(&mut self.channels, ch);
                ch_decoder.apply_joint_stereo(pair, left, right);
            }
            for c in ch..ch + n {
                let (st, hist) = (&mut self.channels[c], &mut self.state.channels[c]);
                ch_decoder.noise_fill(st, hist);
            }
            ch += n;
        }

        // 3. MCT: 全部声道就位后的跨声道 pass
        if params.mct_present {
            let is_short = self.channels[0].ics.is_short();
            self.mct
                .parse_frame(br, &mut self.state, is_short, params.independent)?;
            self.mct.apply(&mut self.channels, &mut self.state, igf)?;
        }

        // 4. 末段协作者: TNS 与 IGF tile 注入
        for c in 0..self.config.num_channels {
            ch_decoder.finish(c, &mut self.channels[c], tns, igf)?;
        }

        // 5. 帧关闭: 提交跨帧历史
        if params.mct_present {
            self.mct.save_frame(&self.channels, &mut self.state)?;
        }
        let mut ch = 0usize;
        for &shape in params.elements {
            if shape == ElementShape::Cpe {
                let pair = &mut self.state.pairs[pair_of_channel[ch].unwrap_or(0)];
                let (left, right) = split_two(&mut self.channels, ch);
                ch_decoder.update_pair_history(pair, left, right);
            }
            ch += shape.num_channels();
        }

        debug!("帧解码完成: {} 声道, {} 位", total, br.bits_read());
        Ok(())
    }
}

/// 借出相邻两个声道的可变引用
fn split_two(
    channels: &mut [ChannelSpectralState],
    first: usize,
) -> (&mut ChannelSpectralState, &mut ChannelSpectralState) {
    let (lo, hi) = channels.split_at_mut(first + 1);
    (&mut lo[first], &mut hi[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::external::{NoGapFill, NoOpTns};

    #[test]
    fn test_元素布局校验() {
        let config = DecoderConfig::new(48000, 2, Profile::Usac).unwrap();
        let mut dec = FrameDecoder::new(config);
        let mut tns = NoOpTns;
        let mut igf = NoGapFill;
        let data = [0u8; 16];
        let mut br = BitReader::new(&data);
        // 3 声道布局 vs 2 声道配置
        let params = FrameParams {
            elements: &[ElementShape::Sce, ElementShape::Cpe],
            independent: true,
            mct_present: false,
        };
        let err = dec
            .decode_frame(&mut br, &params, &mut tns, &mut igf)
            .unwrap_err();
        assert!(matches!(err, ShengError::InvalidArgument(_)));
    }
}
