//! 逐帧与跨帧状态结构.
//!
//! 逐帧结构 (`ChannelSpectralState`) 每帧从持久分配中重建; 跨帧状态
//! (`DecoderState`) 由解码器实例独占持有, 只在"帧关闭"点变更, 并在
//! 流不连续 (独立帧) 或声道/box 拓扑变化时整体复位.

use crate::mct::McHistory;
use crate::spectrum::SpectralBuffer;
use crate::tables::{FRAME_LEN, MAX_SFB, MAX_WINDOW_GROUPS, SHORT_WINDOWS};

/// 每 (窗口组, SFB) 槽位数
pub const GS_SLOTS: usize = MAX_WINDOW_GROUPS * MAX_SFB;

/// 窗口序列类型
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum WindowSequence {
    #[default]
    OnlyLong,
    LongStart,
    EightShort,
    LongStop,
}

impl WindowSequence {
    /// 从 2 位码流值构造
    pub fn from_bits(v: u32) -> Self {
        match v & 3 {
            0 => WindowSequence::OnlyLong,
            1 => WindowSequence::LongStart,
            2 => WindowSequence::EightShort,
            _ => WindowSequence::LongStop,
        }
    }

    /// 是否为短块序列
    pub fn is_short(self) -> bool {
        self == WindowSequence::EightShort
    }
}

/// ICS (individual channel stream) 信息
#[derive(Clone, Copy)]
pub struct IcsInfo {
    pub window_sequence: WindowSequence,
    pub window_shape: u8,
    pub max_sfb: usize,
    pub num_window_groups: usize,
    /// 各组包含的短窗口数 (长块: 1 组 1 窗)
    pub group_lengths: [u8; MAX_WINDOW_GROUPS],
    /// USAC 混叠对称标志 (LFE 必须为 0)
    pub prev_aliasing_symmetry: u8,
    pub curr_aliasing_symmetry: u8,
}

impl Default for IcsInfo {
    fn default() -> Self {
        Self {
            window_sequence: WindowSequence::OnlyLong,
            window_shape: 0,
            max_sfb: 0,
            num_window_groups: 1,
            group_lengths: [1, 0, 0, 0, 0, 0, 0, 0],
            prev_aliasing_symmetry: 0,
            curr_aliasing_symmetry: 0,
        }
    }
}

impl IcsInfo {
    /// 是否为短块
    pub fn is_short(&self) -> bool {
        self.window_sequence.is_short()
    }

    /// 窗口总数
    pub fn num_windows(&self) -> usize {
        if self.is_short() { SHORT_WINDOWS } else { 1 }
    }

    /// 组 g 的首个窗口索引
    pub fn group_start(&self, group: usize) -> usize {
        self.group_lengths[..group].iter().map(|&l| l as usize).sum()
    }
}

/// TNS 滤波器数据 (本 crate 只解析并保存, 滤波由外部协作者执行)
#[derive(Clone)]
pub struct TnsData {
    /// 每窗口滤波器个数
    pub n_filt: [u8; SHORT_WINDOWS],
    pub length: [[u8; 3]; SHORT_WINDOWS],
    pub order: [[u8; 3]; SHORT_WINDOWS],
    pub direction: [[bool; 3]; SHORT_WINDOWS],
    /// 系数索引 (coef_res 决定位宽)
    pub coef: [[[i8; 16]; 3]; SHORT_WINDOWS],
}

impl Default for TnsData {
    fn default() -> Self {
        Self {
            n_filt: [0; SHORT_WINDOWS],
            length: [[0; 3]; SHORT_WINDOWS],
            order: [[0; 3]; SHORT_WINDOWS],
            direction: [[false; 3]; SHORT_WINDOWS],
            coef: [[[0; 16]; 3]; SHORT_WINDOWS],
        }
    }
}

/// 每声道逐帧频谱状态
#[derive(Clone)]
pub struct ChannelSpectralState {
    pub ics: IcsInfo,
    pub global_gain: i32,
    /// 每 (组, SFB) 的码本索引, 索引 = `group * MAX_SFB + sfb`
    pub band_codebook: [u8; GS_SLOTS],
    pub scale_factors: [i32; GS_SLOTS],
    /// 量化谱线 (反量化前的整数幅值)
    pub quant: [i32; FRAME_LEN],
    /// 块浮点频谱 (反量化后)
    pub spectrum: SpectralBuffer,
    pub tns_present: bool,
    pub tns: TnsData,
    pub noise_level: u8,
    pub noise_offset: u8,
    /// 噪声填充合成 band 标记 (逐帧读取后清除, 供 MCT 立体声填充使用)
    pub band_is_noise: [bool; GS_SLOTS],
    /// 本帧渲染路径 id (由元素形态决定, 帧关闭时提交到跨帧历史)
    pub render_path: u8,
}

impl Default for ChannelSpectralState {
    fn default() -> Self {
        Self {
            ics: IcsInfo::default(),
            global_gain: 0,
            band_codebook: [0; GS_SLOTS],
            scale_factors: [0; GS_SLOTS],
            quant: [0; FRAME_LEN],
            spectrum: SpectralBuffer::default(),
            tns_present: false,
            tns: TnsData::default(),
            noise_level: 0,
            noise_offset: 0,
            band_is_noise: [false; GS_SLOTS],
            render_path: 0,
        }
    }
}

impl ChannelSpectralState {
    /// (组, SFB) 槽位索引
    #[inline]
    pub fn gs_index(group: usize, sfb: usize) -> usize {
        group * MAX_SFB + sfb
    }

    /// 帧首复位 (覆写逐帧字段, 不触碰任何跨帧状态)
    pub fn reset_frame(&mut self) {
        self.ics = IcsInfo::default();
        self.global_gain = 0;
        self.band_codebook.fill(0);
        self.scale_factors.fill(0);
        self.quant.fill(0);
        self.spectrum.clear();
        self.tns_present = false;
        self.tns = TnsData::default();
        self.noise_level = 0;
        self.noise_offset = 0;
        self.band_is_noise.fill(false);
        self.render_path = 0;
    }
}

/// 每声道跨帧历史
#[derive(Clone)]
pub struct ChannelHistory {
    /// 噪声填充随机种子 (跨帧持续)
    pub noise_seed: u32,
    /// 上一帧重建输出频谱 (MCT 立体声填充/全带系数预测参考)
    pub prev_spectrum: SpectralBuffer,
    /// 上一帧是否成功解码 (失败帧参考被清零)
    pub prev_valid: bool,
    /// 上一帧是否为短块
    pub prev_short: bool,
    /// 上一帧渲染路径 id (不一致时该声道的填充参考按零处理)
    pub prev_render_path: u8,
}

impl Default for ChannelHistory {
    fn default() -> Self {
        Self {
            noise_seed: 0x3039, // 固定初始种子
            prev_spectrum: SpectralBuffer::default(),
            prev_valid: false,
            prev_short: false,
            prev_render_path: 0,
        }
    }
}

/// 每声道对跨帧联合立体声状态
#[derive(Clone)]
pub struct JointStereoState {
    /// ms_mask_present (0=关, 1=逐带 mask, 2=全带, 3=复数预测)
    pub ms_mask_mode: u8,
    /// 复数预测方向 (0: 残差 = R - alpha*dmx, 1: 反向)
    pub pred_dir: bool,
    /// 每 (组, SFB) 的 MS 使用标志
    pub ms_used: [bool; GS_SLOTS],
    /// 复数预测系数索引 (当前帧重建值)
    pub alpha_q: [i32; MAX_SFB],
    /// 上一帧系数索引 (差分解码参考)
    pub prev_alpha_q: [i32; MAX_SFB],
    /// 上一帧 downmix 频谱 (复数预测历史)
    pub prev_dmx: SpectralBuffer,
    /// 上一帧窗口序列/形状 (块类型连续性判定)
    pub prev_window_sequence: WindowSequence,
    pub prev_window_shape: u8,
}

impl Default for JointStereoState {
    fn default() -> Self {
        Self {
            ms_mask_mode: 0,
            pred_dir: false,
            ms_used: [false; GS_SLOTS],
            alpha_q: [0; MAX_SFB],
            prev_alpha_q: [0; MAX_SFB],
            prev_dmx: SpectralBuffer::default(),
            prev_window_sequence: WindowSequence::OnlyLong,
            prev_window_shape: 0,
        }
    }
}

/// 解码器实例持久状态 (逐帧以 `&mut` 传入, 无环境/全局状态)
pub struct DecoderState {
    /// 每声道历史, 按配置时分配的稳定声道 id 索引
    pub channels: Vec<ChannelHistory>,
    /// 每声道对元素的联合立体声历史
    pub pairs: Vec<JointStereoState>,
    /// MCT 系数/拓扑历史
    pub mct: McHistory,
}

impl DecoderState {
    /// 按声道数/声道对数分配
    pub fn new(num_channels: usize, num_pairs: usize) -> Self {
        Self {
            channels: vec![ChannelHistory::default(); num_channels],
            pairs: vec![JointStereoState::default(); num_pairs],
            mct: McHistory::default(),
        }
    }

    /// 流不连续 (独立帧) 或拓扑变化时的整体复位
    ///
    /// 噪声种子按规范跨帧持续, 不参与复位.
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            let seed = ch.noise_seed;
            *ch = ChannelHistory::default();
            ch.noise_seed = seed;
        }
        for pair in &mut self.pairs {
            *pair = JointStereoState::default();
        }
        self.mct = McHistory::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_窗口序列() {
        assert_eq!(WindowSequence::from_bits(0), WindowSequence::OnlyLong);
        assert_eq!(WindowSequence::from_bits(2), WindowSequence::EightShort);
        assert!(WindowSequence::EightShort.is_short());
        assert!(!WindowSequence::LongStop.is_short());
    }

    #[test]
    fn test_组起始窗口() {
        let mut ics = IcsInfo {
            window_sequence: WindowSequence::EightShort,
            num_window_groups: 3,
            ..IcsInfo::default()
        };
        ics.group_lengths = [3, 2, 3, 0, 0, 0, 0, 0];
        assert_eq!(ics.group_start(0), 0);
        assert_eq!(ics.group_start(1), 3);
        assert_eq!(ics.group_start(2), 5);
    }

    #[test]
    fn test_状态复位保留种子() {
        let mut state = DecoderState::new(2, 1);
        state.channels[0].noise_seed = 0xDEAD_BEEF;
        state.channels[0].prev_valid = true;
        state.reset();
        assert_eq!(state.channels[0].noise_seed, 0xDEAD_BEEF);
        assert!(!state.channels[0].prev_valid);
    }
}
