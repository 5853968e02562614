//! 解码器配置.
//!
//! 全部缓冲上限 (声道数, box 数, 每 box band 数) 在配置时刻固定;
//! 超限一律报错, 不做静默截断.

use sheng_core::{ShengError, ShengResult};

use crate::tables::{MAX_CHANNELS, SfbTable};

/// 码流 profile: 决定通道元素使用的语法表
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Profile {
    /// 经典路径: section data + scale factor + Huffman 谱数据
    Classic,
    /// USAC 路径: 无 section data, scale factor 前置 LTP/混叠对称标志,
    /// 谱数据全部走 escape 码本
    Usac,
}

/// 通道元素形态
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ElementShape {
    /// 单声道元素
    Sce,
    /// 声道对元素
    Cpe,
    /// 低频效果声道 (只允许长块, 零混叠对称, 无 TNS)
    Lfe,
}

impl ElementShape {
    /// 元素占用的声道数
    pub fn num_channels(self) -> usize {
        match self {
            ElementShape::Cpe => 2,
            _ => 1,
        }
    }

    /// 渲染路径 id: LFE 走受限路径, 其余为全带谱路径.
    /// 路径不同的声道不能互为立体声填充参考.
    pub fn render_path(self) -> u8 {
        match self {
            ElementShape::Lfe => 1,
            _ => 0,
        }
    }
}

/// 解码器实例配置 (创建后不可变)
#[derive(Clone)]
pub struct DecoderConfig {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道总数
    pub num_channels: usize,
    /// SFB 边界描述符 (长/短块各一张)
    pub sfb_table: SfbTable,
    /// 语法 profile
    pub profile: Profile,
    /// 噪声填充开关
    pub noise_filling: bool,
    /// IGF (gap filling) 开关
    pub gap_filling: bool,
    /// 错误保护 profile (语法元素区间 CRC-16 校验)
    pub error_protection: bool,
}

impl DecoderConfig {
    /// 创建配置; 校验采样率与声道数上限
    pub fn new(sample_rate: u32, num_channels: usize, profile: Profile) -> ShengResult<Self> {
        let sfb_table = SfbTable::for_sample_rate(sample_rate).ok_or_else(|| {
            ShengError::InvalidArgument(format!("不支持的采样率: {sample_rate}"))
        })?;
        if num_channels == 0 || num_channels > MAX_CHANNELS {
            return Err(ShengError::InvalidArgument(format!(
                "声道数 {num_channels} 超出范围 [1, {MAX_CHANNELS}]"
            )));
        }
        Ok(Self {
            sample_rate,
            num_channels,
            sfb_table,
            profile,
            noise_filling: true,
            gap_filling: false,
            error_protection: false,
        })
    }
}
