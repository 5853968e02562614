//! 外部协作者接口.
//!
//! TNS 滤波与 IGF (intelligent gap filling) tile 系统不属于本 crate;
//! 核心只在流水线的既定位置经由这些 trait 调用它们. 随附的空实现使
//! 核心可以脱离完整解码器独立测试.

use sheng_core::ShengResult;

use crate::spectrum::SpectralBuffer;
use crate::state::IcsInfo;

/// TNS (temporal noise shaping) 滤波协作者
pub trait TnsProcessor {
    /// 对声道 `ch` 的频谱就地应用 TNS 综合滤波
    fn apply(
        &mut self,
        ch: usize,
        ics: &IcsInfo,
        tns: &crate::state::TnsData,
        spectrum: &mut SpectralBuffer,
    ) -> ShengResult<()>;

    /// 复位声道滤波历史
    fn reset(&mut self, ch: usize);
}

/// IGF tile 系统协作者
///
/// MCT 需要的只有 band 同步与按 tile 索引访问辅助频谱两类接口;
/// tile 的生成/注入逻辑完全在外部.
pub trait GapFiller {
    /// 同步声道对的 IGF band 划分 (MCT box 解析后调用)
    fn sync_bands(&mut self, ch_a: usize, ch_b: usize);

    /// 声道当前帧的 tile 数 (IGF 未激活时为 0)
    fn tile_count(&self, ch: usize) -> usize;

    /// 同时借出声道对同一 tile 的两个辅助频谱
    fn tile_pair(
        &mut self,
        ch_a: usize,
        ch_b: usize,
        tile: usize,
    ) -> Option<(&mut SpectralBuffer, &mut SpectralBuffer)>;

    /// 向声道频谱注入 tile 内容 (ChannelSpectralDecoder 末尾调用)
    fn inject(
        &mut self,
        ch: usize,
        ics: &IcsInfo,
        spectrum: &mut SpectralBuffer,
    ) -> ShengResult<()>;

    /// 声道是否启用强频谱白化 (立体声填充据此同步噪声种子)
    fn whitening_strong(&self, ch: usize) -> bool;
}

/// 空 TNS 实现 (独立测试用)
pub struct NoOpTns;

impl TnsProcessor for NoOpTns {
    fn apply(
        &mut self,
        _ch: usize,
        _ics: &IcsInfo,
        _tns: &crate::state::TnsData,
        _spectrum: &mut SpectralBuffer,
    ) -> ShengResult<()> {
        Ok(())
    }

    fn reset(&mut self, _ch: usize) {}
}

/// 空 IGF 实现 (IGF 关闭时使用)
pub struct NoGapFill;

impl GapFiller for NoGapFill {
    fn sync_bands(&mut self, _ch_a: usize, _ch_b: usize) {}

    fn tile_count(&self, _ch: usize) -> usize {
        0
    }

    fn tile_pair(
        &mut self,
        _ch_a: usize,
        _ch_b: usize,
        _tile: usize,
    ) -> Option<(&mut SpectralBuffer, &mut SpectralBuffer)> {
        None
    }

    fn inject(
        &mut self,
        _ch: usize,
        _ics: &IcsInfo,
        _spectrum: &mut SpectralBuffer,
    ) -> ShengResult<()> {
        Ok(())
    }

    fn whitening_strong(&self, _ch: usize) -> bool {
        false
    }
}
