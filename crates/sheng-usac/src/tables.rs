//! 固定常量表: 采样率索引、scale factor band 边界与帧几何.
//!
//! SFB 边界为逐采样率/块长类别的 ISO 常量 (ISO/IEC 14496-3), 逐帧不变.
//! 边界单调递增; common-window 生效时声道对的两个声道共用同一张表.

/// 帧长 (长块谱线数)
pub const FRAME_LEN: usize = 1024;

/// 短块窗口数
pub const SHORT_WINDOWS: usize = 8;

/// 短块窗口长度 (谱线数)
pub const SHORT_LEN: usize = FRAME_LEN / SHORT_WINDOWS;

/// 每声道 SFB 存储上限 (mask 位宽上限与之一致)
pub const MAX_SFB: usize = 64;

/// 窗口组上限
pub const MAX_WINDOW_GROUPS: usize = 8;

/// 解码器实例声道数上限
pub const MAX_CHANNELS: usize = 16;

/// 噪声填充起始谱线 (长块; 短块按窗口长度等比例折算)
pub const NOISE_FILL_START_LINE: usize = 160;

/// 噪声能量相对 global_gain 的固定偏移
pub const NOISE_OFFSET: i32 = 90;

/// 首个噪声 band 9 位 PCM 值的居中偏移
pub const NOISE_PRE: i32 = 256;

/// 采样率索引表
pub const SAMPLE_RATES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

/// 44100/48000Hz 下 1024 点 LONG 窗口的 SFB 边界 (49 个 band)
#[rustfmt::skip]
pub const SWB_OFFSET_1024_48000: [usize; 50] = [
    0, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 48, 56, 64, 72, 80, 88, 96, 108, 120, 132, 144, 160,
    176, 196, 216, 240, 264, 292, 320, 352, 384, 416, 448, 480, 512, 544, 576, 608, 640, 672, 704,
    736, 768, 800, 832, 864, 896, 928, 1024,
];

/// 44100/48000Hz 下 128 点 SHORT 窗口的 SFB 边界 (14 个 band)
#[rustfmt::skip]
pub const SWB_OFFSET_128_48000: [usize; 15] = [
    0, 4, 8, 12, 16, 20, 28, 36, 44, 56, 68, 80, 96, 112, 128,
];

/// SFB 边界描述符 (由调用方按采样率/配置选定, 两种块长各一张表)
#[derive(Clone, Copy)]
pub struct SfbTable {
    /// LONG 窗口边界 (len = num_long_sfb + 1)
    pub long_offsets: &'static [usize],
    /// SHORT 窗口边界 (len = num_short_sfb + 1)
    pub short_offsets: &'static [usize],
}

impl SfbTable {
    /// 按采样率选择内置边界表; 不支持的采样率返回 None
    pub fn for_sample_rate(sample_rate: u32) -> Option<Self> {
        match sample_rate {
            44100 | 48000 => Some(Self {
                long_offsets: &SWB_OFFSET_1024_48000,
                short_offsets: &SWB_OFFSET_128_48000,
            }),
            _ => None,
        }
    }

    /// LONG 窗口 SFB 数
    pub fn num_long_sfb(&self) -> usize {
        self.long_offsets.len() - 1
    }

    /// SHORT 窗口 SFB 数
    pub fn num_short_sfb(&self) -> usize {
        self.short_offsets.len() - 1
    }

    /// 给定块长下的 SFB 数
    pub fn num_sfb(&self, is_short: bool) -> usize {
        if is_short {
            self.num_short_sfb()
        } else {
            self.num_long_sfb()
        }
    }

    /// 给定 (块长, 窗口, SFB) 的谱线区间 (帧内绝对索引)
    ///
    /// SHORT 块中窗口 w 占据 `[w*128, (w+1)*128)`, band 区间在其内偏移.
    pub fn line_range(&self, is_short: bool, window: usize, sfb: usize) -> std::ops::Range<usize> {
        if is_short {
            let base = window * SHORT_LEN;
            base + self.short_offsets[sfb]..base + self.short_offsets[sfb + 1]
        } else {
            self.long_offsets[sfb]..self.long_offsets[sfb + 1]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_边界单调递增() {
        for w in SWB_OFFSET_1024_48000.windows(2) {
            assert!(w[0] < w[1]);
        }
        for w in SWB_OFFSET_128_48000.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert_eq!(*SWB_OFFSET_1024_48000.last().unwrap(), FRAME_LEN);
        assert_eq!(*SWB_OFFSET_128_48000.last().unwrap(), SHORT_LEN);
    }

    #[test]
    fn test_采样率选表() {
        let t = SfbTable::for_sample_rate(48000).unwrap();
        assert_eq!(t.num_long_sfb(), 49);
        assert_eq!(t.num_short_sfb(), 14);
        assert!(SfbTable::for_sample_rate(96000).is_none());
    }

    #[test]
    fn test_短块谱线区间() {
        let t = SfbTable::for_sample_rate(48000).unwrap();
        assert_eq!(t.line_range(true, 0, 0), 0..4);
        assert_eq!(t.line_range(true, 2, 0), 256..260);
        assert_eq!(t.line_range(false, 0, 48), 928..1024);
    }
}
