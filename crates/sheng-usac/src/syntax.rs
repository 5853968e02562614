//! 通道元素语法表.
//!
//! 每种 (元素形态, profile) 组合有一张静态表, 按码流出现顺序列出语法
//! token; `Link` 条目按"最近一次判定位"在两个续接点之间选择, `NextChannel`
//! 在声道对内推进声道而不重启表. 表本身不做 I/O, 由 walker 驱动,
//! 可脱离码流单独测试.

use crate::config::{ElementShape, Profile};

/// 语法 token: 每个对应 sequencer 的一个子读取器
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Token {
    /// 元素实例标签 (4 位)
    InstanceTag,
    /// common_window 判定位
    CommonWindow,
    /// ICS 信息 (公共窗路径下写入声道对的两个声道)
    IcsInfo,
    /// 公共窗下的 common_max_sfb 判定位
    CommonMaxSfb,
    /// M/S 标志与复数预测系数
    MsFlags,
    /// 全局增益 (8 位)
    GlobalGain,
    /// 经典路径 section 数据
    SectionData,
    /// 经典路径 scale factor 差分数据
    ScaleFactors,
    /// USAC 路径 scale factor 数据 (前置 LTP 参数与混叠对称标志)
    ScaleFactorsUsac,
    /// tns_data_present 判定位
    TnsPresence,
    /// TNS 滤波器数据
    TnsData,
    /// gain_control_data_present (置位即不支持)
    GainControl,
    /// 噪声填充 level/offset (3 + 5 位)
    NoiseFill,
    /// 量化谱数据
    SpectralData,
}

/// 语法表条目
#[derive(Clone, Copy, Debug)]
pub enum Entry {
    /// 读取一个 token
    Tok(Token),
    /// 推进到声道对的下一声道
    NextChannel,
    /// 按最近判定位跳转 (0 → `on_zero`, 1 → `on_one`)
    Link { on_zero: usize, on_one: usize },
    /// 元素结束
    End,
}

use Entry::{End, Link, NextChannel, Tok};
use Token::*;

// ============================================================
// 静态语法表
// ============================================================

/// 经典路径 SCE (LFE 同表, 额外约束由 sequencer 检查)
pub static CLASSIC_SCE: [Entry; 11] = [
    /*  0 */ Tok(InstanceTag),
    /*  1 */ Tok(GlobalGain),
    /*  2 */ Tok(IcsInfo),
    /*  3 */ Tok(SectionData),
    /*  4 */ Tok(ScaleFactors),
    /*  5 */ Tok(TnsPresence),
    /*  6 */ Link { on_zero: 8, on_one: 7 },
    /*  7 */ Tok(TnsData),
    /*  8 */ Tok(GainControl),
    /*  9 */ Tok(SpectralData),
    /* 10 */ End,
];

/// 经典路径 CPE: 索引 3 起为独立窗路径, 23 起为公共窗路径
pub static CLASSIC_CPE: [Entry; 43] = [
    /*  0 */ Tok(InstanceTag),
    /*  1 */ Tok(CommonWindow),
    /*  2 */ Link { on_zero: 3, on_one: 23 },
    // ---- 独立窗: 每声道自带 ICS ----
    /*  3 */ Tok(GlobalGain),
    /*  4 */ Tok(IcsInfo),
    /*  5 */ Tok(SectionData),
    /*  6 */ Tok(ScaleFactors),
    /*  7 */ Tok(TnsPresence),
    /*  8 */ Link { on_zero: 10, on_one: 9 },
    /*  9 */ Tok(TnsData),
    /* 10 */ Tok(GainControl),
    /* 11 */ Tok(SpectralData),
    /* 12 */ NextChannel,
    /* 13 */ Tok(GlobalGain),
    /* 14 */ Tok(IcsInfo),
    /* 15 */ Tok(SectionData),
    /* 16 */ Tok(ScaleFactors),
    /* 17 */ Tok(TnsPresence),
    /* 18 */ Link { on_zero: 20, on_one: 19 },
    /* 19 */ Tok(TnsData),
    /* 20 */ Tok(GainControl),
    /* 21 */ Tok(SpectralData),
    /* 22 */ End,
    // ---- 公共窗: 共享 ICS + M/S ----
    /* 23 */ Tok(IcsInfo),
    /* 24 */ Tok(MsFlags),
    /* 25 */ Tok(GlobalGain),
    /* 26 */ Tok(SectionData),
    /* 27 */ Tok(ScaleFactors),
    /* 28 */ Tok(TnsPresence),
    /* 29 */ Link { on_zero: 31, on_one: 30 },
    /* 30 */ Tok(TnsData),
    /* 31 */ Tok(GainControl),
    /* 32 */ Tok(SpectralData),
    /* 33 */ NextChannel,
    /* 34 */ Tok(GlobalGain),
    /* 35 */ Tok(SectionData),
    /* 36 */ Tok(ScaleFactors),
    /* 37 */ Tok(TnsPresence),
    /* 38 */ Link { on_zero: 40, on_one: 39 },
    /* 39 */ Tok(TnsData),
    /* 40 */ Tok(GainControl),
    /* 41 */ Tok(SpectralData),
    /* 42 */ End,
];

/// USAC 路径 SCE
pub static USAC_SCE: [Entry; 9] = [
    /* 0 */ Tok(GlobalGain),
    /* 1 */ Tok(NoiseFill),
    /* 2 */ Tok(IcsInfo),
    /* 3 */ Tok(TnsPresence),
    /* 4 */ Tok(ScaleFactorsUsac),
    /* 5 */ Link { on_zero: 7, on_one: 6 },
    /* 6 */ Tok(TnsData),
    /* 7 */ Tok(SpectralData),
    /* 8 */ End,
];

/// USAC 路径 LFE: 无噪声填充, TNS 存在位必须为 0
pub static USAC_LFE: [Entry; 8] = [
    /* 0 */ Tok(GlobalGain),
    /* 1 */ Tok(IcsInfo),
    /* 2 */ Tok(TnsPresence),
    /* 3 */ Tok(ScaleFactorsUsac),
    /* 4 */ Link { on_zero: 6, on_one: 5 },
    /* 5 */ Tok(TnsData),
    /* 6 */ Tok(SpectralData),
    /* 7 */ End,
];

/// USAC 路径 CPE: 索引 2 起为独立窗路径, 20 起为公共窗路径
pub static USAC_CPE: [Entry; 39] = [
    /*  0 */ Tok(CommonWindow),
    /*  1 */ Link { on_zero: 2, on_one: 20 },
    // ---- 独立窗 ----
    /*  2 */ Tok(GlobalGain),
    /*  3 */ Tok(NoiseFill),
    /*  4 */ Tok(IcsInfo),
    /*  5 */ Tok(TnsPresence),
    /*  6 */ Tok(ScaleFactorsUsac),
    /*  7 */ Link { on_zero: 9, on_one: 8 },
    /*  8 */ Tok(TnsData),
    /*  9 */ Tok(SpectralData),
    /* 10 */ NextChannel,
    /* 11 */ Tok(GlobalGain),
    /* 12 */ Tok(NoiseFill),
    /* 13 */ Tok(IcsInfo),
    /* 14 */ Tok(TnsPresence),
    /* 15 */ Tok(ScaleFactorsUsac),
    /* 16 */ Link { on_zero: 18, on_one: 17 },
    /* 17 */ Tok(TnsData),
    /* 18 */ Tok(SpectralData),
    /* 19 */ End,
    // ---- 公共窗 ----
    /* 20 */ Tok(IcsInfo),
    /* 21 */ Tok(CommonMaxSfb),
    /* 22 */ Tok(MsFlags),
    /* 23 */ Tok(GlobalGain),
    /* 24 */ Tok(NoiseFill),
    /* 25 */ Tok(TnsPresence),
    /* 26 */ Tok(ScaleFactorsUsac),
    /* 27 */ Link { on_zero: 29, on_one: 28 },
    /* 28 */ Tok(TnsData),
    /* 29 */ Tok(SpectralData),
    /* 30 */ NextChannel,
    /* 31 */ Tok(GlobalGain),
    /* 32 */ Tok(NoiseFill),
    /* 33 */ Tok(TnsPresence),
    /* 34 */ Tok(ScaleFactorsUsac),
    /* 35 */ Link { on_zero: 37, on_one: 36 },
    /* 36 */ Tok(TnsData),
    /* 37 */ Tok(SpectralData),
    /* 38 */ End,
];

/// 按 (元素形态, profile) 选表
pub fn element_table(shape: ElementShape, profile: Profile) -> &'static [Entry] {
    match (profile, shape) {
        (Profile::Classic, ElementShape::Sce | ElementShape::Lfe) => &CLASSIC_SCE,
        (Profile::Classic, ElementShape::Cpe) => &CLASSIC_CPE,
        (Profile::Usac, ElementShape::Sce) => &USAC_SCE,
        (Profile::Usac, ElementShape::Lfe) => &USAC_LFE,
        (Profile::Usac, ElementShape::Cpe) => &USAC_CPE,
    }
}

// ============================================================
// Walker
// ============================================================

/// 语法表游标: 显式 cursor + 一个"最近判定位"寄存器
pub struct SyntaxWalker {
    table: &'static [Entry],
    cursor: usize,
    channel: usize,
    decision: u32,
}

impl SyntaxWalker {
    pub fn new(shape: ElementShape, profile: Profile) -> Self {
        Self {
            table: element_table(shape, profile),
            cursor: 0,
            channel: 0,
            decision: 0,
        }
    }

    /// 记录判定位 (由读取 CommonWindow/TnsPresence 等 token 的调用方回写)
    pub fn set_decision(&mut self, bit: u32) {
        self.decision = bit & 1;
    }

    /// 下一个待读取 token 及其目标声道; `None` 表示元素结束
    pub fn next(&mut self) -> Option<(Token, usize)> {
        loop {
            match self.table[self.cursor] {
                Entry::Tok(t) => {
                    self.cursor += 1;
                    return Some((t, self.channel));
                }
                Entry::NextChannel => {
                    self.channel += 1;
                    self.cursor += 1;
                }
                Entry::Link { on_zero, on_one } => {
                    self.cursor = if self.decision != 0 { on_one } else { on_zero };
                }
                Entry::End => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 以固定判定序列走完一张表, 收集 (token, 声道)
    fn walk(
        shape: ElementShape,
        profile: Profile,
        decisions: &[(Token, u32)],
    ) -> Vec<(Token, usize)> {
        let mut w = SyntaxWalker::new(shape, profile);
        let mut out = Vec::new();
        while let Some((tok, ch)) = w.next() {
            out.push((tok, ch));
            for &(t, bit) in decisions {
                if t == tok {
                    w.set_decision(bit);
                }
            }
        }
        out
    }

    #[test]
    fn test_sce表_tns分支() {
        let with_tns = walk(ElementShape::Sce, Profile::Classic, &[(TnsPresence, 1)]);
        assert!(with_tns.contains(&(TnsData, 0)));
        let without = walk(ElementShape::Sce, Profile::Classic, &[(TnsPresence, 0)]);
        assert!(!without.iter().any(|&(t, _)| t == TnsData));
        assert!(without.contains(&(SpectralData, 0)));
    }

    #[test]
    fn test_cpe表_公共窗路径() {
        let toks = walk(
            ElementShape::Cpe,
            Profile::Usac,
            &[(CommonWindow, 1), (TnsPresence, 0)],
        );
        // 公共窗: 一个共享 ICS + common_max_sfb + M/S, 两个声道各一份谱数据
        assert_eq!(toks.iter().filter(|&&(t, _)| t == IcsInfo).count(), 1);
        assert!(toks.contains(&(CommonMaxSfb, 0)));
        assert!(toks.contains(&(MsFlags, 0)));
        assert_eq!(
            toks.iter().filter(|&&(t, _)| t == SpectralData).count(),
            2
        );
        assert!(toks.contains(&(SpectralData, 1)));
    }

    #[test]
    fn test_cpe表_独立窗路径() {
        let toks = walk(
            ElementShape::Cpe,
            Profile::Usac,
            &[(CommonWindow, 0), (TnsPresence, 0)],
        );
        // 独立窗: 每声道各自 ICS, 无 M/S
        assert_eq!(toks.iter().filter(|&&(t, _)| t == IcsInfo).count(), 2);
        assert!(!toks.iter().any(|&(t, _)| t == MsFlags));
    }

    #[test]
    fn test_usac_lfe表_无噪声填充() {
        let toks = walk(ElementShape::Lfe, Profile::Usac, &[(TnsPresence, 0)]);
        assert!(!toks.iter().any(|&(t, _)| t == NoiseFill));
        assert!(toks.contains(&(SpectralData, 0)));
    }

    #[test]
    fn test_链接目标合法() {
        for table in [
            &CLASSIC_SCE[..],
            &CLASSIC_CPE[..],
            &USAC_SCE[..],
            &USAC_LFE[..],
            &USAC_CPE[..],
        ] {
            for entry in table {
                if let Entry::Link { on_zero, on_one } = *entry {
                    assert!(on_zero < table.len());
                    assert!(on_one < table.len());
                }
            }
        }
    }
}
