//! MCT 系数: Huffman 码表、角度/alpha 查找表与差分重建.
//!
//! 两种信令模式各有专用码表, 字母表均为 64 个符号:
//! - 角度模式: 符号即角度索引, 差分后按字母表长度回绕, 索引 32 为
//!   默认值 (45 度, cos = sin)
//! - alpha 模式: 符号减偏移 32 为有符号增量, 步长 0.1, 结果必须落在
//!   索引有效区间内, 越界按解码错误处理

use sheng_core::{BitReader, ShengError, ShengResult};

use crate::huffman::HuffTree;
use crate::tables::MAX_SFB;

/// 系数字母表长度 (两种模式一致)
pub const COEF_ALPHABET: i32 = 64;

/// 角度模式默认索引 (45 度)
pub const DEFAULT_ANGLE_IDX: i32 = 32;

/// alpha 模式默认索引 (alpha = 0)
pub const DEFAULT_ALPHA_IDX: i32 = 32;

/// alpha 索引偏移
pub const ALPHA_BIAS: i32 = 32;

/// 系数信令模式
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SignalingMode {
    /// 能量/alpha 预测
    AlphaPrediction,
    /// 角度旋转
    AngleRotation,
}

impl SignalingMode {
    pub fn from_bit(bit: u32) -> Self {
        if bit != 0 {
            SignalingMode::AngleRotation
        } else {
            SignalingMode::AlphaPrediction
        }
    }

    /// 模式默认系数索引 (差分预测器初值)
    pub fn default_index(self) -> i32 {
        match self {
            SignalingMode::AlphaPrediction => DEFAULT_ALPHA_IDX,
            SignalingMode::AngleRotation => DEFAULT_ANGLE_IDX,
        }
    }
}

/// 两种模式的解码树 (解码器打开时构建一次)
pub struct CoefCodebooks {
    pub angle_tree: HuffTree,
    pub alpha_tree: HuffTree,
}

impl CoefCodebooks {
    pub fn build() -> Self {
        Self {
            angle_tree: HuffTree::build_from(&MCT_ANGLE_CODES, &MCT_ANGLE_BITS),
            alpha_tree: HuffTree::build_from(&MCT_ALPHA_CODES, &MCT_ALPHA_BITS),
        }
    }

    pub fn tree(&self, mode: SignalingMode) -> &HuffTree {
        match mode {
            SignalingMode::AlphaPrediction => &self.alpha_tree,
            SignalingMode::AngleRotation => &self.angle_tree,
        }
    }
}

/// 解码一个系数增量 (码字符号减偏移 32 即有符号增量)
pub fn decode_delta(
    codebooks: &CoefCodebooks,
    mode: SignalingMode,
    br: &mut BitReader,
) -> ShengResult<i32> {
    let sym = codebooks.tree(mode).decode(br)?;
    Ok(sym - ALPHA_BIAS)
}

/// 差分重建: 预测器 + 增量 → 系数索引
///
/// 角度模式按字母表长度回绕后必须落在 [0, 64); alpha 模式不回绕,
/// 越界即解码错误.
pub fn reconstruct_index(
    mode: SignalingMode,
    predictor: i32,
    delta: i32,
) -> ShengResult<i32> {
    match mode {
        SignalingMode::AngleRotation => {
            let idx = (predictor + delta).rem_euclid(COEF_ALPHABET);
            if !(0..COEF_ALPHABET).contains(&idx) {
                return Err(ShengError::Decode(format!(
                    "角度索引 {idx} 超出 [0, {COEF_ALPHABET})"
                )));
            }
            Ok(idx)
        }
        SignalingMode::AlphaPrediction => {
            let idx = predictor + delta;
            if !(0..COEF_ALPHABET).contains(&idx) {
                return Err(ShengError::Decode(format!(
                    "alpha 索引 {idx} 超出 [0, {COEF_ALPHABET})"
                )));
            }
            Ok(idx)
        }
    }
}

/// 单个 box 的逐带系数历史
#[derive(Clone, Copy)]
pub struct BoxCoefHistory {
    /// 上一帧系数索引, 逐带
    pub indices: [i32; MAX_SFB],
    /// 上一帧是否为短块
    pub was_short: bool,
    /// 历史是否有效 (独立帧/拓扑复位后为 false)
    pub valid: bool,
}

impl Default for BoxCoefHistory {
    fn default() -> Self {
        Self {
            indices: [DEFAULT_ANGLE_IDX; MAX_SFB],
            was_short: false,
            valid: false,
        }
    }
}

impl BoxCoefHistory {
    /// 按模式默认值复位全部历史
    pub fn reset(&mut self, mode: SignalingMode) {
        self.indices = [mode.default_index(); MAX_SFB];
        self.valid = false;
    }

    /// 帧首历史整理: 块类型翻转则整体回落到模式默认,
    /// 激活 mask 宽度以上的槽位每帧都回落
    pub fn prepare(&mut self, mode: SignalingMode, is_short: bool, active_bands: usize) {
        if self.was_short != is_short {
            self.reset(mode);
        }
        for idx in self.indices[active_bands.min(MAX_SFB)..].iter_mut() {
            *idx = mode.default_index();
        }
    }
}

// ============================================================
// 固定查找表
// ============================================================

/// 角度模式 Huffman 码表 (64 符号, 最长 15 位)
#[rustfmt::skip]
pub const MCT_ANGLE_CODES: [u32; 64] = [
    0x07fe6, 0x07fe7, 0x07fe8, 0x07fe9, 0x07fea, 0x07feb, 0x07fec, 0x07fed,
    0x07fee, 0x07fef, 0x07ff0, 0x07ff1, 0x07ff2, 0x07ff3, 0x03ff0, 0x01ff4,
    0x01ff5, 0x00ff8, 0x007f8, 0x007f9, 0x003f8, 0x003f9, 0x001fa, 0x000fa,
    0x000fb, 0x0007a, 0x0003a, 0x0003b, 0x0001a, 0x0000a, 0x0000b, 0x00002,
    0x00000, 0x00003, 0x00004, 0x0000c, 0x0001b, 0x0001c, 0x0003c, 0x0007b,
    0x0007c, 0x000fc, 0x001fb, 0x003fa, 0x003fb, 0x007fa, 0x007fb, 0x00ff9,
    0x01ff6, 0x01ff7, 0x03ff1, 0x03ff2, 0x07ff4, 0x07ff5, 0x07ff6, 0x07ff7,
    0x07ff8, 0x07ff9, 0x07ffa, 0x07ffb, 0x07ffc, 0x07ffd, 0x07ffe, 0x07fff,
];

#[rustfmt::skip]
pub const MCT_ANGLE_BITS: [u8; 64] = [
    15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 14, 13,
    13, 12, 11, 11, 10, 10,  9,  8,  8,  7,  6,  6,  5,  4,  4,  3,
     2,  3,  3,  4,  5,  5,  6,  7,  7,  8,  9, 10, 10, 11, 11, 12,
    13, 13, 14, 14, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15, 15,
];

/// alpha 模式 Huffman 码表 (64 符号, 最长 13 位)
#[rustfmt::skip]
pub const MCT_ALPHA_CODES: [u32; 64] = [
    0x01ffa, 0x01ffb, 0x01ffc, 0x01ffd, 0x00ff8, 0x00ff9, 0x007f4, 0x007f5,
    0x007f6, 0x007f7, 0x003f4, 0x003f5, 0x003f6, 0x001f4, 0x001f5, 0x001f6,
    0x000f4, 0x000f5, 0x000f6, 0x00074, 0x00075, 0x00076, 0x00034, 0x00035,
    0x00036, 0x00014, 0x00015, 0x00016, 0x00002, 0x00003, 0x00004, 0x00005,
    0x00000, 0x00006, 0x00007, 0x00008, 0x00009, 0x00017, 0x00018, 0x00019,
    0x00037, 0x00038, 0x00039, 0x00077, 0x00078, 0x00079, 0x000f7, 0x000f8,
    0x000f9, 0x001f7, 0x001f8, 0x001f9, 0x003f7, 0x003f8, 0x003f9, 0x007f8,
    0x007f9, 0x007fa, 0x007fb, 0x00ffa, 0x00ffb, 0x00ffc, 0x01ffe, 0x01fff,
];

#[rustfmt::skip]
pub const MCT_ALPHA_BITS: [u8; 64] = [
    13, 13, 13, 13, 12, 12, 11, 11, 11, 11, 10, 10, 10,  9,  9,  9,
     8,  8,  8,  7,  7,  7,  6,  6,  6,  5,  5,  5,  4,  4,  4,  4,
     3,  4,  4,  4,  4,  5,  5,  5,  6,  6,  6,  7,  7,  7,  8,  8,
     8,  9,  9,  9, 10, 10, 10, 11, 11, 11, 11, 12, 12, 12, 13, 13,
];

/// 角度索引 → cos (Q31); 索引 n 对应 n * 90/64 度
#[rustfmt::skip]
pub const ANGLE_COS_Q31: [i32; 64] = [
    0x7fffffff, 0x7ff62182, 0x7fd8878e, 0x7fa736b4,
    0x7f62368f, 0x7f0991c4, 0x7e9d55fc, 0x7e1d93ea,
    0x7d8a5f40, 0x7ce3ceb2, 0x7c29fbee, 0x7b5d039e,
    0x7a7d055b, 0x798a23b1, 0x78848414, 0x776c4edb,
    0x7641af3d, 0x7504d345, 0x73b5ebd1, 0x72552c85,
    0x70e2cbc6, 0x6f5f02b2, 0x6dca0d14, 0x6c242960,
    0x6a6d98a4, 0x68a69e81, 0x66cf8120, 0x64e88926,
    0x62f201ac, 0x60ec3830, 0x5ed77c8a, 0x5cb420e0,
    0x5a82799a, 0x5842dd54, 0x55f5a4d2, 0x539b2af0,
    0x5133cc94, 0x4ebfe8a5, 0x4c3fdff4, 0x49b41533,
    0x471cece7, 0x447acd50, 0x41ce1e65, 0x3f1749b8,
    0x3c56ba70, 0x398cdd32, 0x36ba2014, 0x33def287,
    0x30fbc54d, 0x2e110a62, 0x2b1f34eb, 0x2826b928,
    0x25280c5e, 0x2223a4c5, 0x1f19f97b, 0x1c0b826a,
    0x18f8b83c, 0x15e21445, 0x12c8106f, 0x0fab272b,
    0x0c8bd35e, 0x096a9049, 0x0647d97c, 0x03242abf,
];

/// 角度索引 → sin (Q31)
#[rustfmt::skip]
pub const ANGLE_SIN_Q31: [i32; 64] = [
    0x00000000, 0x03242abf, 0x0647d97c, 0x096a9049,
    0x0c8bd35e, 0x0fab272b, 0x12c8106f, 0x15e21445,
    0x18f8b83c, 0x1c0b826a, 0x1f19f97b, 0x2223a4c5,
    0x25280c5e, 0x2826b928, 0x2b1f34eb, 0x2e110a62,
    0x30fbc54d, 0x33def287, 0x36ba2014, 0x398cdd32,
    0x3c56ba70, 0x3f1749b8, 0x41ce1e65, 0x447acd50,
    0x471cece7, 0x49b41533, 0x4c3fdff4, 0x4ebfe8a5,
    0x5133cc94, 0x539b2af0, 0x55f5a4d2, 0x5842dd54,
    0x5a82799a, 0x5cb420e0, 0x5ed77c8a, 0x60ec3830,
    0x62f201ac, 0x64e88926, 0x66cf8120, 0x68a69e81,
    0x6a6d98a4, 0x6c242960, 0x6dca0d14, 0x6f5f02b2,
    0x70e2cbc6, 0x72552c85, 0x73b5ebd1, 0x7504d345,
    0x7641af3d, 0x776c4edb, 0x78848414, 0x798a23b1,
    0x7a7d055b, 0x7b5d039e, 0x7c29fbee, 0x7ce3ceb2,
    0x7d8a5f40, 0x7e1d93ea, 0x7e9d55fc, 0x7f0991c4,
    0x7f62368f, 0x7fa736b4, 0x7fd8878e, 0x7ff62182,
];

/// alpha 索引 → 预测系数 (Q28, 步长 0.1, 索引 32 为 0)
#[rustfmt::skip]
pub const ALPHA_Q28: [i32; 64] = [
    -0x33333333, -0x3199999a, -0x30000000, -0x2e666666,
    -0x2ccccccd, -0x2b333333, -0x2999999a, -0x28000000,
    -0x26666666, -0x24cccccd, -0x23333333, -0x2199999a,
    -0x20000000, -0x1e666666, -0x1ccccccd, -0x1b333333,
    -0x1999999a, -0x18000000, -0x16666666, -0x14cccccd,
    -0x13333333, -0x1199999a, -0x10000000, -0x0e666666,
    -0x0ccccccd, -0x0b333333, -0x0999999a, -0x08000000,
    -0x06666666, -0x04cccccd, -0x03333333, -0x0199999a,
    0x00000000, 0x0199999a, 0x03333333, 0x04cccccd,
    0x06666666, 0x08000000, 0x0999999a, 0x0b333333,
    0x0ccccccd, 0x0e666666, 0x10000000, 0x1199999a,
    0x13333333, 0x14cccccd, 0x16666666, 0x18000000,
    0x1999999a, 0x1b333333, 0x1ccccccd, 0x1e666666,
    0x20000000, 0x2199999a, 0x23333333, 0x24cccccd,
    0x26666666, 0x28000000, 0x2999999a, 0x2b333333,
    0x2ccccccd, 0x2e666666, 0x30000000, 0x3199999a,
];

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_core::{BitReader, BitWriter};

    #[test]
    fn test_角度回绕() {
        // 32 + 40 = 72 → 回绕到 8
        assert_eq!(
            reconstruct_index(SignalingMode::AngleRotation, 32, 40).unwrap(),
            8
        );
        // 负向回绕
        assert_eq!(
            reconstruct_index(SignalingMode::AngleRotation, 2, -10).unwrap(),
            56
        );
        // 回绕结果永远落在 [0, 64)
        for pred in 0..64 {
            for delta in -63..=63 {
                let idx =
                    reconstruct_index(SignalingMode::AngleRotation, pred, delta).unwrap();
                assert!((0..64).contains(&idx));
            }
        }
    }

    #[test]
    fn test_alpha越界拒绝() {
        assert_eq!(
            reconstruct_index(SignalingMode::AlphaPrediction, 32, 10).unwrap(),
            42
        );
        let err = reconstruct_index(SignalingMode::AlphaPrediction, 60, 10).unwrap_err();
        assert!(matches!(err, ShengError::Decode(_)));
        let err = reconstruct_index(SignalingMode::AlphaPrediction, 5, -10).unwrap_err();
        assert!(matches!(err, ShengError::Decode(_)));
    }

    #[test]
    fn test_增量编解码互逆() {
        let cb = CoefCodebooks::build();
        for mode in [SignalingMode::AngleRotation, SignalingMode::AlphaPrediction] {
            let (codes, bits): (&[u32], &[u8]) = match mode {
                SignalingMode::AngleRotation => (&MCT_ANGLE_CODES, &MCT_ANGLE_BITS),
                SignalingMode::AlphaPrediction => (&MCT_ALPHA_CODES, &MCT_ALPHA_BITS),
            };
            let mut bw = BitWriter::new();
            for sym in [0usize, 31, 32, 33, 63] {
                bw.write_bits(codes[sym], u32::from(bits[sym]));
            }
            let data = bw.finish();
            let mut br = BitReader::new(&data);
            for sym in [0i32, 31, 32, 33, 63] {
                assert_eq!(decode_delta(&cb, mode, &mut br).unwrap(), sym - ALPHA_BIAS);
            }
        }
    }

    #[test]
    fn test_三角表一致性() {
        // cos 降序, sin 升序, 45 度两表相等
        assert_eq!(ANGLE_COS_Q31[32], ANGLE_SIN_Q31[32]);
        for i in 1..64 {
            assert!(ANGLE_COS_Q31[i] < ANGLE_COS_Q31[i - 1]);
            assert!(ANGLE_SIN_Q31[i] > ANGLE_SIN_Q31[i - 1]);
        }
        // cos^2 + sin^2 ≈ 1 (Q31)
        for i in 0..64 {
            let c = f64::from(ANGLE_COS_Q31[i]) / f64::from(1u32 << 31);
            let s = f64::from(ANGLE_SIN_Q31[i]) / f64::from(1u32 << 31);
            assert!((c * c + s * s - 1.0).abs() < 1e-8, "index {i}");
        }
    }

    #[test]
    fn test_历史整理() {
        let mode = SignalingMode::AngleRotation;
        let mut h = BoxCoefHistory::default();
        h.indices[0] = 10;
        h.indices[50] = 20;
        h.was_short = false;
        h.valid = true;
        // 块类型不变: mask 宽度以上回落
        h.prepare(mode, false, 40);
        assert_eq!(h.indices[0], 10);
        assert_eq!(h.indices[50], DEFAULT_ANGLE_IDX);
        // 块类型翻转: 整体回落
        h.indices[0] = 10;
        h.prepare(mode, true, 40);
        assert_eq!(h.indices[0], DEFAULT_ANGLE_IDX);
        assert!(!h.valid);
    }
}
