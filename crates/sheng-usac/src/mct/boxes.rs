//! MCT box 解析: 每帧全新解析的声道对变换记录.
//!
//! 声道对以组合序索引编码 (全部无序对按字典序排列, 高位在先),
//! 不直接携带绝对声道号; mask 位高位在先. 系数差分的预测器只有
//! 两种: delta_time 置位取上一帧同带系数, 否则取模式默认值.

use log::{debug, trace};
use sheng_core::{BitReader, ShengError, ShengResult};

use super::coeffs::{
    decode_delta, reconstruct_index, BoxCoefHistory, CoefCodebooks, SignalingMode,
};
use super::McHistory;
use crate::tables::MAX_SFB;

/// 每帧 box 数上限
pub const MAX_MCT_BOXES: usize = 32;

/// 单个 MCT box (逐帧重建)
#[derive(Clone, Debug)]
pub struct McBox {
    /// 声道对 (组内声道列表中的位置)
    pub ch_a: usize,
    pub ch_b: usize,
    pub has_mask: bool,
    pub has_bandwise: bool,
    /// mask 宽度 (0 表示全带)
    pub num_bands: usize,
    /// 逐带激活 mask (无 mask 时全真)
    pub mask: [bool; MAX_SFB],
    /// 预测方向 (仅 alpha 模式)
    pub pred_dir: bool,
    pub delta_time: bool,
    /// 重建后的逐带系数索引 (全带编码时各激活带取同一值)
    pub coef_indices: [i32; MAX_SFB],
}

/// 一帧的全部 MCT 信令
#[derive(Debug)]
pub struct McFrame {
    pub mode: SignalingMode,
    pub stereo_filling: bool,
    pub keep_topology: bool,
    pub boxes: Vec<McBox>,
}

/// 组合序声道对总数
pub fn num_channel_pairs(num_channels: usize) -> usize {
    num_channels * num_channels.saturating_sub(1) / 2
}

/// 声道对索引位宽 (ceil(log2(pairs)); 单对为 0 位)
pub fn pair_index_bits(num_pairs: usize) -> u32 {
    if num_pairs <= 1 {
        0
    } else {
        usize::BITS - (num_pairs - 1).leading_zeros()
    }
}

/// 组合序索引 → 无序声道对 (字典序: (0,1), (0,2), ..., (1,2), ...)
pub fn pair_from_index(index: usize, num_channels: usize) -> Option<(usize, usize)> {
    let mut k = index;
    for a in 0..num_channels {
        let row = num_channels - 1 - a;
        if k < row {
            return Some((a, a + 1 + k));
        }
        k -= row;
    }
    None
}

/// 解析一帧的 MCT 信令并重建全部系数
///
/// 历史只读; 提交 (供下一帧预测) 由引擎在帧关闭时执行.
pub fn parse_mct_frame(
    br: &mut BitReader,
    codebooks: &CoefCodebooks,
    hist: &McHistory,
    num_channels: usize,
    is_short: bool,
    independent: bool,
) -> ShengResult<McFrame> {
    let mode = SignalingMode::from_bit(br.read_bit()?);
    let stereo_filling = br.read_bit()? != 0;
    let mut keep_topology = br.read_bit()? != 0;
    if independent && keep_topology {
        // 独立帧强制重传拓扑
        debug!("独立帧忽略 keep_topology");
        keep_topology = false;
    }

    let box_count = br.read_escaped(2, 4, 8)? as usize;
    if box_count > MAX_MCT_BOXES {
        return Err(ShengError::InvalidData(format!(
            "MCT box 数 {box_count} 超过上限 {MAX_MCT_BOXES}"
        )));
    }
    if keep_topology && box_count != hist.prev_num_boxes {
        return Err(ShengError::InvalidData(format!(
            "keep_topology 下 box 数不一致: {box_count} != {}",
            hist.prev_num_boxes
        )));
    }

    let num_pairs = num_channel_pairs(num_channels);
    let mut boxes = Vec::with_capacity(box_count);
    for box_idx in 0..box_count {
        let (ch_a, ch_b) = if keep_topology {
            hist.prev_pairs[box_idx]
        } else {
            let bits = pair_index_bits(num_pairs);
            let index = if bits > 0 { br.read_bits(bits)? as usize } else { 0 };
            pair_from_index(index, num_channels).ok_or_else(|| {
                ShengError::InvalidData(format!(
                    "声道对索引 {index} 超出 {num_pairs} 对"
                ))
            })?
        };

        let has_mask = br.read_bit()? != 0;
        let has_bandwise = br.read_bit()? != 0;
        let mut num_bands = 0usize;
        if has_mask || has_bandwise {
            let raw = br.read_bits(6)? as usize;
            num_bands = if is_short { raw } else { raw * 2 };
            if num_bands > MAX_SFB {
                return Err(ShengError::InvalidData(format!(
                    "MCT mask 宽度 {num_bands} 超过上限 {MAX_SFB}"
                )));
            }
        }

        let mut mask = [true; MAX_SFB];
        if has_mask {
            for m in mask[..num_bands].iter_mut() {
                *m = br.read_bit()? != 0;
            }
        }

        let pred_dir = if mode == SignalingMode::AlphaPrediction {
            br.read_bit()? != 0
        } else {
            false
        };

        let delta_time = br.read_bit()? != 0;
        if delta_time {
            if independent {
                return Err(ShengError::InvalidData(
                    "独立帧不允许 delta_time 系数预测".into(),
                ));
            }
            if hist.prev_mode != Some(mode) {
                return Err(ShengError::InvalidData(
                    "delta_time 跨信令模式变化".into(),
                ));
            }
        }

        let mut box_hist = hist.boxes[box_idx];
        if box_idx >= hist.prev_num_boxes || hist.prev_pairs[box_idx] != (ch_a, ch_b) {
            // 拓扑变化: 该 box 的系数历史不可用, 预测器回落到模式默认
            box_hist.valid = false;
        }
        if box_hist.valid {
            // 块类型翻转时整体回落到模式默认
            box_hist.prepare(mode, is_short, MAX_SFB);
        } else {
            box_hist.reset(mode);
        }
        let mut coef_indices = [mode.default_index(); MAX_SFB];
        if has_bandwise {
            for b in 0..num_bands {
                if !mask[b] {
                    continue;
                }
                let delta = decode_delta(codebooks, mode, br)?;
                let pred = predictor(&box_hist, mode, delta_time, b);
                coef_indices[b] = reconstruct_index(mode, pred, delta)?;
            }
        } else {
            let delta = decode_delta(codebooks, mode, br)?;
            let pred = predictor(&box_hist, mode, delta_time, 0);
            let idx = reconstruct_index(mode, pred, delta)?;
            coef_indices = [idx; MAX_SFB];
        }

        trace!(
            "MCT box {box_idx}: pair=({ch_a},{ch_b}), mask={has_mask}, \
             bandwise={has_bandwise}, bands={num_bands}, delta_time={delta_time}"
        );
        boxes.push(McBox {
            ch_a,
            ch_b,
            has_mask,
            has_bandwise,
            num_bands,
            mask,
            pred_dir,
            delta_time,
            coef_indices,
        });
    }

    Ok(McFrame {
        mode,
        stereo_filling,
        keep_topology,
        boxes,
    })
}

/// 差分预测器: delta_time 取上一帧同带系数, 否则取模式默认;
/// 历史无效时回落到默认 (块类型翻转已由 `prepare` 整体复位)
fn predictor(
    box_hist: &BoxCoefHistory,
    mode: SignalingMode,
    delta_time: bool,
    band: usize,
) -> i32 {
    if delta_time && box_hist.valid {
        box_hist.indices[band.min(MAX_SFB - 1)]
    } else {
        mode.default_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mct::coeffs::{MCT_ANGLE_BITS, MCT_ANGLE_CODES};
    use sheng_core::BitWriter;

    #[test]
    fn test_声道对组合序() {
        // 4 声道: 6 对, 3 位索引
        assert_eq!(num_channel_pairs(4), 6);
        assert_eq!(pair_index_bits(6), 3);
        assert_eq!(pair_from_index(0, 4), Some((0, 1)));
        assert_eq!(pair_from_index(2, 4), Some((0, 3)));
        assert_eq!(pair_from_index(3, 4), Some((1, 2)));
        assert_eq!(pair_from_index(5, 4), Some((2, 3)));
        assert_eq!(pair_from_index(6, 4), None);
        // 2 声道: 单对, 0 位
        assert_eq!(pair_index_bits(num_channel_pairs(2)), 0);
    }

    /// 写入一个角度模式单 box 帧 (全带系数, 无 mask)
    fn write_angle_frame(bw: &mut BitWriter, stereo_filling: bool, delta_sym: usize) {
        bw.write_bit(1); // 角度模式
        bw.write_bit(u32::from(stereo_filling));
        bw.write_bit(0); // keep_topology
        bw.write_escaped(1, 2, 4, 8); // box_count = 1
        // 2 声道: 对索引 0 位
        bw.write_bit(0); // has_mask
        bw.write_bit(0); // has_bandwise
        bw.write_bit(0); // delta_time
        bw.write_bits(MCT_ANGLE_CODES[delta_sym], u32::from(MCT_ANGLE_BITS[delta_sym]));
    }

    #[test]
    fn test_解析单box帧() {
        let cb = CoefCodebooks::build();
        let hist = McHistory::default();
        let mut bw = BitWriter::new();
        write_angle_frame(&mut bw, true, 37); // delta = +5
        let data = bw.finish();
        let mut br = BitReader::new(&data);

        let frame = parse_mct_frame(&mut br, &cb, &hist, 2, false, true).unwrap();
        assert_eq!(frame.mode, SignalingMode::AngleRotation);
        assert!(frame.stereo_filling);
        assert_eq!(frame.boxes.len(), 1);
        let b = &frame.boxes[0];
        assert_eq!((b.ch_a, b.ch_b), (0, 1));
        // 预测器 = 默认 32, delta = +5 → 37
        assert_eq!(b.coef_indices[0], 37);
    }

    #[test]
    fn test_box数超限拒绝() {
        let cb = CoefCodebooks::build();
        let hist = McHistory::default();
        let mut bw = BitWriter::new();
        bw.write_bit(1);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_escaped(33, 2, 4, 8); // 超过 MAX_MCT_BOXES
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let err = parse_mct_frame(&mut br, &cb, &hist, 2, false, true).unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }

    #[test]
    fn test_mask宽度超限拒绝() {
        let cb = CoefCodebooks::build();
        let hist = McHistory::default();
        let mut bw = BitWriter::new();
        bw.write_bit(1);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_escaped(1, 2, 4, 8);
        bw.write_bit(1); // has_mask
        bw.write_bit(0); // has_bandwise
        bw.write_bits(40, 6); // 长块 → 80 band, 超过 64
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let err = parse_mct_frame(&mut br, &cb, &hist, 2, false, true).unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }

    #[test]
    fn test_独立帧拒绝delta_time() {
        let cb = CoefCodebooks::build();
        let hist = McHistory::default();
        let mut bw = BitWriter::new();
        bw.write_bit(1);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_escaped(1, 2, 4, 8);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_bit(1); // delta_time 在独立帧
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let err = parse_mct_frame(&mut br, &cb, &hist, 2, false, true).unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }

    #[test]
    fn test_delta_time跨模式拒绝() {
        let cb = CoefCodebooks::build();
        let mut hist = McHistory::default();
        hist.prev_mode = Some(SignalingMode::AlphaPrediction);
        let mut bw = BitWriter::new();
        bw.write_bit(1); // 角度模式 (上一帧是 alpha)
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_escaped(1, 2, 4, 8);
        bw.write_bit(0);
        bw.write_bit(0);
        bw.write_bit(1); // delta_time
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let err = parse_mct_frame(&mut br, &cb, &hist, 2, false, false).unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }
}
