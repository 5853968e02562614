//! 通道元素 sequencer: 驱动语法表, 逐 token 读取码流并填充
//! `ChannelSpectralState`.
//!
//! 成功返回后, 元素涉及的一或两个声道的 ICS/scale factor/TNS/量化谱线
//! 全部就位, 可交给 `ChannelSpectralDecoder` 做反量化与立体声处理.
//! 任何错误都中止当前帧, 由调用方整帧隐藏.

use log::{debug, trace};
use sheng_core::{crc16_bits, BitReader, ShengError, ShengResult};

use crate::config::{DecoderConfig, ElementShape, Profile};
use crate::huffman::{
    Codebooks, ESC_CB, INTENSITY_CB, INTENSITY_CB2, NOISE_CB, SF_DELTA_OFFSET, ZERO_CB,
};
use crate::state::{
    ChannelSpectralState, IcsInfo, JointStereoState, TnsData, WindowSequence,
};
use crate::syntax::{SyntaxWalker, Token};
use crate::tables::{MAX_SFB, NOISE_OFFSET, NOISE_PRE, SHORT_WINDOWS};

/// 码流元素 sequencer
pub struct BitstreamElementSequencer<'a> {
    config: &'a DecoderConfig,
    codebooks: &'a Codebooks,
}

impl<'a> BitstreamElementSequencer<'a> {
    pub fn new(config: &'a DecoderConfig, codebooks: &'a Codebooks) -> Self {
        Self { config, codebooks }
    }

    /// 解码一个通道元素, 填充 1 或 2 个声道状态
    ///
    /// CPE 必须传入 `pair` (联合立体声状态); SCE/LFE 传 `None`.
    pub fn decode_element(
        &self,
        br: &mut BitReader,
        shape: ElementShape,
        channels: &mut [ChannelSpectralState],
        mut pair: Option<&mut JointStereoState>,
    ) -> ShengResult<()> {
        if channels.len() != shape.num_channels() {
            return Err(ShengError::Internal(format!(
                "元素声道数不匹配: 需要 {}, 实际 {}",
                shape.num_channels(),
                channels.len()
            )));
        }
        for ch in channels.iter_mut() {
            ch.reset_frame();
        }

        let crc_start = br.bits_read();
        let mut walker = SyntaxWalker::new(shape, self.config.profile);
        let mut common_window = false;

        while let Some((tok, ch)) = walker.next() {
            trace!("sequencer: token={tok:?} ch={ch}");
            match tok {
                Token::InstanceTag => {
                    let tag = br.read_bits(4)?;
                    trace!("element_instance_tag={tag}");
                }
                Token::CommonWindow => {
                    let bit = br.read_bit()?;
                    common_window = bit != 0;
                    walker.set_decision(bit);
                }
                Token::IcsInfo => {
                    let ics = self.read_ics_info(br, shape)?;
                    if common_window {
                        // 公共窗: 两个声道共用同一份 ICS
                        for c in channels.iter_mut() {
                            c.ics = ics;
                        }
                    } else {
                        channels[ch].ics = ics;
                    }
                }
                Token::CommonMaxSfb => {
                    // 本 profile 要求公共窗下 max_sfb 一致
                    if br.read_bit()? == 0 {
                        return Err(ShengError::InvalidData(
                            "公共窗下 common_max_sfb 为 0".into(),
                        ));
                    }
                }
                Token::MsFlags => {
                    let p = pair.as_deref_mut().ok_or_else(|| {
                        ShengError::Internal("MsFlags 出现在非 CPE 元素".into())
                    })?;
                    let ics = channels[0].ics;
                    self.read_ms_flags(br, &ics, p)?;
                }
                Token::GlobalGain => {
                    channels[ch].global_gain = br.read_bits(8)? as i32;
                }
                Token::SectionData => {
                    self.read_section_data(br, &mut channels[ch])?;
                }
                Token::ScaleFactors => {
                    self.read_scale_factors(br, &mut channels[ch])?;
                }
                Token::ScaleFactorsUsac => {
                    self.read_scale_factors_usac(br, &mut channels[ch])?;
                }
                Token::TnsPresence => {
                    let bit = br.read_bit()?;
                    if bit != 0 && shape == ElementShape::Lfe {
                        return Err(ShengError::InvalidData("LFE 声道不允许 TNS".into()));
                    }
                    channels[ch].tns_present = bit != 0;
                    walker.set_decision(bit);
                }
                Token::TnsData => {
                    let is_short = channels[ch].ics.is_short();
                    channels[ch].tns = read_tns_data(br, is_short)?;
                }
                Token::GainControl => {
                    if br.read_bit()? != 0 {
                        return Err(ShengError::Unsupported("gain control 数据".into()));
                    }
                }
                Token::NoiseFill => {
                    channels[ch].noise_level = br.read_bits(3)? as u8;
                    channels[ch].noise_offset = br.read_bits(5)? as u8;
                }
                Token::SpectralData => {
                    self.read_spectral_data(br, &mut channels[ch])?;
                }
            }
        }

        if self.config.error_protection {
            let crc_end = br.bits_read();
            let computed = crc16_bits(br.data(), crc_start, crc_end);
            let transmitted = br.read_bits(16)? as u16;
            if computed != transmitted {
                return Err(ShengError::InvalidData(format!(
                    "元素 CRC 不匹配: 计算 {computed:#06x}, 传输 {transmitted:#06x}"
                )));
            }
        }

        debug!(
            "元素解码完成: shape={shape:?}, common_window={common_window}, bits={}",
            br.bits_read() - crc_start
        );
        Ok(())
    }

    // ============================================================
    // 子读取器
    // ============================================================

    /// 读取 ICS info; LFE 约束 (长块, 零混叠对称) 在此检查
    fn read_ics_info(&self, br: &mut BitReader, shape: ElementShape) -> ShengResult<IcsInfo> {
        if self.config.profile == Profile::Classic {
            let _reserved = br.read_bit()?;
        }
        let window_sequence = WindowSequence::from_bits(br.read_bits(2)?);
        let window_shape = br.read_bit()? as u8;

        let mut ics = IcsInfo {
            window_sequence,
            window_shape,
            ..IcsInfo::default()
        };

        if window_sequence.is_short() {
            if shape == ElementShape::Lfe {
                return Err(ShengError::InvalidData("LFE 声道不允许短块".into()));
            }
            ics.max_sfb = br.read_bits(4)? as usize;
            let grouping = br.read_bits(7)?;
            derive_window_groups(&mut ics, grouping);
        } else {
            ics.max_sfb = br.read_bits(6)? as usize;
            if self.config.profile == Profile::Classic && br.read_bit()? != 0 {
                return Err(ShengError::Unsupported("ICS predictor 数据".into()));
            }
        }

        let num_sfb = self.config.sfb_table.num_sfb(ics.is_short());
        if ics.max_sfb > num_sfb {
            return Err(ShengError::InvalidData(format!(
                "max_sfb={} 超过 band 数 {num_sfb}",
                ics.max_sfb
            )));
        }
        Ok(ics)
    }

    /// 读取 M/S 标志与复数预测系数 (ms_mask_present 2 位)
    fn read_ms_flags(
        &self,
        br: &mut BitReader,
        ics: &IcsInfo,
        pair: &mut JointStereoState,
    ) -> ShengResult<()> {
        let mode = br.read_bits(2)? as u8;
        pair.ms_mask_mode = mode;
        pair.ms_used.fill(false);
        match mode {
            0 => {}
            1 => {
                // 逐 (组, band) mask
                for group in 0..ics.num_window_groups {
                    for sfb in 0..ics.max_sfb {
                        let used = br.read_bit()? != 0;
                        pair.ms_used[ChannelSpectralState::gs_index(group, sfb)] = used;
                    }
                }
            }
            2 => {
                for group in 0..ics.num_window_groups {
                    for sfb in 0..ics.max_sfb {
                        pair.ms_used[ChannelSpectralState::gs_index(group, sfb)] = true;
                    }
                }
            }
            _ => {
                // 复数预测: 仅支持实部预测
                if br.read_bit()? != 0 {
                    return Err(ShengError::Unsupported("复数预测虚部系数".into()));
                }
                pair.pred_dir = br.read_bit()? != 0;
                // alpha 沿频率差分, 复用 scale factor 码表
                let mut alpha = 0i32;
                for sfb in 0..ics.max_sfb.min(MAX_SFB) {
                    let delta = self.codebooks.sf_tree.decode(br)? - SF_DELTA_OFFSET;
                    alpha += delta;
                    pair.alpha_q[sfb] = alpha;
                    for group in 0..ics.num_window_groups {
                        pair.ms_used[ChannelSpectralState::gs_index(group, sfb)] = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// 经典路径 section 数据 → 逐 (组, band) 码本索引
    fn read_section_data(
        &self,
        br: &mut BitReader,
        ch: &mut ChannelSpectralState,
    ) -> ShengResult<()> {
        let is_short = ch.ics.is_short();
        let sect_bits = if is_short { 3 } else { 5 };
        let sect_esc = if is_short { 7 } else { 31 };

        for group in 0..ch.ics.num_window_groups {
            let mut k = 0usize;
            while k < ch.ics.max_sfb {
                let sect_cb = br.read_bits(4)? as u8;
                if sect_cb == 12 {
                    return Err(ShengError::InvalidData(format!(
                        "section 数据非法: group={group}, sfb={k}, codebook=12"
                    )));
                }
                let mut sect_end = k;
                loop {
                    let incr = br.read_bits(sect_bits)? as usize;
                    sect_end = sect_end.checked_add(incr).ok_or_else(|| {
                        ShengError::InvalidData(format!(
                            "section 数据非法: group={group}, sfb={k}, 长度溢出"
                        ))
                    })?;
                    if sect_end > ch.ics.max_sfb {
                        return Err(ShengError::InvalidData(format!(
                            "section 数据非法: group={group}, 越过 max_sfb={}",
                            ch.ics.max_sfb
                        )));
                    }
                    if incr != sect_esc {
                        break;
                    }
                }
                if sect_end == k {
                    return Err(ShengError::InvalidData(format!(
                        "section 数据非法: group={group}, sfb={k}, section 长度为 0"
                    )));
                }
                for sfb in k..sect_end {
                    ch.band_codebook[ChannelSpectralState::gs_index(group, sfb)] = sect_cb;
                }
                k = sect_end;
            }
        }
        Ok(())
    }

    /// 经典路径 scale factor 差分数据 (ISO 14496-3, 4.5.2.3.4)
    ///
    /// 三类码本分别维护独立的差分链:
    /// - 普通码本 (1-11): 以 global_gain 为起点
    /// - 噪声 (13): 首个 band 读 9 位 PCM, 其后 Huffman 差分
    /// - 强度立体声 (14/15): IS position 差分
    fn read_scale_factors(
        &self,
        br: &mut BitReader,
        ch: &mut ChannelSpectralState,
    ) -> ShengResult<()> {
        let mut sf = ch.global_gain;
        let mut is_position = 0i32;
        let mut noise_energy = ch.global_gain - NOISE_OFFSET;
        let mut noise_pcm_flag = true;

        for group in 0..ch.ics.num_window_groups {
            for sfb in 0..ch.ics.max_sfb {
                let slot = ChannelSpectralState::gs_index(group, sfb);
                match ch.band_codebook[slot] {
                    ZERO_CB => {
                        ch.scale_factors[slot] = 0;
                    }
                    NOISE_CB => {
                        if noise_pcm_flag {
                            noise_pcm_flag = false;
                            let raw = br.read_bits(9)? as i32;
                            noise_energy = ch.global_gain - NOISE_OFFSET + raw - NOISE_PRE;
                        } else {
                            let delta =
                                self.codebooks.sf_tree.decode(br)? - SF_DELTA_OFFSET;
                            noise_energy += delta;
                        }
                        noise_energy = noise_energy.clamp(-100, 155);
                        ch.scale_factors[slot] = noise_energy;
                        ch.band_is_noise[slot] = true;
                    }
                    INTENSITY_CB | INTENSITY_CB2 => {
                        let delta = self.codebooks.sf_tree.decode(br)? - SF_DELTA_OFFSET;
                        is_position += delta;
                        is_position = is_position.clamp(-155, 100);
                        ch.scale_factors[slot] = is_position;
                    }
                    _ => {
                        let delta = self.codebooks.sf_tree.decode(br)? - SF_DELTA_OFFSET;
                        sf += delta;
                        ch.scale_factors[slot] = sf.clamp(0, 255);
                    }
                }
            }
        }
        Ok(())
    }

    /// USAC 路径 scale factor 数据
    ///
    /// 前置 LTP 参数 (不支持) 与混叠对称标志; 无 section 数据, 全部
    /// band 预置 escape 码本标记, 使未显式覆盖的 band 仍计为"已传输".
    fn read_scale_factors_usac(
        &self,
        br: &mut BitReader,
        ch: &mut ChannelSpectralState,
    ) -> ShengResult<()> {
        if br.read_bit()? != 0 {
            return Err(ShengError::Unsupported("长时预测 (LTP) 参数".into()));
        }
        ch.ics.prev_aliasing_symmetry = br.read_bit()? as u8;
        ch.ics.curr_aliasing_symmetry = br.read_bit()? as u8;

        let mut sf = ch.global_gain;
        for group in 0..ch.ics.num_window_groups {
            for sfb in 0..ch.ics.max_sfb {
                let slot = ChannelSpectralState::gs_index(group, sfb);
                ch.band_codebook[slot] = ESC_CB;
                let delta = self.codebooks.sf_tree.decode(br)? - SF_DELTA_OFFSET;
                sf += delta;
                ch.scale_factors[slot] = sf.clamp(0, 255);
            }
        }
        Ok(())
    }

    /// 量化谱数据: 按 (组, band) 顺序 Huffman 解码到 `quant`
    fn read_spectral_data(
        &self,
        br: &mut BitReader,
        ch: &mut ChannelSpectralState,
    ) -> ShengResult<()> {
        let is_short = ch.ics.is_short();
        for group in 0..ch.ics.num_window_groups {
            let group_start = ch.ics.group_start(group);
            let group_len = ch.ics.group_lengths[group] as usize;
            for sfb in 0..ch.ics.max_sfb {
                let slot = ChannelSpectralState::gs_index(group, sfb);
                let cb = ch.band_codebook[slot];
                let Some(spec_cb) = self.codebooks.spectral_cb(cb) else {
                    // ZERO / NOISE / INTENSITY: 无谱数据
                    continue;
                };
                // 短块按窗口逐个解码, 不能拼接组内多个窗口后一次解码
                for win_in_group in 0..group_len {
                    let win = group_start + win_in_group;
                    let range = self.config.sfb_table.line_range(is_short, win, sfb);
                    let mut i = range.start;
                    while i < range.end {
                        let values = spec_cb.decode_values(br)?;
                        let count = spec_cb.dim.min(range.end - i);
                        ch.quant[i..i + count].copy_from_slice(&values[..count]);
                        i += spec_cb.dim;
                    }
                }
            }
        }
        Ok(())
    }
}

/// 短块 scale_factor_grouping (7 位) → 窗口组划分
///
/// 位 i (高位在先) 置位表示窗口 i+1 与前一窗口同组.
fn derive_window_groups(ics: &mut IcsInfo, grouping: u32) {
    ics.num_window_groups = 1;
    ics.group_lengths = [1, 0, 0, 0, 0, 0, 0, 0];
    for w in 1..SHORT_WINDOWS {
        let same_group = (grouping >> (SHORT_WINDOWS - 1 - w)) & 1 != 0;
        if same_group {
            ics.group_lengths[ics.num_window_groups - 1] += 1;
        } else {
            ics.group_lengths[ics.num_window_groups] = 1;
            ics.num_window_groups += 1;
        }
    }
}

/// 解析 TNS 滤波器数据 (滤波本身由外部协作者执行, 此处只保存参数)
fn read_tns_data(br: &mut BitReader, is_short: bool) -> ShengResult<TnsData> {
    let mut data = TnsData::default();
    let num_windows = if is_short { SHORT_WINDOWS } else { 1 };
    let max_order = if is_short { 7u32 } else { 12u32 };

    for w in 0..num_windows {
        let n_filt = br.read_bits(if is_short { 1 } else { 2 })? as usize;
        if n_filt > 3 {
            return Err(ShengError::InvalidData(format!(
                "TNS 非法: window={w}, n_filt={n_filt} 超出上限"
            )));
        }
        data.n_filt[w] = n_filt as u8;
        if n_filt == 0 {
            continue;
        }

        let coef_res = br.read_bit()? as u32;
        for filt in 0..n_filt {
            data.length[w][filt] = br.read_bits(if is_short { 4 } else { 6 })? as u8;
            let order = br.read_bits(if is_short { 3 } else { 5 })?;
            if order > max_order {
                return Err(ShengError::InvalidData(format!(
                    "TNS 非法: window={w}, filter={filt}, order={order} 超出上限 {max_order}"
                )));
            }
            data.order[w][filt] = order as u8;
            if order == 0 {
                continue;
            }

            data.direction[w][filt] = br.read_bit()? != 0;
            let coef_compress = br.read_bit()? as u32;
            let coef_len = coef_res + 3 - coef_compress;
            for i in 0..order as usize {
                // 保存原始系数索引, 反量化由 TNS 协作者完成
                data.coef[w][filt][i] = br.read_bits(coef_len)? as i8;
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::huffman::{encode_entry, SF_TABLE};
    use sheng_core::BitWriter;

    fn usac_config() -> DecoderConfig {
        DecoderConfig::new(48000, 2, Profile::Usac).unwrap()
    }

    /// 写一个最小 USAC SCE 元素: 长块, max_sfb 个 band, 谱线全零
    fn write_minimal_usac_sce(bw: &mut BitWriter, global_gain: u32, max_sfb: usize) {
        bw.write_bits(global_gain, 8);
        bw.write_bits(0, 3); // noise_level
        bw.write_bits(0, 5); // noise_offset
        bw.write_bits(0, 2); // window_sequence = OnlyLong
        bw.write_bit(0); // window_shape
        bw.write_bits(max_sfb as u32, 6);
        bw.write_bit(0); // tns_data_present
        bw.write_bit(0); // ltp_data_present
        bw.write_bit(0); // prev_aliasing_symmetry
        bw.write_bit(0); // curr_aliasing_symmetry
        for _ in 0..max_sfb {
            encode_entry(bw, &SF_TABLE, SF_DELTA_OFFSET); // delta = 0
        }
        // 谱数据: 每 band 全零 pair, CB11 值 (0,0) = 索引 0
        for sfb in 0..max_sfb {
            let t = crate::tables::SfbTable::for_sample_rate(48000).unwrap();
            let width = t.long_offsets[sfb + 1] - t.long_offsets[sfb];
            for _ in 0..width.div_ceil(2) {
                bw.write_bits(u32::from(crate::huffman::CODES_11[0]), u32::from(
                    crate::huffman::BITS_11[0],
                ));
            }
        }
    }

    #[test]
    fn test_usac_sce最小元素() {
        let config = usac_config();
        let codebooks = Codebooks::build();
        let seq = BitstreamElementSequencer::new(&config, &codebooks);

        let mut bw = BitWriter::new();
        write_minimal_usac_sce(&mut bw, 100, 4);
        let data = bw.finish();
        let mut br = BitReader::new(&data);

        let mut ch = [ChannelSpectralState::default()];
        seq.decode_element(&mut br, ElementShape::Sce, &mut ch, None)
            .unwrap();
        assert_eq!(ch[0].global_gain, 100);
        assert_eq!(ch[0].ics.max_sfb, 4);
        assert!(!ch[0].ics.is_short());
        // USAC 路径全部 band 预置 escape 码本标记
        assert_eq!(ch[0].band_codebook[0], ESC_CB);
        assert_eq!(ch[0].scale_factors[0], 100);
        assert!(ch[0].quant.iter().all(|&q| q == 0));
    }

    #[test]
    fn test_lfe拒绝短块() {
        let config = usac_config();
        let codebooks = Codebooks::build();
        let seq = BitstreamElementSequencer::new(&config, &codebooks);

        let mut bw = BitWriter::new();
        bw.write_bits(100, 8); // global_gain
        bw.write_bits(2, 2); // window_sequence = EightShort
        bw.write_bit(0); // window_shape
        bw.write_bits(4, 4); // max_sfb
        bw.write_bits(0, 7); // grouping
        let data = bw.finish();
        let mut br = BitReader::new(&data);

        let mut ch = [ChannelSpectralState::default()];
        let err = seq
            .decode_element(&mut br, ElementShape::Lfe, &mut ch, None)
            .unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }

    #[test]
    fn test_lfe拒绝tns() {
        let config = usac_config();
        let codebooks = Codebooks::build();
        let seq = BitstreamElementSequencer::new(&config, &codebooks);

        let mut bw = BitWriter::new();
        bw.write_bits(100, 8);
        bw.write_bits(0, 2);
        bw.write_bit(0);
        bw.write_bits(0, 6); // max_sfb = 0
        bw.write_bit(1); // tns_data_present = 1 → LFE 拒绝
        let data = bw.finish();
        let mut br = BitReader::new(&data);

        let mut ch = [ChannelSpectralState::default()];
        let err = seq
            .decode_element(&mut br, ElementShape::Lfe, &mut ch, None)
            .unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }

    #[test]
    fn test_max_sfb越界报错() {
        let config = usac_config();
        let codebooks = Codebooks::build();
        let seq = BitstreamElementSequencer::new(&config, &codebooks);

        let mut bw = BitWriter::new();
        bw.write_bits(100, 8);
        bw.write_bits(0, 3);
        bw.write_bits(0, 5);
        bw.write_bits(0, 2);
        bw.write_bit(0);
        bw.write_bits(50, 6); // 长块 band 上限为 49
        let data = bw.finish();
        let mut br = BitReader::new(&data);

        let mut ch = [ChannelSpectralState::default()];
        let err = seq
            .decode_element(&mut br, ElementShape::Sce, &mut ch, None)
            .unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }

    #[test]
    fn test_窗口组划分() {
        let mut ics = IcsInfo {
            window_sequence: WindowSequence::EightShort,
            ..IcsInfo::default()
        };
        // grouping = 1101101: 窗 1,2 同组 0; 窗 3 新组; 窗 4,5 同组; ...
        derive_window_groups(&mut ics, 0b1101101);
        assert_eq!(ics.num_window_groups, 3);
        assert_eq!(&ics.group_lengths[..3], &[3, 3, 2]);
        let total: u8 = ics.group_lengths.iter().sum();
        assert_eq!(total as usize, SHORT_WINDOWS);
    }

    #[test]
    fn test_crc校验() {
        let mut config = usac_config();
        config.error_protection = true;
        let codebooks = Codebooks::build();
        let seq = BitstreamElementSequencer::new(&config, &codebooks);

        let mut bw = BitWriter::new();
        write_minimal_usac_sce(&mut bw, 100, 1);
        let body_bits = bw.bits_written();
        let body = bw.finish();
        let crc = crc16_bits(&body, 0, body_bits);

        // 正确 CRC
        let mut bw = BitWriter::new();
        write_minimal_usac_sce(&mut bw, 100, 1);
        bw.write_bits(u32::from(crc), 16);
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let mut ch = [ChannelSpectralState::default()];
        seq.decode_element(&mut br, ElementShape::Sce, &mut ch, None)
            .unwrap();

        // 错误 CRC
        let mut bw = BitWriter::new();
        write_minimal_usac_sce(&mut bw, 100, 1);
        bw.write_bits(u32::from(crc ^ 1), 16);
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        let mut ch = [ChannelSpectralState::default()];
        let err = seq
            .decode_element(&mut br, ElementShape::Sce, &mut ch, None)
            .unwrap_err();
        assert!(matches!(err, ShengError::InvalidData(_)));
    }
}
