//! CRC 校验和计算.
//!
//! 提供 CRC-16/CCITT (多项式 0x1021, 初始值 0xFFFF), 用于错误保护
//! profile 下语法元素区间的校验. 校验区间按位定界而非按字节定界,
//! 因此采用逐位计算而不是查表.

/// 对 `data` 中 `[start_bit, end_bit)` 位区间计算 CRC-16/CCITT
///
/// 位序与 `BitReader` 一致 (每字节 MSB first).
pub fn crc16_bits(data: &[u8], start_bit: usize, end_bit: usize) -> u16 {
    debug_assert!(start_bit <= end_bit);
    debug_assert!(end_bit <= data.len() * 8);

    let mut crc: u16 = 0xFFFF;
    for pos in start_bit..end_bit {
        let bit = (data[pos / 8] >> (7 - (pos % 8))) & 1;
        let msb = ((crc >> 15) as u8) ^ bit;
        crc <<= 1;
        if msb != 0 {
            crc ^= 0x1021;
        }
    }
    crc
}
