//! 比特流读取器.
//!
//! 从传输层准备好的内存缓冲区中按位读取数据, 是频谱域解码器全部语法
//! 解析的基础设施. 按大端位序读取 (MSB first).
//!
//! 除基本的 `read_bits` 外还提供 USAC 语法常用的原语:
//! `read_escaped` (escapedValue 转义编码小整数) 与 `peek_bits` (窥视
//! 判定位而不移动游标).

use crate::{ShengError, ShengResult};

/// 比特流读取器
///
/// # 示例
/// ```
/// use sheng_core::BitReader;
///
/// let data = [0b1011_0001, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_bits(4).unwrap(), 0b0001);
/// assert_eq!(br.read_bits(8).unwrap(), 0b0101_0101);
/// ```
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 为最高位)
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// 已读取的总位数
    pub fn bits_read(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        if self.byte_pos >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_pos) * 8 - self.bit_pos as usize
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> ShengResult<u32> {
        if self.byte_pos >= self.data.len() {
            return Err(ShengError::Eof);
        }
        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos >= 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Ok(u32::from(bit))
    }

    /// 读取 N 个位 (最多 32 位), 返回值的低 N 位有效
    pub fn read_bits(&mut self, n: u32) -> ShengResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(ShengError::InvalidArgument(format!(
                "read_bits: n={n} 超过 32 位"
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(ShengError::Eof);
        }

        let mut result: u32 = 0;
        let mut remaining = n;
        while remaining > 0 {
            let available = 8 - self.bit_pos as u32;
            let to_read = remaining.min(available);

            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << to_read) | u32::from(bits);

            self.bit_pos += to_read as u8;
            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            remaining -= to_read;
        }
        Ok(result)
    }

    /// 读取有符号整数 (二进制补码)
    pub fn read_bits_signed(&mut self, n: u32) -> ShengResult<i32> {
        let val = self.read_bits(n)?;
        if n == 0 {
            return Ok(0);
        }
        if n >= 32 {
            return Ok(val as i32);
        }
        // 符号扩展: 最高有效位为 1 时填充高位
        if (val >> (n - 1)) & 1 != 0 {
            Ok(val as i32 | !((1i32 << n) - 1))
        } else {
            Ok(val as i32)
        }
    }

    /// 读取 USAC escapedValue 转义编码整数
    ///
    /// 先读 n1 位; 若取到全 1 则追加读 n2 位; 若再次全 1 则追加读 n3 位.
    /// 各段取值依次累加, 用于以少量位编码通常很小、偶尔较大的计数值.
    pub fn read_escaped(&mut self, n1: u32, n2: u32, n3: u32) -> ShengResult<u32> {
        let mut value = self.read_bits(n1)?;
        if value == (1 << n1) - 1 {
            let v2 = self.read_bits(n2)?;
            value += v2;
            if v2 == (1 << n2) - 1 {
                value += self.read_bits(n3)?;
            }
        }
        Ok(value)
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&mut self, n: u32) -> ShengResult<u32> {
        let saved_byte = self.byte_pos;
        let saved_bit = self.bit_pos;
        let result = self.read_bits(n);
        self.byte_pos = saved_byte;
        self.bit_pos = saved_bit;
        result
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: u32) -> ShengResult<()> {
        if (n as usize) > self.bits_left() {
            return Err(ShengError::Eof);
        }
        let total_bits = self.bit_pos as u32 + n;
        self.byte_pos += (total_bits / 8) as usize;
        self.bit_pos = (total_bits % 8) as u8;
        Ok(())
    }

    /// 对齐到下一个字节边界
    pub fn align_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// 获取底层数据的引用 (CRC 校验需要重读已消费的位区间)
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}
