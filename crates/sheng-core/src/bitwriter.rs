//! 比特流写入器.
//!
//! 向字节缓冲区按位写入数据, 与 `BitReader` 对应 (大端位序, MSB first).
//! 解码器自身不写码流; 本模块服务于构造位精确测试夹具与将来的编码路径.

/// 比特流写入器
///
/// # 示例
/// ```
/// use sheng_core::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_bits(0b0001, 4);
/// let data = bw.finish();
/// assert_eq!(data, vec![0b1011_0001]);
/// ```
#[derive(Default)]
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 正在填充的字节
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count >= 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入 N 个位 (最多 32 位), 值的低 N 位被写入, 高位在前
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={n} 超过 32 位");
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    /// 写入 USAC escapedValue 转义编码整数 (与 `BitReader::read_escaped` 对应)
    pub fn write_escaped(&mut self, value: u32, n1: u32, n2: u32, n3: u32) {
        let esc1 = (1 << n1) - 1;
        if value < esc1 {
            self.write_bits(value, n1);
            return;
        }
        self.write_bits(esc1, n1);
        let rest = value - esc1;
        let esc2 = (1 << n2) - 1;
        if rest < esc2 {
            self.write_bits(rest, n2);
            return;
        }
        self.write_bits(esc2, n2);
        let rest2 = rest - esc2;
        debug_assert!(
            u64::from(rest2) < (1u64 << n3),
            "write_escaped: value={value} 超出 ({n1},{n2},{n3}) 可编码上限"
        );
        self.write_bits(rest2, n3);
    }

    /// 补零对齐到字节边界并返回缓冲区
    pub fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.current_byte <<= 8 - self.bit_count;
            self.data.push(self.current_byte);
        }
        self.data
    }
}
