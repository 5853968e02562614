//! # sheng-core
//!
//! Sheng MPEG-H/USAC 解码器的核心基础库: 位流读写、CRC 与统一错误类型.
//!
//! 频谱域解码器 (`sheng-usac`) 的全部位级访问都经由本 crate 提供的
//! `BitReader`/`BitWriter`, 错误沿 `ShengError` 统一传播.

pub mod bitreader;
pub mod bitwriter;
pub mod crc;
pub mod error;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use crc::crc16_bits;
pub use error::{ShengError, ShengResult};
