//! 统一错误类型定义.
//!
//! 解码器各阶段共用的错误类型. 三类核心错误对应码流解码的三种失败方式:
//! `InvalidData` (语法/取值非法), `Unsupported` (语法合法但本 profile 不支持),
//! `Decode` (重建值落在查找表合法范围之外). 任一错误都只中止当前帧,
//! 由上层以隐藏 (concealment) 数据替代输出.

use thiserror::Error;

/// Sheng 解码器统一错误类型
#[derive(Debug, Error)]
pub enum ShengError {
    /// 无效参数 (API 误用)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (码流取值越界或语法禁止的标志组合)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 不支持的特性 (语法合法但本 profile 未实现)
    #[error("不支持的特性: {0}")]
    Unsupported(String),

    /// 解码/范围错误 (重建后的系数索引超出查找表合法范围)
    #[error("解码错误: {0}")]
    Decode(String),

    /// 位流数据耗尽
    #[error("位流数据耗尽")]
    Eof,

    /// 内部错误 (不应发生, 例如状态机调用顺序错误)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Sheng 解码器统一 Result 类型
pub type ShengResult<T> = Result<T, ShengError>;
