//! # sheng-usac
//!
//! MPEG-H/USAC 家族感知音频编解码器的频谱域核心解码器.
//!
//! 将任意顺序的压缩码流语法元素重建为频域声道频谱, 包含声道间去相关
//! 阶段 (MCT, Multi-channel Coding Tool).
//!
//! ## 解码流程
//! 1. `BitstreamElementSequencer` 按声明式语法表走读通道元素
//!    (SCE/CPE/LFE), 得到 ICS 信息、scale factor、TNS 标志与量化谱线
//! 2. `ChannelSpectralDecoder` 反量化为块浮点 (mantissa/exponent) 频谱,
//!    应用 mid/side 联合立体声与噪声填充
//! 3. `MctEngine` 解析多声道编码盒 (box), Huffman + 逆 DPCM 重建旋转/
//!    预测系数, 逐 scale factor band 做声道对变换与立体声填充
//! 4. 输出交由外部 renderer/filterbank (本 crate 之外)
//!
//! 传输层解复用、DRC、渲染、IGF tile 系统本体、TNS 滤波本体与错误隐藏
//! 均为外部协作者, 以 `external` 模块中的 trait 接入.

pub mod channel;
pub mod config;
pub mod decoder;
pub mod external;
pub mod huffman;
pub mod mct;
pub mod sequencer;
pub mod spectrum;
pub mod state;
pub mod syntax;
pub mod tables;

// 重导出常用类型
pub use channel::ChannelSpectralDecoder;
pub use config::{DecoderConfig, ElementShape, Profile};
pub use decoder::{FrameDecoder, FrameParams};
pub use mct::MctEngine;
pub use sequencer::BitstreamElementSequencer;
pub use spectrum::SpectralBuffer;
pub use state::{ChannelSpectralState, DecoderState};
