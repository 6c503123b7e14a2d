//! # tao-codec
//!
//! Tao 多媒体框架编解码器库, 提供解码器框架与 Packet/Frame 抽象.
//!
//! 本 crate 对标 FFmpeg 的 libavcodec, 定义了解码器注册与解码流程的核心抽象.
//!
//! ## 支持的解码器
//!
//! - **MPEG-2 Video**: 基本流解码, 条带级多线程, 显示顺序重排
//!
//! ## 使用示例
//!
//! ```rust
//! use tao_codec::{CodecId, CodecRegistry};
//!
//! let mut reg = CodecRegistry::new();
//! tao_codec::register_all(&mut reg);
//!
//! // 按 CodecId 创建解码器实例
//! let decoder = reg.create_decoder(CodecId::Mpeg2Video).unwrap();
//! assert_eq!(decoder.name(), "mpeg2video");
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{CodecParameters, VideoCodecParams};
pub use decoder::Decoder;
pub use frame::{PictureType, VideoFrame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
}
