//! # tao-mpeg2
//!
//! 纯 Rust 实现的 MPEG-2 视频基本流解码器.
//!
//! - **码流解析**: 序列/GOP/图像头部与全部扩展, 用户数据
//! - **并行解码**: 条带为单位分发到工作线程, 按参考依赖调度
//! - **有界内存**: 固定深度的图像池, 显示顺序重排输出
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tao_mpeg2::{Mpeg2Decoder, Mpeg2DecoderConfig};
//!
//! let config = Mpeg2DecoderConfig::new(720, 576).with_threads(4);
//! let mut decoder = Mpeg2Decoder::new(config, |picture| {
//!     println!("{:?} {}x{}", picture.picture_type(), picture.width(), picture.height());
//! })
//! .unwrap();
//! decoder.push(&std::fs::read("input.m2v").unwrap()).unwrap();
//! let summary = decoder.finish().unwrap();
//! println!("共 {} 幅图像", summary.pictures);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 错误类型, 位读写, 起始码扫描, 像素格式 |
//! | `tao-codec` | 解码器框架与 MPEG-2 视频解码器 |

/// 核心类型与工具 (对标 libavutil)
pub use tao_core as core;

/// 解码器框架 (对标 libavcodec)
pub use tao_codec as codec;

pub use tao_codec::decoders::mpeg2video::{
    DecodeSummary, Mpeg2Decoder, Mpeg2DecoderConfig, OutputPicture, PictureInfo,
};

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置解码器的注册表
pub fn default_codec_registry() -> tao_codec::CodecRegistry {
    let mut registry = tao_codec::CodecRegistry::new();
    tao_codec::register_all(&mut registry);
    registry
}
