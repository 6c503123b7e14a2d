//! # tao-core
//!
//! Tao 多媒体框架核心库: 错误类型, 比特流读写, 起始码扫描和基础类型.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod pixel_format;
pub mod rational;
pub mod startcode;

// 重导出常用类型
pub use error::{TaoError, TaoResult};
pub use pixel_format::PixelFormat;
pub use rational::Rational;
