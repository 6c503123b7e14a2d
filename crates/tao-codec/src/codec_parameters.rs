//! 编解码器参数.
//!
//! 通常由上层从容器或命令行提取, 在 `Decoder::open` 时传入.

use tao_core::{PixelFormat, Rational};

use crate::codec_id::CodecId;

/// 编解码器参数
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 额外数据 (如带外传输的序列头)
    pub extra_data: Vec<u8>,
    /// 视频参数
    pub video: VideoCodecParams,
}

/// 视频编解码器参数
///
/// 宽高为 0 表示未知, 由解码器使用默认能力上限.
#[derive(Debug, Clone)]
pub struct VideoCodecParams {
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 帧率
    pub frame_rate: Rational,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
}

impl Default for VideoCodecParams {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_format: PixelFormat::None,
            frame_rate: Rational::UNDEFINED,
            sample_aspect_ratio: Rational::UNDEFINED,
        }
    }
}

impl CodecParameters {
    /// 创建只含编解码器标识的参数
    pub fn new(codec_id: CodecId) -> Self {
        Self {
            codec_id,
            extra_data: Vec::new(),
            video: VideoCodecParams::default(),
        }
    }
}
