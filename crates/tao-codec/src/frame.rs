//! 解码后的帧数据 (Frame).

use tao_core::{PixelFormat, Rational};

use crate::packet::NOPTS_VALUE;

/// 视频帧
///
/// 包含解码后的原始像素数据, 按平面存储 (Y, U, V).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: Vec<Vec<u8>>,
    /// 各平面每行的字节数 (linesize / stride)
    pub linesize: Vec<usize>,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 显示时间戳 (按输出顺序递增的帧序号)
    pub pts: i64,
    /// 图片类型 (I/P/B 帧)
    pub picture_type: PictureType,
    /// 是否为关键帧
    pub is_keyframe: bool,
    /// GOP 内的时间参考号
    pub temporal_reference: u16,
    /// 是否为逐行帧
    pub progressive: bool,
    /// 顶场优先
    pub top_field_first: bool,
    /// 重复首场
    pub repeat_first_field: bool,
    /// 帧率
    pub frame_rate: Rational,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
    /// 是否有 slice 解码失败
    pub corrupted: bool,
}

impl VideoFrame {
    /// 创建空的视频帧
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let plane_count = pixel_format.plane_count();
        Self {
            data: vec![Vec::new(); plane_count],
            linesize: vec![0; plane_count],
            width,
            height,
            pixel_format,
            pts: NOPTS_VALUE,
            picture_type: PictureType::None,
            is_keyframe: false,
            temporal_reference: 0,
            progressive: true,
            top_field_first: false,
            repeat_first_field: false,
            frame_rate: Rational::UNDEFINED,
            sample_aspect_ratio: Rational::new(1, 1),
            corrupted: false,
        }
    }
}

/// 图片类型 (I/P/B 帧)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureType {
    /// 未指定
    #[default]
    None,
    /// I 帧 (关键帧, 帧内编码)
    I,
    /// P 帧 (前向预测)
    P,
    /// B 帧 (双向预测)
    B,
}
