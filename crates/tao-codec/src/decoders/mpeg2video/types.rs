//! MPEG-2 视频解码器类型定义

use bitflags::bitflags;
use tao_core::PixelFormat;

use crate::frame::PictureType;

/// 色度格式 (sequence_extension.chroma_format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChromaFormat {
    /// 4:2:0
    #[default]
    Yuv420,
    /// 4:2:2
    Yuv422,
    /// 4:4:4
    Yuv444,
}

impl ChromaFormat {
    /// 从 2 位码值解析, 0 为保留值
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Yuv420),
            2 => Some(Self::Yuv422),
            3 => Some(Self::Yuv444),
            _ => None,
        }
    }

    /// 对应的像素格式
    pub fn pixel_format(self) -> PixelFormat {
        match self {
            Self::Yuv420 => PixelFormat::Yuv420p,
            Self::Yuv422 => PixelFormat::Yuv422p,
            Self::Yuv444 => PixelFormat::Yuv444p,
        }
    }

    /// 从像素格式反推
    pub fn from_pixel_format(format: PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::Yuv420p => Some(Self::Yuv420),
            PixelFormat::Yuv422p => Some(Self::Yuv422),
            PixelFormat::Yuv444p => Some(Self::Yuv444),
            _ => None,
        }
    }

    /// 色度下采样移位 `(水平, 垂直)`
    pub fn shift(self) -> (u32, u32) {
        self.pixel_format().chroma_shift()
    }

    /// 每个宏块的 8x8 块数: 6 / 8 / 12
    pub fn block_count(self) -> usize {
        match self {
            Self::Yuv420 => 6,
            Self::Yuv422 => 8,
            Self::Yuv444 => 12,
        }
    }

    /// 宏块色度区域的 `(宽, 高)`
    pub fn mb_chroma_size(self) -> (usize, usize) {
        let (sx, sy) = self.shift();
        (16 >> sx, 16 >> sy)
    }
}

/// 图像编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureCodingType {
    /// 帧内编码
    Intra,
    /// 前向预测
    Predicted,
    /// 双向预测
    Bidirectional,
}

impl PictureCodingType {
    /// 从 3 位码值解析; D 图像 (4) 与保留值返回 None
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Intra),
            2 => Some(Self::Predicted),
            3 => Some(Self::Bidirectional),
            _ => None,
        }
    }

    /// 是否为参考图像 (I/P)
    pub fn is_reference(self) -> bool {
        self != Self::Bidirectional
    }

    /// 转换为通用帧类型
    pub fn picture_type(self) -> PictureType {
        match self {
            Self::Intra => PictureType::I,
            Self::Predicted => PictureType::P,
            Self::Bidirectional => PictureType::B,
        }
    }
}

/// 图像结构 (picture_coding_extension.picture_structure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureStructure {
    /// 顶场
    TopField,
    /// 底场
    BottomField,
    /// 帧
    Frame,
}

impl PictureStructure {
    /// 从 2 位码值解析, 0 为保留值
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::TopField),
            2 => Some(Self::BottomField),
            3 => Some(Self::Frame),
            _ => None,
        }
    }

    /// 是否为场图像
    pub fn is_field(self) -> bool {
        self != Self::Frame
    }

    /// 场奇偶性: 顶场 0, 底场 1, 帧图像返回 0
    pub fn parity(self) -> usize {
        usize::from(self == Self::BottomField)
    }
}

/// 运动预测类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PredictionType {
    /// 帧预测 (帧图像)
    #[default]
    Frame,
    /// 场预测
    Field,
    /// 双基预测 (Dual-Prime)
    DualPrime,
    /// 16x8 预测 (场图像)
    Mc16x8,
}

bitflags! {
    /// 宏块类型标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MacroblockType: u8 {
        /// 携带 quantiser_scale_code
        const QUANT = 0x01;
        /// 前向运动补偿
        const MOTION_FORWARD = 0x02;
        /// 后向运动补偿
        const MOTION_BACKWARD = 0x04;
        /// 携带 coded_block_pattern
        const PATTERN = 0x08;
        /// 帧内宏块
        const INTRA = 0x10;
    }
}

impl MacroblockType {
    /// 是否为帧内宏块
    #[inline]
    pub fn is_intra(self) -> bool {
        self.contains(Self::INTRA)
    }
}

/// 运动向量, 单位为半像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    pub x: i32,
    pub y: i32,
}

impl MotionVector {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}
