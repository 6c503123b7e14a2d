//! 像素格式定义.
//!
//! 解码器输出仅涉及 8 位 YUV 平面格式, 由序列扩展中的色度格式决定.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 未指定
    #[default]
    None,
    /// YUV 4:2:0 平面格式, 8 位
    Yuv420p,
    /// YUV 4:2:2 平面格式, 8 位
    Yuv422p,
    /// YUV 4:4:4 平面格式, 8 位
    Yuv444p,
}

impl PixelFormat {
    /// 色度下采样移位 `(水平, 垂直)`
    pub const fn chroma_shift(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (1, 1),
            Self::Yuv422p => (1, 0),
            Self::Yuv444p | Self::None => (0, 0),
        }
    }

    /// 平面数量
    pub const fn plane_count(&self) -> usize {
        match self {
            Self::None => 0,
            _ => 3,
        }
    }

    /// 指定平面的 `(宽度, 高度)`
    pub fn plane_size(&self, plane: usize, width: u32, height: u32) -> Option<(u32, u32)> {
        if plane >= self.plane_count() {
            return None;
        }
        if plane == 0 {
            return Some((width, height));
        }
        let (sx, sy) = self.chroma_shift();
        Some((width.div_ceil(1 << sx), height.div_ceil(1 << sy)))
    }

    /// 一帧紧凑存储所需的字节数
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        if *self == Self::None {
            return None;
        }
        let mut total = 0usize;
        for p in 0..self.plane_count() {
            let (w, h) = self.plane_size(p, width, height)?;
            total += w as usize * h as usize;
        }
        Some(total)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
        };
        write!(f, "{name}")
    }
}
