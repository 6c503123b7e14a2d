//! 编解码器标识符.

use std::fmt;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// 未知编解码器
    None,
    /// MPEG-1 Video
    Mpeg1Video,
    /// MPEG-2 Video (ISO/IEC 13818-2)
    Mpeg2Video,
}

impl CodecId {
    /// 获取编解码器的短名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mpeg1Video => "mpeg1video",
            Self::Mpeg2Video => "mpeg2video",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
