//! 流解码器配置

use tao_core::{TaoError, TaoResult};

use super::types::ChromaFormat;

/// 水平/垂直尺寸上限 (14 位)
pub const MAX_DIMENSION: usize = 16383;

/// 同时存在的参考图像数
const REFERENCE_COUNT: usize = 2;

/// 流解码器配置, 在解码开始前一次性给定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mpeg2DecoderConfig {
    /// 帧池按此宽度分配, 码流尺寸不得超过
    pub width: usize,
    pub height: usize,
    pub chroma_format: ChromaFormat,
    /// 图像池槽位数
    pub pool_depth: usize,
    /// 两个参考图像之间最多的 B 图像数
    pub max_b_frames: usize,
    /// 工作线程数
    pub threads: usize,
    /// 按显示顺序输出; 关闭时按解码顺序
    pub reorder: bool,
}

impl Default for Mpeg2DecoderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1088,
            chroma_format: ChromaFormat::Yuv420,
            pool_depth: 8,
            max_b_frames: 2,
            threads: 4,
            reorder: true,
        }
    }
}

impl Mpeg2DecoderConfig {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_chroma_format(mut self, chroma: ChromaFormat) -> Self {
        self.chroma_format = chroma;
        self
    }

    pub fn with_pool_depth(mut self, depth: usize) -> Self {
        self.pool_depth = depth;
        self
    }

    pub fn with_max_b_frames(mut self, count: usize) -> Self {
        self.max_b_frames = count;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_reorder(mut self, reorder: bool) -> Self {
        self.reorder = reorder;
        self
    }

    /// 给定 B 图像游程所需的最小池深度
    ///
    /// 正在创建的图像 + B 游程 + 两个参考图像.
    pub fn min_pool_depth(max_b_frames: usize) -> usize {
        1 + max_b_frames + REFERENCE_COUNT
    }

    /// 宏块对齐后的编码尺寸
    pub fn coded_size(&self) -> (usize, usize) {
        (
            self.width.next_multiple_of(16),
            self.height.next_multiple_of(32),
        )
    }

    /// 检查配置, 在启动任何线程之前调用
    pub fn validate(&self) -> TaoResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TaoError::InvalidArgument(format!(
                "帧尺寸无效: {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(TaoError::InvalidArgument(format!(
                "帧尺寸 {}x{} 超出上限 {MAX_DIMENSION}",
                self.width, self.height
            )));
        }
        if self.threads == 0 {
            return Err(TaoError::InvalidArgument("工作线程数不能为 0".into()));
        }
        let min = Self::min_pool_depth(self.max_b_frames);
        if self.pool_depth < min {
            return Err(TaoError::InvalidArgument(format!(
                "图像池深度 {} 不足: {} 个 B 图像至少需要 {min}",
                self.pool_depth, self.max_b_frames
            )));
        }
        Ok(())
    }
}
