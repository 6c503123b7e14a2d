//! 图像缓冲区
//!
//! - [`Plane`] / [`PictureBuffer`]: 池槽位独占的三平面帧存储, 步长按 64 字节对齐.
//! - [`PlaneView`]: 帧或单场的只读视图, 运动补偿通过它做边界钳位取样.
//! - [`SliceStrip`]: 单个宏块行的本地重建缓冲, 条带解码结束后一次性提交.
//! - [`FrameCell`]: 在调度器, 条带任务与输出端之间共享的帧单元.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tao_core::{Rational, TaoError, TaoResult};

use super::types::{ChromaFormat, PictureCodingType, PictureStructure};

/// 平面步长对齐
const STRIDE_ALIGN: usize = 64;

/// 单个像素平面
#[derive(Debug, Clone, Default)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
    width: usize,
    height: usize,
}

impl Plane {
    fn new(width: usize, height: usize) -> Self {
        let stride = width.next_multiple_of(STRIDE_ALIGN).max(STRIDE_ALIGN);
        Self {
            data: vec![0; stride * height],
            stride,
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// 原始数据 (含步长填充)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 第 `y` 行的有效像素
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// 帧视图 (`None`) 或指定奇偶场视图
    pub(super) fn view(&self, field: Option<usize>) -> PlaneView<'_> {
        match field {
            None => PlaneView {
                data: &self.data,
                offset: 0,
                stride: self.stride,
                width: self.width,
                height: self.height,
            },
            Some(parity) => PlaneView {
                data: &self.data,
                offset: parity * self.stride,
                stride: self.stride * 2,
                width: self.width,
                height: self.height / 2,
            },
        }
    }
}

/// 平面只读视图
pub(super) struct PlaneView<'a> {
    data: &'a [u8],
    offset: usize,
    stride: usize,
    width: usize,
    height: usize,
}

impl PlaneView<'_> {
    /// 读取以 `(x, y)` 为左上角的 `w x h` 窗口到 `out` (步长 `w`)
    ///
    /// 超出视图的坐标钳位到最近的边缘像素.
    pub(super) fn fetch(&self, x: i32, y: i32, w: usize, h: usize, out: &mut [u8]) {
        let max_x = self.width as i32 - 1;
        let max_y = self.height as i32 - 1;
        let inside = x >= 0 && y >= 0 && x + w as i32 - 1 <= max_x && y + h as i32 - 1 <= max_y;
        for (j, line) in out.chunks_exact_mut(w).take(h).enumerate() {
            let yy = (y + j as i32).clamp(0, max_y) as usize;
            let row = self.offset + yy * self.stride;
            if inside {
                let start = row + x as usize;
                line.copy_from_slice(&self.data[start..start + w]);
            } else {
                for (i, p) in line.iter_mut().enumerate() {
                    let xx = (x + i as i32).clamp(0, max_x) as usize;
                    *p = self.data[row + xx];
                }
            }
        }
    }
}

/// 三平面图像存储
#[derive(Debug, Clone, Default)]
pub struct PictureBuffer {
    planes: [Plane; 3],
    chroma: ChromaFormat,
}

impl PictureBuffer {
    /// 按编码尺寸 (宏块对齐) 分配
    pub fn new(width: usize, height: usize, chroma: ChromaFormat) -> Self {
        let (sx, sy) = chroma.shift();
        Self {
            planes: [
                Plane::new(width, height),
                Plane::new(width >> sx, height >> sy),
                Plane::new(width >> sx, height >> sy),
            ],
            chroma,
        }
    }

    /// 尺寸或色度格式变化时重新分配
    pub(super) fn configure(&mut self, width: usize, height: usize, chroma: ChromaFormat) {
        if self.width() != width || self.height() != height || self.chroma != chroma {
            *self = Self::new(width, height, chroma);
        }
    }

    pub fn width(&self) -> usize {
        self.planes[0].width
    }

    pub fn height(&self) -> usize {
        self.planes[0].height
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        self.chroma
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn planes(&self) -> &[Plane; 3] {
        &self.planes
    }
}

// ============================================================================
// 条带缓冲
// ============================================================================

struct StripPlane {
    data: Vec<u8>,
    stride: usize,
    lines: usize,
}

/// 一个宏块行的重建缓冲, 行坐标以当前图像 (帧或场) 为准
pub(super) struct SliceStrip {
    planes: [StripPlane; 3],
    chroma: ChromaFormat,
}

impl SliceStrip {
    pub(super) fn new(mb_width: usize, chroma: ChromaFormat) -> Self {
        let (cw, ch) = chroma.mb_chroma_size();
        let plane = |w: usize, lines: usize| StripPlane {
            data: vec![0; w * lines],
            stride: w,
            lines,
        };
        Self {
            planes: [
                plane(mb_width * 16, 16),
                plane(mb_width * cw, ch),
                plane(mb_width * cw, ch),
            ],
            chroma,
        }
    }

    /// 块写入目标: 返回从 `(x, y)` 开始的可变切片与步长
    ///
    /// `field` 为 `Some(p)` 时 `y` 以场行计, 只寻址奇偶性为 `p` 的行.
    pub(super) fn target(
        &mut self,
        plane: usize,
        x: usize,
        y: usize,
        field: Option<usize>,
    ) -> (&mut [u8], usize) {
        let p = &mut self.planes[plane];
        let (line, stride) = match field {
            None => (y, p.stride),
            Some(parity) => (y * 2 + parity, p.stride * 2),
        };
        (&mut p.data[line * p.stride + x..], stride)
    }

    /// 把宏块列范围 `columns` 写回图像缓冲区的第 `mb_row` 行
    pub(super) fn commit(
        &self,
        buffer: &mut PictureBuffer,
        mb_row: usize,
        structure: PictureStructure,
        columns: Range<usize>,
    ) {
        let (cw, _) = self.chroma.mb_chroma_size();
        for (index, strip) in self.planes.iter().enumerate() {
            let mb_w = if index == 0 { 16 } else { cw };
            let x0 = columns.start * mb_w;
            let x1 = (columns.end * mb_w).min(strip.stride);
            let dst = &mut buffer.planes[index];
            for l in 0..strip.lines {
                let y = mb_row * strip.lines + l;
                let frame_line = match structure {
                    PictureStructure::Frame => y,
                    field => y * 2 + field.parity(),
                };
                if frame_line >= dst.height {
                    break;
                }
                let src = &strip.data[l * strip.stride..(l + 1) * strip.stride];
                dst.row_mut(frame_line)[x0..x1].copy_from_slice(&src[x0..x1]);
            }
        }
    }
}

// ============================================================================
// 共享帧单元
// ============================================================================

/// 输出端需要的图像元数据
#[derive(Debug, Clone, PartialEq)]
pub struct PictureInfo {
    /// 解码顺序序号
    pub decode_index: u64,
    pub coding_type: PictureCodingType,
    pub temporal_reference: u16,
    /// 显示宽度
    pub display_width: usize,
    /// 显示高度
    pub display_height: usize,
    pub progressive_frame: bool,
    pub top_field_first: bool,
    pub repeat_first_field: bool,
    pub frame_rate: Rational,
    pub sample_aspect_ratio: Rational,
    /// 图像之前出现的用户数据
    pub user_data: Vec<u8>,
}

impl Default for PictureInfo {
    fn default() -> Self {
        Self {
            decode_index: 0,
            coding_type: PictureCodingType::Intra,
            temporal_reference: 0,
            display_width: 0,
            display_height: 0,
            progressive_frame: true,
            top_field_first: false,
            repeat_first_field: false,
            frame_rate: Rational::UNDEFINED,
            sample_aspect_ratio: Rational::UNDEFINED,
            user_data: Vec::new(),
        }
    }
}

/// 池槽位持有的帧: 像素, 元数据与条带统计
#[derive(Debug, Default)]
pub struct FrameCell {
    buffer: RwLock<PictureBuffer>,
    info: Mutex<PictureInfo>,
    decoded_slices: AtomicUsize,
    failed_slices: AtomicUsize,
}

fn poisoned(what: &str) -> TaoError {
    TaoError::Internal(format!("{what}锁已中毒"))
}

impl FrameCell {
    pub(super) fn new(buffer: PictureBuffer) -> Self {
        Self {
            buffer: RwLock::new(buffer),
            ..Self::default()
        }
    }

    pub(super) fn read(&self) -> TaoResult<RwLockReadGuard<'_, PictureBuffer>> {
        self.buffer.read().map_err(|_| poisoned("帧缓冲"))
    }

    pub(super) fn write(&self) -> TaoResult<RwLockWriteGuard<'_, PictureBuffer>> {
        self.buffer.write().map_err(|_| poisoned("帧缓冲"))
    }

    pub(super) fn info(&self) -> TaoResult<MutexGuard<'_, PictureInfo>> {
        self.info.lock().map_err(|_| poisoned("图像信息"))
    }

    /// 新图像开始使用本单元时重置统计
    pub(super) fn reset(&self, info: PictureInfo) -> TaoResult<()> {
        *self.info()? = info;
        self.decoded_slices.store(0, Ordering::Relaxed);
        self.failed_slices.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub(super) fn record_slice(&self, ok: bool) {
        if ok {
            self.decoded_slices.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failed_slices.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn decoded_slices(&self) -> usize {
        self.decoded_slices.load(Ordering::Acquire)
    }

    pub fn failed_slices(&self) -> usize {
        self.failed_slices.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer() -> PictureBuffer {
        let mut buf = PictureBuffer::new(16, 16, ChromaFormat::Yuv420);
        for y in 0..16 {
            for (x, p) in buf.planes[0].row_mut(y).iter_mut().enumerate() {
                *p = (y * 16 + x) as u8;
            }
        }
        buf
    }

    #[test]
    fn test_stride_alignment_and_chroma_size() {
        let buf = PictureBuffer::new(720, 576, ChromaFormat::Yuv422);
        assert_eq!(buf.plane(0).stride() % STRIDE_ALIGN, 0);
        assert!(buf.plane(0).stride() >= 720);
        assert_eq!(buf.plane(1).width(), 360);
        assert_eq!(buf.plane(1).height(), 576);
    }

    #[test]
    fn test_fetch_clamps_to_edges() {
        let buf = ramp_buffer();
        let view = buf.plane(0).view(None);
        let mut out = [0u8; 4];
        view.fetch(-3, -1, 2, 2, &mut out);
        assert_eq!(out, [0, 0, 0, 0]);
        view.fetch(15, 15, 2, 2, &mut out);
        assert_eq!(out, [255, 255, 255, 255]);
        view.fetch(4, 2, 2, 2, &mut out);
        assert_eq!(out, [36, 37, 52, 53]);
    }

    #[test]
    fn test_field_view_lines() {
        let buf = ramp_buffer();
        let bottom = buf.plane(0).view(Some(1));
        let mut out = [0u8; 2];
        bottom.fetch(0, 0, 1, 2, &mut out);
        assert_eq!(out, [16, 48], "底场第 0/1 行应为帧第 1/3 行");
        bottom.fetch(0, 9, 1, 1, &mut out[..1]);
        assert_eq!(out[0], 240, "场视图纵向钳位到第 7 场行");
    }

    #[test]
    fn test_strip_commit_field_lines() {
        let mut buf = PictureBuffer::new(32, 32, ChromaFormat::Yuv420);
        let mut strip = SliceStrip::new(2, ChromaFormat::Yuv420);
        let (dst, stride) = strip.target(0, 16, 0, None);
        for y in 0..16 {
            dst[y * stride..y * stride + 16].fill(7);
        }
        strip.commit(&mut buf, 0, PictureStructure::BottomField, 1..2);
        assert_eq!(buf.plane(0).row(1)[16], 7);
        assert_eq!(buf.plane(0).row(31)[31], 7);
        assert_eq!(buf.plane(0).row(0)[16], 0, "顶场行不应被写入");
        assert_eq!(buf.plane(0).row(1)[15], 0, "未提交的宏块列不应被写入");
    }
}
