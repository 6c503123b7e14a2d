//! 运动向量解码与运动补偿
//!
//! 向量以半像素为单位. 色度向量由亮度向量按采样格式减半 (向零截断).

use tao_core::TaoResult;
use tao_core::bitreader::BitReader;

use super::frame_buffer::{FrameCell, SliceStrip};
use super::kernel::{PixelKernel, PredBlock};
use super::types::{ChromaFormat, MotionVector};
use super::vlc::decode_motion_code;

/// 把向量折回 `[-16f, 16f - 1]`
pub(super) fn wrap_vector(v: i32, r_size: u32) -> i32 {
    let f = 1i32 << r_size;
    let (low, high, range) = (-16 * f, 16 * f - 1, 32 * f);
    if v < low {
        v + range
    } else if v > high {
        v - range
    } else {
        v
    }
}

/// 解码一个向量分量: motion_code + motion_residual, 加上预测值并折回
pub(super) fn decode_motion_component(
    br: &mut BitReader,
    f_code: u8,
    prediction: i32,
) -> TaoResult<i32> {
    let r_size = u32::from(f_code).saturating_sub(1);
    let code = decode_motion_code(br)?;
    let delta = if code == 0 || r_size == 0 {
        code
    } else {
        let residual = br.get_bits(r_size) as i32;
        let magnitude = ((code.abs() - 1) << r_size) + residual + 1;
        if code < 0 { -magnitude } else { magnitude }
    };
    Ok(wrap_vector(prediction + delta, r_size))
}

#[inline]
fn dual_prime_scale(v: i32, m: i32) -> i32 {
    (v * m + i32::from(v > 0)) >> 1
}

/// 帧图像双基导出向量 (场单位)
///
/// 返回 `[顶场行由底场参考预测, 底场行由顶场参考预测]`.
pub(super) fn dual_prime_frame(
    mv: MotionVector,
    dmv: MotionVector,
    top_field_first: bool,
) -> [MotionVector; 2] {
    let m = if top_field_first { 1 } else { 3 };
    let n = 4 - m;
    [
        MotionVector::new(
            dual_prime_scale(mv.x, m) + dmv.x,
            dual_prime_scale(mv.y, m) + dmv.y - 1,
        ),
        MotionVector::new(
            dual_prime_scale(mv.x, n) + dmv.x,
            dual_prime_scale(mv.y, n) + dmv.y + 1,
        ),
    ]
}

/// 场图像双基导出向量: 指向相反奇偶场
pub(super) fn dual_prime_field(mv: MotionVector, dmv: MotionVector, bottom: bool) -> MotionVector {
    let e = if bottom { 1 } else { -1 };
    MotionVector::new(
        dual_prime_scale(mv.x, 1) + dmv.x,
        dual_prime_scale(mv.y, 1) + dmv.y + e,
    )
}

/// 色度向量
#[inline]
fn chroma_vector(mv: MotionVector, chroma: ChromaFormat) -> MotionVector {
    let (sx, sy) = chroma.shift();
    MotionVector::new(
        if sx > 0 { mv.x / 2 } else { mv.x },
        if sy > 0 { mv.y / 2 } else { mv.y },
    )
}

/// 参考源: 帧单元与可选场
#[derive(Clone, Copy)]
pub(super) struct PredictionSource<'a> {
    pub cell: &'a FrameCell,
    pub field: Option<usize>,
}

/// 预测区域, 坐标均为亮度像素
#[derive(Debug, Clone, Copy)]
pub(super) struct PredictionArea {
    /// 图像内横坐标
    pub x: usize,
    /// 条带内目标行 (`dst_field` 为 Some 时以场行计)
    pub dst_y: usize,
    pub dst_field: Option<usize>,
    /// 参考视图内的纵坐标 (未加向量)
    pub src_y: usize,
    pub width: usize,
    pub height: usize,
}

/// 对三个平面执行单向预测, 写入或平均到条带
pub(super) fn predict_area(
    kernel: &dyn PixelKernel,
    strip: &mut SliceStrip,
    chroma: ChromaFormat,
    source: PredictionSource<'_>,
    mv: MotionVector,
    area: PredictionArea,
    average: bool,
) -> TaoResult<()> {
    let mut window = [0u8; 17 * 17];
    let (csx, csy) = chroma.shift();
    for plane in 0..3 {
        let (sx, sy, v) = if plane == 0 {
            (0, 0, mv)
        } else {
            (csx, csy, chroma_vector(mv, chroma))
        };
        let block = PredBlock {
            width: area.width >> sx,
            height: area.height >> sy,
            half_x: v.x & 1 != 0,
            half_y: v.y & 1 != 0,
        };
        let src_x = (area.x >> sx) as i32 + (v.x >> 1);
        let src_y = (area.src_y >> sy) as i32 + (v.y >> 1);
        let window_stride = block.width + 1;
        {
            let buffer = source.cell.read()?;
            buffer.plane(plane).view(source.field).fetch(
                src_x,
                src_y,
                window_stride,
                block.height + 1,
                &mut window,
            );
        }
        let (dst, dst_stride) = strip.target(plane, area.x >> sx, area.dst_y >> sy, area.dst_field);
        kernel.predict(dst, dst_stride, &window, window_stride, block, average);
    }
    Ok(())
}
