//! 像素块预测内核
//!
//! 运动补偿的最内层: 从参考窗口按半像素相位插值出预测块, 可选地与已有预测取平均.
//! 默认提供可移植实现, 加速实现只需实现 [`PixelKernel`] 并通过
//! [`Mpeg2Decoder::with_kernel`](super::Mpeg2Decoder::with_kernel) 注入.

/// 预测块几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredBlock {
    /// 块宽度 (像素)
    pub width: usize,
    /// 块高度 (像素)
    pub height: usize,
    /// 水平半像素
    pub half_x: bool,
    /// 垂直半像素
    pub half_y: bool,
}

/// 像素块预测能力
///
/// `src` 至少包含 `(width + 1) x (height + 1)` 个样本 (步长 `src_stride`),
/// 结果写入 `dst` 的 `width x height` 区域 (步长 `dst_stride`).
/// `average` 为 true 时结果与 `dst` 原值做 `(a + b + 1) >> 1` 平均.
pub trait PixelKernel: Send + Sync {
    fn predict(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
        src: &[u8],
        src_stride: usize,
        block: PredBlock,
        average: bool,
    );

    /// 内核名称, 用于日志
    fn name(&self) -> &'static str {
        "portable"
    }
}

/// 标量实现
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableKernel;

#[inline(always)]
fn sample(src: &[u8], stride: usize, x: usize, y: usize, block: PredBlock) -> u8 {
    let p = |dx: usize, dy: usize| u32::from(src[(y + dy) * stride + x + dx]);
    let v = match (block.half_x, block.half_y) {
        (false, false) => p(0, 0),
        (true, false) => (p(0, 0) + p(1, 0) + 1) >> 1,
        (false, true) => (p(0, 0) + p(0, 1) + 1) >> 1,
        (true, true) => (p(0, 0) + p(1, 0) + p(0, 1) + p(1, 1) + 2) >> 2,
    };
    v as u8
}

impl PixelKernel for PortableKernel {
    fn predict(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
        src: &[u8],
        src_stride: usize,
        block: PredBlock,
        average: bool,
    ) {
        for y in 0..block.height {
            let line = &mut dst[y * dst_stride..y * dst_stride + block.width];
            for (x, d) in line.iter_mut().enumerate() {
                let v = sample(src, src_stride, x, y, block);
                *d = if average {
                    ((u32::from(*d) + u32::from(v) + 1) >> 1) as u8
                } else {
                    v
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(half_x: bool, half_y: bool) -> PredBlock {
        PredBlock {
            width: 2,
            height: 2,
            half_x,
            half_y,
        }
    }

    #[test]
    fn test_half_pel_phases() {
        // 3x3 源窗口
        let src = [10u8, 20, 30, 40, 50, 60, 70, 80, 90];
        let k = PortableKernel;
        let mut dst = [0u8; 4];

        k.predict(&mut dst, 2, &src, 3, block(false, false), false);
        assert_eq!(dst, [10, 20, 40, 50]);

        k.predict(&mut dst, 2, &src, 3, block(true, false), false);
        assert_eq!(dst, [15, 25, 45, 55]);

        k.predict(&mut dst, 2, &src, 3, block(false, true), false);
        assert_eq!(dst, [25, 35, 55, 65]);

        k.predict(&mut dst, 2, &src, 3, block(true, true), false);
        assert_eq!(dst, [30, 40, 60, 70]);
    }

    #[test]
    fn test_average_rounds_up() {
        let src = [101u8; 9];
        let mut dst = [100u8; 4];
        PortableKernel.predict(&mut dst, 2, &src, 3, block(false, false), true);
        assert_eq!(dst, [101; 4], "(100 + 101 + 1) >> 1 应为 101");
    }
}
