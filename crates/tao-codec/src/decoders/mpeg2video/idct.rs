//! 8x8 整数逆 DCT
//!
//! 行列分离的定点实现, 系数按 2^14 缩放, 行变换保留 3 位小数精度,
//! 列变换后舍入到整数. 精度满足 IEEE 1180.

/// cos(k*π/16) * √2 * 2^14, k = 1..=7
const W: [i64; 8] = [0, 22725, 21407, 19266, 16383, 12873, 8867, 4520];

const ROW_SHIFT: u32 = 11;
const COL_SHIFT: u32 = 20;
const DC_SHIFT: u32 = 3;

/// 一维蝶形运算, 输出 8 个未移位的值
#[inline(always)]
fn butterfly(x: [i64; 8], bias: i64) -> [i64; 8] {
    let base = W[4] * x[0] + bias;
    let even = [
        base + W[2] * x[2] + W[4] * x[4] + W[6] * x[6],
        base + W[6] * x[2] - W[4] * x[4] - W[2] * x[6],
        base - W[6] * x[2] - W[4] * x[4] + W[2] * x[6],
        base - W[2] * x[2] + W[4] * x[4] - W[6] * x[6],
    ];
    let odd = [
        W[1] * x[1] + W[3] * x[3] + W[5] * x[5] + W[7] * x[7],
        W[3] * x[1] - W[7] * x[3] - W[1] * x[5] - W[5] * x[7],
        W[5] * x[1] - W[1] * x[3] + W[7] * x[5] + W[3] * x[7],
        W[7] * x[1] - W[5] * x[3] + W[3] * x[5] - W[1] * x[7],
    ];
    [
        even[0] + odd[0],
        even[1] + odd[1],
        even[2] + odd[2],
        even[3] + odd[3],
        even[3] - odd[3],
        even[2] - odd[2],
        even[1] - odd[1],
        even[0] - odd[0],
    ]
}

#[inline(always)]
fn ac_is_zero(x: &[i64; 8]) -> bool {
    x[1..].iter().all(|&v| v == 0)
}

/// 原地二维逆变换, 结果为带符号残差
pub fn idct(block: &mut [i32; 64]) {
    for row in block.chunks_exact_mut(8) {
        let x: [i64; 8] = std::array::from_fn(|i| i64::from(row[i]));
        if ac_is_zero(&x) {
            row.fill((x[0] << DC_SHIFT) as i32);
            continue;
        }
        let y = butterfly(x, 1 << (ROW_SHIFT - 1));
        for (dst, v) in row.iter_mut().zip(y) {
            *dst = (v >> ROW_SHIFT) as i32;
        }
    }
    for col in 0..8 {
        let x: [i64; 8] = std::array::from_fn(|i| i64::from(block[col + i * 8]));
        let y = butterfly(x, 1 << (COL_SHIFT - 1));
        for (i, v) in y.into_iter().enumerate() {
            block[col + i * 8] = (v >> COL_SHIFT) as i32;
        }
    }
}

/// 逆变换后写入像素, 饱和到 0..=255
pub fn idct_put(block: &mut [i32; 64], dst: &mut [u8], stride: usize) {
    idct(block);
    for (r, src) in block.chunks_exact(8).enumerate() {
        let line = &mut dst[r * stride..r * stride + 8];
        for (p, &v) in line.iter_mut().zip(src) {
            *p = v.clamp(0, 255) as u8;
        }
    }
}

/// 逆变换后叠加到已有预测上, 饱和到 0..=255
pub fn idct_add(block: &mut [i32; 64], dst: &mut [u8], stride: usize) {
    idct(block);
    for (r, src) in block.chunks_exact(8).enumerate() {
        let line = &mut dst[r * stride..r * stride + 8];
        for (p, &v) in line.iter_mut().zip(src) {
            *p = (i32::from(*p) + v).clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 双精度参考实现
    fn reference_idct(block: &[i32; 64]) -> [f64; 64] {
        let c = |u: usize| if u == 0 { (0.5f64).sqrt() } else { 1.0 };
        let mut out = [0f64; 64];
        for y in 0..8 {
            for x in 0..8 {
                let mut s = 0.0;
                for v in 0..8 {
                    for u in 0..8 {
                        s += c(u)
                            * c(v)
                            * f64::from(block[v * 8 + u])
                            * (((2 * x + 1) as f64 * u as f64 * std::f64::consts::PI) / 16.0).cos()
                            * (((2 * y + 1) as f64 * v as f64 * std::f64::consts::PI) / 16.0).cos();
                    }
                }
                out[y * 8 + x] = s / 4.0;
            }
        }
        out
    }

    #[test]
    fn test_dc_only_block_is_flat() {
        let mut block = [0i32; 64];
        block[0] = 800;
        idct(&mut block);
        assert!(block.iter().all(|&v| v == 100), "纯 DC 块应输出常数 DC/8");
    }

    #[test]
    fn test_matches_reference_within_one() {
        let mut seed = 12345u32;
        for _ in 0..200 {
            let mut block = [0i32; 64];
            for c in block.iter_mut().take(20) {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                *c = ((seed >> 16) % 256) as i32 - 128;
            }
            let expect = reference_idct(&block);
            idct(&mut block);
            for (got, want) in block.iter().zip(expect.iter()) {
                assert!(
                    (f64::from(*got) - want).abs() <= 1.0,
                    "逆变换误差过大: got={got}, want={want}"
                );
            }
        }
    }

    #[test]
    fn test_put_and_add_saturate() {
        let mut dst = vec![250u8; 16 * 8];
        let mut block = [0i32; 64];
        block[0] = 80;
        idct_add(&mut block, &mut dst, 16);
        assert_eq!(dst[0], 255);
        assert_eq!(dst[8], 250, "块外像素不应被修改");

        let mut block = [0i32; 64];
        block[0] = -80;
        idct_put(&mut block, &mut dst, 16);
        assert_eq!(dst[7 * 16 + 7], 0);
    }
}
