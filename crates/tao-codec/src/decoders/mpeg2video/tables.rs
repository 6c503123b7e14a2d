//! MPEG-2 常量表: 扫描顺序, 默认量化矩阵, 非线性量化尺度, 帧率.

use tao_core::Rational;

/// Zigzag 扫描: 扫描序号 -> 自然顺序位置
pub const ZIGZAG_SCAN: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, //
    17, 24, 32, 25, 18, 11, 4, 5, //
    12, 19, 26, 33, 40, 48, 41, 34, //
    27, 20, 13, 6, 7, 14, 21, 28, //
    35, 42, 49, 56, 57, 50, 43, 36, //
    29, 22, 15, 23, 30, 37, 44, 51, //
    58, 59, 52, 45, 38, 31, 39, 46, //
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// 交替扫描 (alternate_scan = 1): 扫描序号 -> 自然顺序位置
pub const ALTERNATE_SCAN: [u8; 64] = [
    0, 8, 16, 24, 1, 9, 2, 10, //
    17, 25, 32, 40, 48, 56, 57, 49, //
    41, 33, 26, 18, 3, 11, 4, 12, //
    19, 27, 34, 42, 50, 58, 35, 43, //
    51, 59, 20, 28, 5, 13, 6, 14, //
    21, 29, 36, 44, 52, 60, 37, 45, //
    53, 61, 22, 30, 7, 15, 23, 31, //
    38, 46, 54, 62, 39, 47, 55, 63,
];

/// 默认帧内量化矩阵 (自然顺序)
pub const DEFAULT_INTRA_MATRIX: [u8; 64] = [
    8, 16, 19, 22, 26, 27, 29, 34, //
    16, 16, 22, 24, 27, 29, 34, 37, //
    19, 22, 26, 27, 29, 34, 34, 38, //
    22, 22, 26, 27, 29, 34, 37, 40, //
    22, 26, 27, 29, 32, 35, 40, 48, //
    26, 27, 29, 32, 35, 40, 48, 58, //
    26, 27, 29, 34, 38, 46, 56, 69, //
    27, 29, 35, 38, 46, 56, 69, 83,
];

/// 默认非帧内量化矩阵
pub const DEFAULT_NON_INTRA_MATRIX: [u8; 64] = [16; 64];

/// 非线性量化尺度 (q_scale_type = 1)
const NON_LINEAR_QSCALE: [u8; 32] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 18, 20, 22, //
    24, 28, 32, 36, 40, 44, 48, 52, 56, 64, 72, 80, 88, 96, 104, 112,
];

/// 线性量化尺度映射
pub fn linear_qscale(code: u32) -> i32 {
    (code as i32 & 31) * 2
}

/// 非线性量化尺度映射
pub fn non_linear_qscale(code: u32) -> i32 {
    i32::from(NON_LINEAR_QSCALE[(code & 31) as usize])
}

/// 帧率 (frame_rate_code 1..=8)
pub fn frame_rate(code: u8) -> Option<Rational> {
    let (num, den) = match code {
        1 => (24000, 1001),
        2 => (24, 1),
        3 => (25, 1),
        4 => (30000, 1001),
        5 => (30, 1),
        6 => (50, 1),
        7 => (60000, 1001),
        8 => (60, 1),
        _ => return None,
    };
    Some(Rational::new(num, den))
}

/// 显示宽高比 (aspect_ratio_information), 1 表示方形采样
pub fn display_aspect_ratio(code: u8) -> Option<Rational> {
    match code {
        1 => Some(Rational::new(1, 1)),
        2 => Some(Rational::new(4, 3)),
        3 => Some(Rational::new(16, 9)),
        4 => Some(Rational::new(221, 100)),
        _ => None,
    }
}

/// 把自然顺序矩阵重排为扫描顺序
pub fn to_scan_order(natural: &[u8; 64], scan: &[u8; 64]) -> [u8; 64] {
    std::array::from_fn(|i| natural[scan[i] as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(scan: &[u8; 64]) -> bool {
        let mut seen = [false; 64];
        for &p in scan {
            seen[p as usize] = true;
        }
        seen.iter().all(|&s| s)
    }

    #[test]
    fn test_scans_are_permutations() {
        assert!(is_permutation(&ZIGZAG_SCAN), "zigzag 扫描应为 0..64 的排列");
        assert!(is_permutation(&ALTERNATE_SCAN), "交替扫描应为 0..64 的排列");
        assert_eq!(ZIGZAG_SCAN[63], 63);
        assert_eq!(ALTERNATE_SCAN[63], 63);
    }

    #[test]
    fn test_qscale_mapping() {
        assert_eq!(linear_qscale(8), 16);
        assert_eq!(linear_qscale(31), 62);
        assert_eq!(non_linear_qscale(9), 10);
        assert_eq!(non_linear_qscale(31), 112);
    }

    #[test]
    fn test_scan_order_matrix() {
        let w = to_scan_order(&DEFAULT_INTRA_MATRIX, &ZIGZAG_SCAN);
        assert_eq!(w[0], 8);
        assert_eq!(w[2], 16, "扫描序号 2 对应自然位置 8");
        assert_eq!(w[63], 83);
    }
}
