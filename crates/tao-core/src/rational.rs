//! 有理数类型, 用于帧率与宽高比.

use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 例如帧率 30000/1001 表示 29.97fps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 判断是否有效 (分母不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 转换为 f64, 分母为 0 时返回 `f64::NAN`
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 约分, 并保证分母为正
    pub fn reduce(self) -> Self {
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if self.den == 0 || g == 0 {
            return self;
        }
        let g = g as i32;
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 按 `mul / div` 缩放并约分
    ///
    /// 中间结果以 i64 计算, 约分后超出 i32 时返回 `UNDEFINED`.
    pub fn scaled(self, mul: i32, div: i32) -> Self {
        let num = i64::from(self.num) * i64::from(mul);
        let den = i64::from(self.den) * i64::from(div);
        if den == 0 {
            return Self::UNDEFINED;
        }
        let g = gcd64(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        match (i32::try_from(num / g), i32::try_from(den / g)) {
            (Ok(n), Ok(d)) => Self::new(n, d).reduce(),
            _ => Self::UNDEFINED,
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    gcd64(u64::from(a), u64::from(b)) as u32
}

fn gcd64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
