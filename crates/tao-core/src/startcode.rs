//! 起始码扫描.
//!
//! MPEG 系列码流以 `00 00 01 xx` 分隔语法单元. 本模块在字节缓冲区中定位
//! 起始码前缀, 返回前缀首字节的偏移; 仅当其后的码值字节也存在时才返回.
//!
//! 提供两个实现:
//! - [`find_start_codes_naive`]: 逐字节比较, 作为参考实现
//! - [`find_start_codes`]: 按 8 字节字宽检测 `0x01` 字节, 再回看前两个字节
//!
//! 两者对任意输入的结果必须完全一致.

/// 起始码前缀长度 (`00 00 01`)
pub const PREFIX_LEN: usize = 3;

/// 逐字节扫描全部起始码
pub fn find_start_codes_naive(data: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    if data.len() < 4 {
        return out;
    }
    for i in 0..data.len() - 3 {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            out.push(i);
        }
    }
    out
}

/// 扫描全部起始码 (字宽加速)
pub fn find_start_codes(data: &[u8]) -> Vec<usize> {
    StartCodeIter::new(data).collect()
}

/// 从 `from` 开始查找下一个起始码的偏移
pub fn next_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut it = StartCodeIter::new(data);
    it.pos = from;
    it.next()
}

const LO: u64 = 0x0101_0101_0101_0101;
const HI: u64 = 0x8080_8080_8080_8080;

/// 判断字中是否含有值为 1 的字节
#[inline]
fn has_one_byte(word: u64) -> bool {
    let x = word ^ LO;
    (x.wrapping_sub(LO) & !x & HI) != 0
}

/// 起始码惰性迭代器
pub struct StartCodeIter<'a> {
    data: &'a [u8],
    /// 下一个候选前缀的起始偏移
    pos: usize,
}

impl<'a> StartCodeIter<'a> {
    /// 创建迭代器, 从数据开头扫描
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    fn is_prefix_at(&self, i: usize) -> bool {
        i + 3 < self.data.len()
            && self.data[i] == 0
            && self.data[i + 1] == 0
            && self.data[i + 2] == 1
    }
}

impl Iterator for StartCodeIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let data = self.data;
        if data.len() < 4 {
            return None;
        }
        let last = data.len() - 4;
        while self.pos <= last {
            // 前缀的 `01` 字节位于 pos + 2, 以 8 字节为单位检测
            let probe = self.pos + 2;
            if probe + 8 <= data.len() {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[probe..probe + 8]);
                if !has_one_byte(u64::from_ne_bytes(bytes)) {
                    self.pos += 8;
                    continue;
                }
                // 字内含 0x01, 逐个核对候选
                let end = (self.pos + 8).min(last + 1);
                for i in self.pos..end {
                    if self.is_prefix_at(i) {
                        self.pos = i + 1;
                        return Some(i);
                    }
                }
                self.pos = end;
            } else {
                let i = self.pos;
                self.pos += 1;
                if self.is_prefix_at(i) {
                    return Some(i);
                }
            }
        }
        None
    }
}
