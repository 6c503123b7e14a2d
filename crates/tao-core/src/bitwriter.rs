//! 比特流写入器.
//!
//! 按大端位序 (MSB first) 写入, 与 [`BitReader`](crate::bitreader::BitReader) 对应.
//! 主要用于构造测试码流与基准测试输入: 起始码, 头部字段和变长码.

/// 比特流写入器
///
/// # 示例
/// ```
/// use tao_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_start_code(0xB3);
/// bw.write_bits(0b101, 3);
/// bw.align_to_byte();
/// assert_eq!(bw.finish(), vec![0x00, 0x00, 0x01, 0xB3, 0b1010_0000]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    /// 已完成的字节
    data: Vec<u8>,
    /// 待写出的位, 右对齐
    acc: u64,
    /// `acc` 中的位数 (0..8)
    pending: u32,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定容量创建比特流写入器
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// 获取已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.pending as usize
    }

    /// 写入 N 个位 (最多 32 位), 值的低 N 位有效
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={n} 超过 32 位");
        if n == 0 {
            return;
        }
        let mask = (1u64 << n) - 1;
        self.acc = (self.acc << n) | (u64::from(value) & mask);
        self.pending += n;
        while self.pending >= 8 {
            self.pending -= 8;
            self.data.push((self.acc >> self.pending) as u8);
        }
        self.acc &= (1u64 << self.pending) - 1;
    }

    /// 写入布尔标志
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bits(u32::from(flag), 1);
    }

    /// 写入 N 位有符号整数 (二进制补码)
    pub fn write_signed(&mut self, value: i32, n: u32) {
        self.write_bits(value as u32, n);
    }

    /// 写入变长码 `(code, len)`
    pub fn write_vlc(&mut self, (code, len): (u32, u32)) {
        self.write_bits(code, len);
    }

    /// 以 0 填充到字节边界
    pub fn align_to_byte(&mut self) {
        if self.pending > 0 {
            self.write_bits(0, 8 - self.pending);
        }
    }

    /// 对齐后写入完整起始码 `00 00 01 xx`
    pub fn write_start_code(&mut self, code: u8) {
        self.align_to_byte();
        self.data.extend_from_slice(&[0x00, 0x00, 0x01, code]);
    }

    /// 写入原始字节, 要求当前字节对齐
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.pending == 0 {
            self.data.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_bits(u32::from(b), 8);
            }
        }
    }

    /// 当前已完成的字节
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 对齐并返回全部数据
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_write_bits_cross_byte() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b111, 3);
        bw.write_bits(0x1FF, 9);
        bw.write_bits(0xA, 4);
        assert_eq!(bw.finish(), vec![0xFF, 0xFA]);
    }

    #[test]
    fn test_write_32_bits_unaligned() {
        let mut bw = BitWriter::new();
        bw.write_bits(1, 1);
        bw.write_bits(0x8000_0001, 32);
        assert_eq!(bw.bits_written(), 33);
        assert_eq!(bw.finish(), vec![0xC0, 0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_start_code_aligns_first() {
        let mut bw = BitWriter::new();
        bw.write_flag(true);
        bw.write_start_code(0x01);
        assert_eq!(bw.data(), &[0x80, 0x00, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn test_signed_field_readback() {
        let mut bw = BitWriter::new();
        bw.write_signed(-100, 12);
        bw.write_vlc((0b0110, 4));
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_signed(12).unwrap(), -100);
        assert_eq!(br.read_bits(4).unwrap(), 0b0110);
    }
}
