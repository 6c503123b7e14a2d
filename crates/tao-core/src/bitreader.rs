//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 从字节缓冲区读取数据, 是 MPEG 系列视频码流解析的基础设施.
//!
//! 内部维护一个 64 位左对齐缓存, 每次操作后保证缓存中至少有 32 个可用位,
//! 因此 `peek_bits` 不需要可变借用. 越过数据末尾的位以 0 填充,
//! 调用方可通过 `is_overrun` 检测读取是否越界.

use crate::{TaoError, TaoResult};

/// 比特流读取器
///
/// # 示例
/// ```
/// use tao_core::bitreader::BitReader;
///
/// let data = [0b10110001, 0b01010101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.peek_bits(4), 0b0001);
/// assert_eq!(br.read_bits(12).unwrap(), 0b0001_0101_0101);
/// assert!(br.read_bits(1).is_err());
/// ```
#[derive(Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 左对齐的位缓存
    cache: u64,
    /// 缓存中的有效位数 (含末尾填充)
    avail: u32,
    /// 下一个待载入缓存的字节索引
    next_byte: usize,
    /// 已消耗的总位数
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        let mut br = Self {
            data,
            cache: 0,
            avail: 0,
            next_byte: 0,
            pos: 0,
        };
        br.refill();
        br
    }

    /// 补充缓存, 直到有效位数超过 32
    #[inline]
    fn refill(&mut self) {
        while self.avail <= 32 {
            let mut word = [0u8; 4];
            let start = self.next_byte.min(self.data.len());
            let end = (self.next_byte + 4).min(self.data.len());
            word[..end - start].copy_from_slice(&self.data[start..end]);
            let w = u64::from(u32::from_be_bytes(word));
            self.cache |= w << (32 - self.avail);
            self.avail += 32;
            self.next_byte += 4;
        }
    }

    /// 获取已读取的总位数
    #[inline]
    pub fn bits_read(&self) -> usize {
        self.pos
    }

    /// 获取剩余可读位数 (越界后为 0)
    #[inline]
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// 是否已越过数据末尾
    #[inline]
    pub fn is_overrun(&self) -> bool {
        self.pos > self.data.len() * 8
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 查看接下来的 N 个位 (0..=32), 不移动读取位置
    #[inline]
    pub fn peek_bits(&self, n: u32) -> u32 {
        debug_assert!(n <= 32);
        if n == 0 {
            return 0;
        }
        (self.cache >> (64 - n)) as u32
    }

    /// 跳过 N 个位, 允许越过末尾
    #[inline]
    pub fn skip_bits(&mut self, n: u32) {
        let mut n = n;
        while n > 0 {
            let step = n.min(32);
            self.cache <<= step;
            self.avail -= step;
            self.pos += step as usize;
            self.refill();
            n -= step;
        }
    }

    /// 读取 N 个位 (0..=32), 不做越界检查
    ///
    /// 越界部分读出为 0, 适用于热路径; 调用方在适当时机检查 `is_overrun`.
    #[inline]
    pub fn get_bits(&mut self, n: u32) -> u32 {
        let v = self.peek_bits(n);
        self.skip_bits(n);
        v
    }

    /// 读取 1 个位, 不做越界检查
    #[inline]
    pub fn get_bit(&mut self) -> bool {
        self.get_bits(1) != 0
    }

    /// 读取 N 个位 (最多 32 位)
    pub fn read_bits(&mut self, n: u32) -> TaoResult<u32> {
        if n > 32 {
            return Err(TaoError::InvalidArgument(format!(
                "单次读取位数不能超过 32, 实际: {n}"
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(TaoError::InvalidData(format!(
                "比特流截断: 需要 {} 位, 剩余 {} 位",
                n,
                self.bits_left()
            )));
        }
        Ok(self.get_bits(n))
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> TaoResult<u32> {
        self.read_bits(1)
    }

    /// 读取 1 个位作为布尔标志
    pub fn read_flag(&mut self) -> TaoResult<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// 读取 N 位有符号整数 (二进制补码)
    pub fn read_signed(&mut self, n: u32) -> TaoResult<i32> {
        if n == 0 {
            return Ok(0);
        }
        let v = self.read_bits(n)?;
        let shift = 32 - n;
        Ok(((v << shift) as i32) >> shift)
    }

    /// 读取标记位, 值必须为 1
    pub fn read_marker(&mut self) -> TaoResult<()> {
        if self.read_bits(1)? != 1 {
            return Err(TaoError::InvalidData(format!(
                "标记位错误, 位置: {}",
                self.pos - 1
            )));
        }
        Ok(())
    }

    /// 是否字节对齐
    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// 对齐到下一个字节边界
    pub fn align_to_byte(&mut self) {
        let rem = (self.pos % 8) as u32;
        if rem != 0 {
            self.skip_bits(8 - rem);
        }
    }

    /// 逐位搜索长度为 N 的模式, 成功时停在模式起始处
    ///
    /// 搜索范围限于剩余数据, 失败时读取位置停在末尾.
    pub fn seek_pattern(&mut self, value: u32, n: u32) -> bool {
        while self.bits_left() >= n as usize {
            if self.peek_bits(n) == value {
                return true;
            }
            self.skip_bits(1);
        }
        false
    }

    /// 对齐到字节后搜索下一个起始码前缀 `00 00 01`, 停在前缀处
    pub fn next_start_code(&mut self) -> bool {
        self.align_to_byte();
        while self.bits_left() >= 24 {
            if self.peek_bits(24) == 0x00_0001 {
                return true;
            }
            self.skip_bits(8);
        }
        false
    }
}
