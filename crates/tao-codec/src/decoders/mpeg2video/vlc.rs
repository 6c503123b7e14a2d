//! VLC (变长编码) 表定义与解码函数
//!
//! 包含宏块地址增量, 宏块类型, coded_block_pattern, 运动码, DC 尺寸,
//! 以及两张 DCT 系数 run/level 表 (B-14, B-15).
//!
//! 短码表在首次使用时展开为按 peek 位宽直接索引的查找表;
//! 系数表按前导零个数分组, 每组以 '1' 之后的若干位索引.

use std::sync::OnceLock;

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::types::{MacroblockType, PictureCodingType};

// ============================================================================
// VLC 表定义 (码字, 位数)
// ============================================================================

/// 宏块地址增量 1..=33, 下标为增量减 1
pub(super) const MB_ADDR_INC_CODES: [(u16, u8); 33] = [
    (0x1, 1),
    (0x3, 3),
    (0x2, 3),
    (0x3, 4),
    (0x2, 4),
    (0x3, 5),
    (0x2, 5),
    (0x7, 7),
    (0x6, 7),
    (0xb, 8),
    (0xa, 8),
    (0x9, 8),
    (0x8, 8),
    (0x7, 8),
    (0x6, 8),
    (0x17, 10),
    (0x16, 10),
    (0x15, 10),
    (0x14, 10),
    (0x13, 10),
    (0x12, 10),
    (0x23, 11),
    (0x22, 11),
    (0x21, 11),
    (0x20, 11),
    (0x1f, 11),
    (0x1e, 11),
    (0x1d, 11),
    (0x1c, 11),
    (0x1b, 11),
    (0x1a, 11),
    (0x19, 11),
    (0x18, 11),
];

/// 宏块地址转义, 增量加 33
pub(super) const MB_ADDR_ESCAPE: (u16, u8) = (0x008, 11);
/// 宏块填充码
pub(super) const MB_STUFFING: (u16, u8) = (0x00f, 11);

const Q: u8 = MacroblockType::QUANT.bits();
const MF: u8 = MacroblockType::MOTION_FORWARD.bits();
const MB: u8 = MacroblockType::MOTION_BACKWARD.bits();
const PAT: u8 = MacroblockType::PATTERN.bits();
const INTRA: u8 = MacroblockType::INTRA.bits();

/// I 图像宏块类型 (码字, 位数, 类型位)
const MB_TYPE_I: [(u16, u8, u8); 2] = [(0x1, 1, INTRA), (0x1, 2, Q | INTRA)];

/// P 图像宏块类型
const MB_TYPE_P: [(u16, u8, u8); 7] = [
    (0x1, 1, MF | PAT),
    (0x1, 2, PAT),
    (0x1, 3, MF),
    (0x3, 5, INTRA),
    (0x2, 5, Q | MF | PAT),
    (0x1, 5, Q | PAT),
    (0x1, 6, Q | INTRA),
];

/// B 图像宏块类型
const MB_TYPE_B: [(u16, u8, u8); 11] = [
    (0x2, 2, MF | MB),
    (0x3, 2, MF | MB | PAT),
    (0x2, 3, MB),
    (0x3, 3, MB | PAT),
    (0x2, 4, MF),
    (0x3, 4, MF | PAT),
    (0x3, 5, INTRA),
    (0x2, 5, Q | MF | MB | PAT),
    (0x3, 6, Q | MF | PAT),
    (0x2, 6, Q | MB | PAT),
    (0x1, 6, Q | INTRA),
];

/// coded_block_pattern_420, 下标为 cbp 值
pub(super) const CBP_CODES: [(u16, u8); 64] = [
    (0x01, 9),
    (0x0b, 5),
    (0x09, 5),
    (0x0d, 6),
    (0x0d, 4),
    (0x17, 7),
    (0x13, 7),
    (0x1f, 8),
    (0x0c, 4),
    (0x16, 7),
    (0x12, 7),
    (0x1e, 8),
    (0x13, 5),
    (0x1b, 8),
    (0x17, 8),
    (0x13, 8),
    (0x0b, 4),
    (0x15, 7),
    (0x11, 7),
    (0x1d, 8),
    (0x11, 5),
    (0x19, 8),
    (0x15, 8),
    (0x11, 8),
    (0x0f, 6),
    (0x0f, 8),
    (0x0d, 8),
    (0x03, 9),
    (0x0f, 5),
    (0x0b, 8),
    (0x07, 8),
    (0x07, 9),
    (0x0a, 4),
    (0x14, 7),
    (0x10, 7),
    (0x1c, 8),
    (0x0e, 6),
    (0x0e, 8),
    (0x0c, 8),
    (0x02, 9),
    (0x10, 5),
    (0x18, 8),
    (0x14, 8),
    (0x10, 8),
    (0x0e, 5),
    (0x0a, 8),
    (0x06, 8),
    (0x06, 9),
    (0x12, 5),
    (0x1a, 8),
    (0x16, 8),
    (0x12, 8),
    (0x0d, 5),
    (0x09, 8),
    (0x05, 8),
    (0x05, 9),
    (0x0c, 5),
    (0x08, 8),
    (0x04, 8),
    (0x04, 9),
    (0x07, 3),
    (0x0a, 5),
    (0x08, 5),
    (0x0c, 6),
];

/// 运动码绝对值 0..=16, 非零时后随 1 位符号
pub(super) const MOTION_CODES: [(u16, u8); 17] = [
    (0x1, 1),
    (0x1, 2),
    (0x1, 3),
    (0x1, 4),
    (0x3, 6),
    (0x5, 7),
    (0x4, 7),
    (0x3, 7),
    (0xb, 9),
    (0xa, 9),
    (0x9, 9),
    (0x11, 10),
    (0x10, 10),
    (0xf, 10),
    (0xe, 10),
    (0xd, 10),
    (0xc, 10),
];

/// 亮度 dct_dc_size, 下标为尺寸
pub(super) const DC_SIZE_LUMA: [(u16, u8); 12] = [
    (0x4, 3),
    (0x0, 2),
    (0x1, 2),
    (0x5, 3),
    (0x6, 3),
    (0xe, 4),
    (0x1e, 5),
    (0x3e, 6),
    (0x7e, 7),
    (0xfe, 8),
    (0x1fe, 9),
    (0x1ff, 9),
];

/// 色度 dct_dc_size, 下标为尺寸
pub(super) const DC_SIZE_CHROMA: [(u16, u8); 12] = [
    (0x0, 2),
    (0x1, 2),
    (0x2, 2),
    (0x6, 3),
    (0xe, 4),
    (0x1e, 5),
    (0x3e, 6),
    (0x7e, 7),
    (0xfe, 8),
    (0x1fe, 9),
    (0x3fe, 10),
    (0x3ff, 10),
];

// ----------------------------------------------------------------------------
// DCT 系数表: 每个 run 一行, 行内按 level 1.. 排列, 码字后随 1 位符号
// ----------------------------------------------------------------------------

const RUN0_TAIL: [(u16, u8); 25] = [
    (0x1f, 14),
    (0x1e, 14),
    (0x1d, 14),
    (0x1c, 14),
    (0x1b, 14),
    (0x1a, 14),
    (0x19, 14),
    (0x18, 14),
    (0x17, 14),
    (0x16, 14),
    (0x15, 14),
    (0x14, 14),
    (0x13, 14),
    (0x12, 14),
    (0x11, 14),
    (0x10, 14),
    (0x18, 15),
    (0x17, 15),
    (0x16, 15),
    (0x15, 15),
    (0x14, 15),
    (0x13, 15),
    (0x12, 15),
    (0x11, 15),
    (0x10, 15),
];

const RUN1_TAIL: [(u16, u8); 11] = [
    (0x1f, 15),
    (0x1e, 15),
    (0x1d, 15),
    (0x1c, 15),
    (0x1b, 15),
    (0x1a, 15),
    (0x19, 15),
    (0x13, 16),
    (0x12, 16),
    (0x11, 16),
    (0x10, 16),
];

/// run 17..=31, level 1 (两表相同)
const LONG_RUNS: [(u16, u8); 15] = [
    (0x1f, 12),
    (0x1a, 12),
    (0x19, 12),
    (0x17, 12),
    (0x16, 12),
    (0x1f, 13),
    (0x1e, 13),
    (0x1d, 13),
    (0x1c, 13),
    (0x1b, 13),
    (0x1f, 16),
    (0x1e, 16),
    (0x1d, 16),
    (0x1c, 16),
    (0x1b, 16),
];

/// B-14 前 15 个 run=0 码字
const B14_RUN0_HEAD: [(u16, u8); 15] = [
    (0x3, 2),
    (0x4, 4),
    (0x5, 5),
    (0x6, 7),
    (0x26, 8),
    (0x21, 8),
    (0xa, 10),
    (0x1d, 12),
    (0x18, 12),
    (0x13, 12),
    (0x10, 12),
    (0x1a, 13),
    (0x19, 13),
    (0x18, 13),
    (0x17, 13),
];

const B14_RUN1_HEAD: [(u16, u8); 7] = [
    (0x3, 3),
    (0x6, 6),
    (0x25, 8),
    (0xc, 10),
    (0x1b, 12),
    (0x16, 13),
    (0x15, 13),
];

/// B-14 run 2..=16
const B14_SHORT_RUNS: [&[(u16, u8)]; 15] = [
    &[(0x5, 4), (0x4, 7), (0xb, 10), (0x14, 12), (0x14, 13)],
    &[(0x7, 5), (0x24, 8), (0x1c, 12), (0x13, 13)],
    &[(0x6, 5), (0xf, 10), (0x12, 12)],
    &[(0x7, 6), (0x9, 10), (0x12, 13)],
    &[(0x5, 6), (0x1e, 12), (0x14, 16)],
    &[(0x4, 6), (0x15, 12)],
    &[(0x7, 7), (0x11, 12)],
    &[(0x5, 7), (0x11, 13)],
    &[(0x27, 8), (0x10, 13)],
    &[(0x23, 8), (0x1a, 16)],
    &[(0x22, 8), (0x19, 16)],
    &[(0x20, 8), (0x18, 16)],
    &[(0xe, 10), (0x17, 16)],
    &[(0xd, 10), (0x16, 16)],
    &[(0x8, 10), (0x15, 16)],
];

const B15_RUN0_HEAD: [(u16, u8); 15] = [
    (0x02, 2),
    (0x06, 3),
    (0x07, 4),
    (0x1c, 5),
    (0x1d, 5),
    (0x05, 6),
    (0x04, 6),
    (0x7b, 7),
    (0x7c, 7),
    (0x23, 8),
    (0x22, 8),
    (0xfa, 8),
    (0xfb, 8),
    (0xfe, 8),
    (0xff, 8),
];

const B15_RUN1_HEAD: [(u16, u8); 7] = [
    (0x02, 3),
    (0x06, 5),
    (0x79, 7),
    (0x27, 8),
    (0x20, 8),
    (0x16, 13),
    (0x15, 13),
];

/// B-15 run 2..=16
const B15_SHORT_RUNS: [&[(u16, u8)]; 15] = [
    &[(0x05, 5), (0x07, 7), (0xfc, 8), (0x0c, 10), (0x14, 13)],
    &[(0x07, 5), (0x26, 8), (0x1c, 12), (0x13, 13)],
    &[(0x06, 6), (0xfd, 8), (0x12, 12)],
    &[(0x07, 6), (0x04, 9), (0x12, 13)],
    &[(0x06, 7), (0x1e, 12), (0x14, 16)],
    &[(0x04, 7), (0x15, 12)],
    &[(0x05, 7), (0x11, 12)],
    &[(0x78, 7), (0x11, 13)],
    &[(0x7a, 7), (0x10, 13)],
    &[(0x21, 8), (0x1a, 16)],
    &[(0x25, 8), (0x19, 16)],
    &[(0x24, 8), (0x18, 16)],
    &[(0x05, 9), (0x17, 16)],
    &[(0x07, 9), (0x16, 16)],
    &[(0x0d, 10), (0x15, 16)],
];

/// B-14 块结束码 '10'
pub(super) const B14_EOB: (u16, u8) = (0x2, 2);
/// B-15 块结束码 '0110'
pub(super) const B15_EOB: (u16, u8) = (0x6, 4);
/// 转义码 '000001' (两表相同)
pub(super) const COEF_ESCAPE: (u16, u8) = (0x1, 6);

/// 枚举系数表的全部 (run, level, 码字, 位数)
pub(super) fn coefficient_codes(table_one: bool) -> Vec<(u8, u8, u16, u8)> {
    let (run0_head, run1_head, short_runs) = if table_one {
        (&B15_RUN0_HEAD, &B15_RUN1_HEAD, &B15_SHORT_RUNS)
    } else {
        (&B14_RUN0_HEAD, &B14_RUN1_HEAD, &B14_SHORT_RUNS)
    };
    let mut rows: Vec<Vec<(u16, u8)>> = Vec::with_capacity(32);
    rows.push(run0_head.iter().chain(RUN0_TAIL.iter()).copied().collect());
    rows.push(run1_head.iter().chain(RUN1_TAIL.iter()).copied().collect());
    rows.extend(short_runs.iter().map(|codes| codes.to_vec()));
    rows.extend(LONG_RUNS.iter().map(|&code| vec![code]));
    rows.iter()
        .enumerate()
        .flat_map(|(run, codes)| {
            codes
                .iter()
                .enumerate()
                .map(move |(i, &(code, len))| (run as u8, i as u8 + 1, code, len))
        })
        .collect()
}

// ============================================================================
// 查找表构建
// ============================================================================

/// 直接索引查找表条目; `len == 0` 表示无效码字
#[derive(Debug, Clone, Copy, Default)]
struct VlcEntry {
    value: i16,
    len: u8,
}

/// 按 peek(bits) 直接索引的短码查找表
struct DirectVlc {
    bits: u32,
    table: Vec<VlcEntry>,
}

impl DirectVlc {
    fn build(bits: u32, codes: impl IntoIterator<Item = (u16, u8, i16)>) -> Self {
        let mut table = vec![VlcEntry::default(); 1 << bits];
        for (code, len, value) in codes {
            let pad = bits - u32::from(len);
            let base = (code as usize) << pad;
            for e in &mut table[base..base + (1 << pad)] {
                debug_assert_eq!(e.len, 0, "VLC 码字冲突: code={code:#x}, len={len}");
                *e = VlcEntry { value, len };
            }
        }
        Self { bits, table }
    }

    #[inline]
    fn decode(&self, br: &mut BitReader) -> Option<i16> {
        let e = self.table[br.peek_bits(self.bits) as usize];
        if e.len == 0 {
            return None;
        }
        br.skip_bits(u32::from(e.len));
        Some(e.value)
    }
}

const ADDR_ESCAPE: i16 = -1;
const ADDR_STUFFING: i16 = -2;

fn mb_addr_vlc() -> &'static DirectVlc {
    static TABLE: OnceLock<DirectVlc> = OnceLock::new();
    TABLE.get_or_init(|| {
        let codes = MB_ADDR_INC_CODES
            .iter()
            .enumerate()
            .map(|(i, &(c, l))| (c, l, i as i16 + 1))
            .chain([
                (MB_ADDR_ESCAPE.0, MB_ADDR_ESCAPE.1, ADDR_ESCAPE),
                (MB_STUFFING.0, MB_STUFFING.1, ADDR_STUFFING),
            ]);
        DirectVlc::build(11, codes)
    })
}

fn mb_type_vlc(coding: PictureCodingType) -> &'static DirectVlc {
    static I: OnceLock<DirectVlc> = OnceLock::new();
    static P: OnceLock<DirectVlc> = OnceLock::new();
    static B: OnceLock<DirectVlc> = OnceLock::new();
    let (cell, codes): (_, &[(u16, u8, u8)]) = match coding {
        PictureCodingType::Intra => (&I, &MB_TYPE_I),
        PictureCodingType::Predicted => (&P, &MB_TYPE_P),
        PictureCodingType::Bidirectional => (&B, &MB_TYPE_B),
    };
    cell.get_or_init(|| {
        let bits = if coding == PictureCodingType::Intra { 2 } else { 6 };
        DirectVlc::build(bits, codes.iter().map(|&(c, l, v)| (c, l, i16::from(v))))
    })
}

fn indexed_vlc(cell: &'static OnceLock<DirectVlc>, bits: u32, codes: &[(u16, u8)]) -> &'static DirectVlc {
    cell.get_or_init(|| {
        DirectVlc::build(
            bits,
            codes.iter().enumerate().map(|(i, &(c, l))| (c, l, i as i16)),
        )
    })
}

/// 系数码字分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CoefSymbol {
    /// 普通 run/level, 符号位未计入 len
    Coef { run: u8, level: u8, len: u8 },
    /// 块结束
    EndOfBlock { len: u8 },
    /// 转义: 后随 6 位 run 和 12 位有符号 level
    Escape { len: u8 },
    Invalid,
}

/// 最长码字 16 位, 前导零最多 11 个
const COEF_MAX_ZEROS: usize = 12;

/// 按前导零个数分组的系数查找表
pub(super) struct CoefTable {
    width: [u32; COEF_MAX_ZEROS],
    groups: [Vec<CoefSymbol>; COEF_MAX_ZEROS],
}

impl CoefTable {
    fn build(table_one: bool) -> Self {
        let (eob, eob_len) = if table_one { B15_EOB } else { B14_EOB };
        let mut entries: Vec<(u16, u8, CoefSymbol)> = coefficient_codes(table_one)
            .into_iter()
            .map(|(run, level, code, len)| (code, len, CoefSymbol::Coef { run, level, len }))
            .collect();
        entries.push((eob, eob_len, CoefSymbol::EndOfBlock { len: eob_len }));
        entries.push((
            COEF_ESCAPE.0,
            COEF_ESCAPE.1,
            CoefSymbol::Escape {
                len: COEF_ESCAPE.1,
            },
        ));

        // 码字 = z 个 0, 一个 1, rest_len 位剩余
        let split = |code: u16, len: u8| {
            let bit_len = 16 - code.leading_zeros();
            let zeros = u32::from(len) - bit_len;
            let rest_len = bit_len - 1;
            (zeros as usize, rest_len, u32::from(code) & ((1 << rest_len) - 1))
        };

        let mut width = [0u32; COEF_MAX_ZEROS];
        for &(code, len, _) in &entries {
            let (z, rest_len, _) = split(code, len);
            width[z] = width[z].max(rest_len);
        }
        let mut groups: [Vec<CoefSymbol>; COEF_MAX_ZEROS] =
            std::array::from_fn(|z| vec![CoefSymbol::Invalid; 1 << width[z]]);
        for &(code, len, sym) in &entries {
            let (z, rest_len, rest) = split(code, len);
            let pad = width[z] - rest_len;
            let base = (rest as usize) << pad;
            for slot in &mut groups[z][base..base + (1 << pad)] {
                debug_assert_eq!(*slot, CoefSymbol::Invalid, "系数码字冲突: {code:#x}/{len}");
                *slot = sym;
            }
        }
        Self { width, groups }
    }

    /// 分类下一个码字, 不移动读取位置
    #[inline]
    pub(super) fn lookup(&self, br: &BitReader) -> CoefSymbol {
        let w = br.peek_bits(32);
        let z = w.leading_zeros() as usize;
        if z >= COEF_MAX_ZEROS {
            return CoefSymbol::Invalid;
        }
        let k = self.width[z];
        let idx = if k == 0 { 0 } else { ((w << (z + 1)) >> (32 - k)) as usize };
        self.groups[z][idx]
    }
}

/// 获取系数表: `table_one` 为 false 时使用 B-14, 否则 B-15
pub(super) fn coef_table(table_one: bool) -> &'static CoefTable {
    static ZERO: OnceLock<CoefTable> = OnceLock::new();
    static ONE: OnceLock<CoefTable> = OnceLock::new();
    if table_one {
        ONE.get_or_init(|| CoefTable::build(true))
    } else {
        ZERO.get_or_init(|| CoefTable::build(false))
    }
}

// ============================================================================
// VLC 解码函数
// ============================================================================

fn invalid_vlc(what: &str, br: &BitReader) -> TaoError {
    TaoError::InvalidData(format!("无效的{what} VLC, 位置: {}", br.bits_read()))
}

/// 解码宏块地址增量, 处理填充码与转义码
pub(super) fn decode_mb_address_increment(br: &mut BitReader) -> TaoResult<u32> {
    let vlc = mb_addr_vlc();
    let mut increment = 0u32;
    loop {
        match vlc.decode(br) {
            Some(ADDR_STUFFING) => {}
            Some(ADDR_ESCAPE) => increment += 33,
            Some(v) => return Ok(increment + v as u32),
            None => return Err(invalid_vlc("宏块地址增量", br)),
        }
    }
}

/// 解码宏块类型
pub(super) fn decode_macroblock_type(
    br: &mut BitReader,
    coding: PictureCodingType,
) -> TaoResult<MacroblockType> {
    mb_type_vlc(coding)
        .decode(br)
        .map(|v| MacroblockType::from_bits_truncate(v as u8))
        .ok_or_else(|| invalid_vlc("宏块类型", br))
}

/// 解码 coded_block_pattern_420
pub(super) fn decode_coded_block_pattern(br: &mut BitReader) -> TaoResult<u32> {
    static TABLE: OnceLock<DirectVlc> = OnceLock::new();
    indexed_vlc(&TABLE, 9, &CBP_CODES)
        .decode(br)
        .map(|v| v as u32)
        .ok_or_else(|| invalid_vlc("coded_block_pattern", br))
}

/// 解码带符号的运动码 (-16..=16)
pub(super) fn decode_motion_code(br: &mut BitReader) -> TaoResult<i32> {
    static TABLE: OnceLock<DirectVlc> = OnceLock::new();
    let magnitude = indexed_vlc(&TABLE, 10, &MOTION_CODES)
        .decode(br)
        .ok_or_else(|| invalid_vlc("运动码", br))?;
    if magnitude == 0 {
        return Ok(0);
    }
    let m = i32::from(magnitude);
    Ok(if br.get_bit() { -m } else { m })
}

/// 解码双基差分向量: '0' -> 0, '10' -> 1, '11' -> -1
pub(super) fn decode_dmvector(br: &mut BitReader) -> i32 {
    if !br.get_bit() {
        0
    } else if br.get_bit() {
        -1
    } else {
        1
    }
}

/// 解码 dct_dc_size
pub(super) fn decode_dc_size(br: &mut BitReader, luma: bool) -> TaoResult<u32> {
    static LUMA: OnceLock<DirectVlc> = OnceLock::new();
    static CHROMA: OnceLock<DirectVlc> = OnceLock::new();
    let vlc = if luma {
        indexed_vlc(&LUMA, 9, &DC_SIZE_LUMA)
    } else {
        indexed_vlc(&CHROMA, 10, &DC_SIZE_CHROMA)
    };
    vlc.decode(br)
        .map(|v| v as u32)
        .ok_or_else(|| invalid_vlc("DC 尺寸", br))
}
