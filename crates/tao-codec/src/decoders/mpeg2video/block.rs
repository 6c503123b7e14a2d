//! 8x8 块级 DCT 系数解码
//!
//! 读取 run/level 序列, 逆扫描到自然顺序, 同时完成反量化, 饱和与失配控制.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::vlc::{CoefSymbol, coef_table};

/// 块反量化参数
#[derive(Clone, Copy)]
pub(super) struct BlockQuant<'a> {
    /// 扫描顺序的量化权重
    pub weights: &'a [u8; 64],
    /// 扫描序号 -> 自然顺序位置
    pub scan: &'a [u8; 64],
    /// 有效量化尺度
    pub qscale: i32,
}

/// 系数块解码函数签名, 由宏块例程在图像初始化时选定
pub(super) type IntraBlockFn =
    fn(&mut BitReader, &mut [i32; 64], i32, &BlockQuant<'_>) -> TaoResult<()>;

/// 解码后的单个 run/level
struct RunLevel {
    run: u32,
    level: i32,
}

/// 读取下一个系数; 返回 None 表示块结束
#[inline]
fn next_coefficient<const TABLE_ONE: bool>(br: &mut BitReader) -> TaoResult<Option<RunLevel>> {
    match coef_table(TABLE_ONE).lookup(br) {
        CoefSymbol::Coef { run, level, len } => {
            br.skip_bits(u32::from(len));
            let level = i32::from(level);
            let level = if br.get_bit() { -level } else { level };
            Ok(Some(RunLevel {
                run: u32::from(run),
                level,
            }))
        }
        CoefSymbol::EndOfBlock { len } => {
            br.skip_bits(u32::from(len));
            Ok(None)
        }
        CoefSymbol::Escape { len } => {
            br.skip_bits(u32::from(len));
            let run = br.get_bits(6);
            let raw = br.get_bits(12) as i32;
            let level = if raw >= 2048 { raw - 4096 } else { raw };
            if level == 0 || level == -2048 {
                return Err(TaoError::InvalidData(format!(
                    "转义系数 level 非法: {level}, 位置: {}",
                    br.bits_read()
                )));
            }
            Ok(Some(RunLevel { run, level }))
        }
        CoefSymbol::Invalid => Err(TaoError::InvalidData(format!(
            "无效的 DCT 系数 VLC, 位置: {}",
            br.bits_read()
        ))),
    }
}

#[inline]
fn saturate(v: i32) -> i32 {
    v.clamp(-2048, 2047)
}

#[inline]
fn advance(index: &mut usize, run: u32, br: &BitReader) -> TaoResult<usize> {
    *index += run as usize + 1;
    if *index > 63 {
        return Err(TaoError::InvalidData(format!(
            "系数索引越界: {}, 位置: {}",
            index,
            br.bits_read()
        )));
    }
    Ok(*index)
}

/// 失配控制: 系数和为偶数时翻转 F[7][7] 的最低位
#[inline]
fn mismatch_control(block: &mut [i32; 64], sum: i32) {
    if sum & 1 == 0 {
        block[63] ^= 1;
    }
}

/// 解码帧内块的 AC 系数; `dc` 为已反量化的 DC 系数
///
/// `block` 必须全零.
pub(super) fn parse_intra_block<const TABLE_ONE: bool>(
    br: &mut BitReader,
    block: &mut [i32; 64],
    dc: i32,
    quant: &BlockQuant<'_>,
) -> TaoResult<()> {
    block[0] = dc;
    let mut sum = dc;
    let mut i = 0usize;
    while let Some(RunLevel { run, level }) = next_coefficient::<TABLE_ONE>(br)? {
        let idx = advance(&mut i, run, br)?;
        let w = i32::from(quant.weights[idx]);
        let magnitude = (level.abs() * w * quant.qscale) >> 4;
        let v = saturate(if level < 0 { -magnitude } else { magnitude });
        block[quant.scan[idx] as usize] = v;
        sum += v;
    }
    mismatch_control(block, sum);
    Ok(())
}

/// 解码非帧内块; 始终使用 B-14 表, 首系数可用 '1s' 短码
///
/// `block` 必须全零.
pub(super) fn parse_non_intra_block(
    br: &mut BitReader,
    block: &mut [i32; 64],
    quant: &BlockQuant<'_>,
) -> TaoResult<()> {
    let mut sum = 0;
    let mut i = 0usize;
    let mut first = true;
    loop {
        let rl = if first && br.peek_bits(1) == 1 {
            br.skip_bits(1);
            RunLevel {
                run: 0,
                level: if br.get_bit() { -1 } else { 1 },
            }
        } else {
            match next_coefficient::<false>(br)? {
                Some(rl) => rl,
                None => break,
            }
        };
        // 首系数位于扫描序号 0
        let idx = if first {
            i = rl.run as usize;
            if i > 63 {
                return Err(TaoError::InvalidData(format!("系数索引越界: {i}")));
            }
            i
        } else {
            advance(&mut i, rl.run, br)?
        };
        first = false;
        let w = i32::from(quant.weights[idx]);
        let magnitude = ((2 * rl.level.abs() + 1) * w * quant.qscale) >> 5;
        let v = saturate(if rl.level < 0 { -magnitude } else { magnitude });
        block[quant.scan[idx] as usize] = v;
        sum += v;
    }
    mismatch_control(block, sum);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tables::{DEFAULT_NON_INTRA_MATRIX, ZIGZAG_SCAN};
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use tao_core::bitwriter::BitWriter;

    fn quant(qscale: i32, weights: &[u8; 64]) -> BlockQuant<'_> {
        BlockQuant {
            weights,
            scan: &ZIGZAG_SCAN,
            qscale,
        }
    }

    #[test]
    fn test_intra_dc_only_parity() {
        // DC=800 为偶数, 失配控制应置 F[63]=1
        let data = [0b1000_0000];
        let mut block = [0i32; 64];
        let w = [16u8; 64];
        parse_intra_block::<false>(&mut BitReader::new(&data), &mut block, 800, &quant(16, &w))
            .unwrap();
        assert_eq!(block[0], 800);
        assert_eq!(block[63], 1);
        assert_eq!(block.iter().sum::<i32>() & 1, 1);
    }

    #[test]
    fn test_non_intra_first_short_code() {
        // '1' '0' = run0 level+1, 随后 EOB '10'
        let data = [0b1010_0000];
        let mut block = [0i32; 64];
        parse_non_intra_block(
            &mut BitReader::new(&data),
            &mut block,
            &quant(16, &DEFAULT_NON_INTRA_MATRIX),
        )
        .unwrap();
        assert_eq!(block[0], 24);
        assert_eq!(block[63], 1);
    }

    #[test]
    fn test_escape_and_saturation() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b000001, 6);
        bw.write_bits(2, 6); // run 2
        bw.write_signed(-2047, 12);
        bw.write_bits(0b10, 2);
        let data = bw.finish();
        let mut block = [0i32; 64];
        let w = [255u8; 64];
        parse_intra_block::<false>(&mut BitReader::new(&data), &mut block, 8, &quant(112, &w))
            .unwrap();
        // 扫描序号 3 -> 自然位置 16
        assert_eq!(block[16], -2048, "反量化结果应饱和到 -2048");
    }

    #[test]
    fn test_escape_forbidden_level() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b000001, 6);
        bw.write_bits(0, 6);
        bw.write_bits(0, 12);
        let data = bw.finish();
        let mut block = [0i32; 64];
        let w = [16u8; 64];
        let err = parse_intra_block::<true>(&mut BitReader::new(&data), &mut block, 8, &quant(2, &w))
            .unwrap_err();
        assert!(err.is_corrupt_stream());
    }

    #[test]
    fn test_run_overflow_is_error() {
        // 转义 run=63 两次, 第二次越界
        let mut bw = BitWriter::new();
        for _ in 0..2 {
            bw.write_bits(0b000001, 6);
            bw.write_bits(63, 6);
            bw.write_signed(1, 12);
        }
        let data = bw.finish();
        let mut block = [0i32; 64];
        let w = [16u8; 64];
        assert!(
            parse_intra_block::<false>(&mut BitReader::new(&data), &mut block, 8, &quant(2, &w))
                .is_err()
        );
    }

    #[test]
    fn test_random_blocks_keep_odd_sum_and_range() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..300 {
            let mut bw = BitWriter::new();
            let mut pos = 0i32;
            let n = rng.gen_range(0..8);
            for _ in 0..n {
                let run = rng.gen_range(0..4);
                if pos + run + 1 > 63 {
                    break;
                }
                pos += run + 1;
                let level = rng.gen_range(1..2048) * if rng.gen_bool(0.5) { 1 } else { -1 };
                bw.write_bits(0b000001, 6);
                bw.write_bits(run as u32, 6);
                bw.write_signed(level, 12);
            }
            bw.write_bits(0b10, 2);
            let data = bw.finish();
            let w: [u8; 64] = std::array::from_fn(|_| rng.gen_range(1..=255));
            let qscale = rng.gen_range(1..=112);
            let dc = rng.gen_range(0..256) * 8;
            let mut block = [0i32; 64];
            parse_intra_block::<false>(&mut BitReader::new(&data), &mut block, dc, &quant(qscale, &w))
                .unwrap();
            assert!(block.iter().all(|&c| (-2048..=2047).contains(&c)), "系数超出 12 位范围");
            assert_eq!(block.iter().sum::<i32>() & 1, 1, "失配控制后系数和应为奇数");
        }
    }
}
