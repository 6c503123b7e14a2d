use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tao_core::bitwriter::BitWriter;
use tao_core::{PixelFormat, Rational};

use super::vlc::{CBP_CODES, DC_SIZE_CHROMA, DC_SIZE_LUMA, MB_ADDR_INC_CODES, MOTION_CODES};
use super::*;

// ============================================================================
// 测试码流构造
// ============================================================================

const I: u32 = 1;
const P: u32 = 2;
const B: u32 = 3;

const TOP: u32 = 1;
const BOTTOM: u32 = 2;
const FRAME: u32 = 3;

/// 按位构造 MPEG-2 基本流
struct StreamWriter {
    bw: BitWriter,
}

impl StreamWriter {
    fn new() -> Self {
        Self {
            bw: BitWriter::new(),
        }
    }

    /// 序列头 (方形像素, 25 fps), 不带扩展
    fn sequence_header(&mut self, width: u32, height: u32) -> &mut Self {
        let bw = &mut self.bw;
        bw.write_start_code(0xB3);
        bw.write_bits(width, 12);
        bw.write_bits(height, 12);
        bw.write_bits(1, 4);
        bw.write_bits(3, 4);
        bw.write_bits(2000, 18);
        bw.write_bits(1, 1);
        bw.write_bits(112, 10);
        // constrained, load_intra, load_non_intra
        bw.write_bits(0, 3);
        self
    }

    fn sequence(&mut self, width: u32, height: u32, chroma: u32, progressive: bool) -> &mut Self {
        self.sequence_header(width, height);
        let bw = &mut self.bw;
        bw.write_start_code(0xB5);
        bw.write_bits(1, 4);
        bw.write_bits(0x48, 8);
        bw.write_flag(progressive);
        bw.write_bits(chroma, 2);
        bw.write_bits(0, 4);
        bw.write_bits(0, 12);
        bw.write_bits(1, 1);
        bw.write_bits(0, 8);
        // low_delay, frame_rate_extension_n/d
        bw.write_bits(0, 8);
        self
    }

    fn gop(&mut self, closed: bool, broken: bool) -> &mut Self {
        let bw = &mut self.bw;
        bw.write_start_code(0xB8);
        bw.write_bits(0, 12);
        bw.write_bits(1, 1);
        bw.write_bits(0, 12);
        bw.write_flag(closed);
        bw.write_flag(broken);
        self
    }

    fn user_data(&mut self, payload: &[u8]) -> &mut Self {
        self.bw.write_start_code(0xB2);
        self.bw.write_bytes(payload);
        self
    }

    /// 图像头 + 图像编码扩展, 运动向量只使用 f_code 1
    fn picture(&mut self, tr: u32, coding: u32, structure: u32, fpfdct: bool) -> &mut Self {
        self.picture_with(tr, coding, structure, fpfdct, CodingFlags::default())
    }

    fn picture_with(
        &mut self,
        tr: u32,
        coding: u32,
        structure: u32,
        fpfdct: bool,
        flags: CodingFlags,
    ) -> &mut Self {
        let bw = &mut self.bw;
        bw.write_start_code(0x00);
        bw.write_bits(tr, 10);
        bw.write_bits(coding, 3);
        bw.write_bits(0xFFFF, 16);
        if coding >= P {
            bw.write_bits(0b0111, 4);
        }
        if coding == B {
            bw.write_bits(0b0111, 4);
        }
        bw.write_bits(0, 1);

        bw.write_start_code(0xB5);
        bw.write_bits(8, 4);
        let forward = if coding >= P || flags.concealment { 1 } else { 15 };
        let backward = if coding == B { 1 } else { 15 };
        for f_code in [forward, forward, backward, backward] {
            bw.write_bits(f_code, 4);
        }
        // intra_dc_precision
        bw.write_bits(0, 2);
        bw.write_bits(structure, 2);
        bw.write_flag(flags.top_field_first);
        bw.write_flag(fpfdct);
        bw.write_flag(flags.concealment);
        bw.write_flag(flags.q_scale_type);
        bw.write_flag(flags.intra_vlc);
        bw.write_flag(flags.alternate_scan);
        // repeat_first_field
        bw.write_bits(0, 1);
        let progressive = structure == FRAME && fpfdct;
        bw.write_flag(progressive);
        bw.write_flag(progressive);
        bw.write_bits(0, 1);
        self
    }

    /// 条带头, quantiser_scale_code 8 (线性尺度 16)
    fn slice(&mut self, row: u8) -> &mut Self {
        self.bw.write_start_code(row + 1);
        self.bw.write_bits(8, 5);
        self.bw.write_bits(0, 1);
        self
    }

    fn bits(&mut self, value: u32, n: u32) -> &mut Self {
        self.bw.write_bits(value, n);
        self
    }

    fn mb_increment(&mut self, increment: usize) -> &mut Self {
        let (code, len) = MB_ADDR_INC_CODES[increment - 1];
        self.bw.write_bits(u32::from(code), u32::from(len));
        self
    }

    fn dc(&mut self, diff: i32, luma: bool) {
        let size = 32 - diff.unsigned_abs().leading_zeros();
        let (code, len) = if luma {
            DC_SIZE_LUMA[size as usize]
        } else {
            DC_SIZE_CHROMA[size as usize]
        };
        self.bw.write_bits(u32::from(code), u32::from(len));
        if size > 0 {
            let value = if diff < 0 {
                diff + (1 << size) - 1
            } else {
                diff
            };
            self.bw.write_bits(value as u32, size);
        }
    }

    /// 只含 DC 的帧内宏块, `pred` 为各分量当前 DC 预测 (即像素值)
    fn intra_macroblock(&mut self, pred: &mut [i32; 3], luma: [i32; 4], cb: i32, cr: i32) -> &mut Self {
        // macroblock_type: Intra
        self.bw.write_bits(1, 1);
        self.intra_blocks(pred, &[luma[0], luma[1], luma[2], luma[3], cb, cr])
    }

    /// 按码流顺序写出只含 DC 的帧内块 (B-14 EOB)
    fn intra_blocks(&mut self, pred: &mut [i32; 3], values: &[i32]) -> &mut Self {
        for (i, &value) in values.iter().enumerate() {
            let component = if i < 4 { 0 } else { 1 + ((i - 4) & 1) };
            self.dc(value - pred[component], component == 0);
            pred[component] = value;
            self.bw.write_bits(0b10, 2);
        }
        self
    }

    /// 运动码, f_code 1 时即为向量增量
    fn motion(&mut self, delta: i32) -> &mut Self {
        let (code, len) = MOTION_CODES[delta.unsigned_abs() as usize];
        self.bw.write_bits(u32::from(code), u32::from(len));
        if delta != 0 {
            self.bw.write_flag(delta < 0);
        }
        self
    }

    fn end(&mut self) -> &mut Self {
        self.bw.write_start_code(0xB7);
        self
    }

    fn finish(self) -> Vec<u8> {
        self.bw.finish()
    }
}

/// 图像编码扩展中的可选标志
#[derive(Debug, Clone, Copy, Default)]
struct CodingFlags {
    top_field_first: bool,
    concealment: bool,
    q_scale_type: bool,
    intra_vlc: bool,
    alternate_scan: bool,
}

/// 16x16 渐进序列: I(0) P(3) B(1) B(2)
///
/// I 的四个亮度块为 100/120/140/160; P 在块 0 叠加 +3 残差;
/// B1 为双向平均 (块 0 = 102), B2 仅后向 (块 0 = 103).
fn ipbb_stream() -> Vec<u8> {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, true).gop(false, false);

    w.picture(0, I, FRAME, true).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [100, 120, 140, 160], 90, 200);

    w.picture(3, P, FRAME, true).slice(0).mb_increment(1);
    // MF|PAT, 零向量, cbp = 32, 首系数 +1 后 EOB
    w.bits(0b1, 1).bits(0b11, 2).bits(0b1010, 4).bits(0b1010, 4);

    w.picture(1, B, FRAME, true).slice(0).mb_increment(1);
    // MF|MB, 前后向零向量
    w.bits(0b10, 2).bits(0b1111, 4);

    w.picture(2, B, FRAME, true).slice(0).mb_increment(1);
    // MB, 后向零向量
    w.bits(0b010, 3).bits(0b11, 2);

    w.end();
    w.finish()
}

// ============================================================================
// 解码辅助
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Decoded {
    info: PictureInfo,
    picture_type: PictureType,
    planes: [Vec<u8>; 3],
    corrupted: bool,
}

fn test_config() -> Mpeg2DecoderConfig {
    Mpeg2DecoderConfig::new(16, 16).with_threads(2)
}

fn collecting_sink() -> (Arc<Mutex<Vec<Decoded>>>, impl FnMut(OutputPicture) + Send + 'static) {
    let pictures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pictures);
    (pictures, move |picture: OutputPicture| {
        let decoded = Decoded {
            info: picture.info().clone(),
            picture_type: picture.picture_type(),
            planes: picture.copy_planes().expect("读取平面"),
            corrupted: picture.corrupted(),
        };
        sink.lock().unwrap().push(decoded);
    })
}

/// 按 `chunk` 字节切分推入, 返回结束结果与全部输出
fn decode(
    config: Mpeg2DecoderConfig,
    data: &[u8],
    chunk: usize,
) -> (TaoResult<DecodeSummary>, Vec<Decoded>) {
    let (pictures, sink) = collecting_sink();
    let mut decoder = Mpeg2Decoder::new(config, sink).expect("创建解码器");
    let mut result = None;
    for part in data.chunks(chunk) {
        if let Err(e) = decoder.push(part) {
            result = Some(Err(e));
            break;
        }
    }
    let result = match result {
        Some(err) => {
            drop(decoder);
            err
        }
        None => decoder.finish(),
    };
    let out = std::mem::take(&mut *pictures.lock().unwrap());
    (result, out)
}

fn luma(values: [u8; 4], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            out.push(values[(y / 8 % 2) * 2 + x / 8 % 2]);
        }
    }
    out
}

fn order(pictures: &[Decoded]) -> Vec<(PictureType, u16)> {
    pictures
        .iter()
        .map(|p| (p.picture_type, p.info.temporal_reference))
        .collect()
}

// ============================================================================
// 端到端解码
// ============================================================================

#[test]
fn test_ipbb_display_order_and_pixels() {
    let (result, pictures) = decode(test_config(), &ipbb_stream(), 4096);
    let summary = result.expect("解码应成功");
    assert_eq!(summary.pictures, 4, "应输出 4 幅图像");
    assert_eq!(summary.slices, 4, "每幅图像一个条带");
    assert_eq!(summary.failed_slices, 0);

    assert_eq!(
        order(&pictures),
        vec![
            (PictureType::I, 0),
            (PictureType::B, 1),
            (PictureType::B, 2),
            (PictureType::P, 3),
        ],
        "应按显示顺序输出"
    );

    let expected = [
        [100, 120, 140, 160],
        [102, 120, 140, 160],
        [103, 120, 140, 160],
        [103, 120, 140, 160],
    ];
    for (picture, values) in pictures.iter().zip(expected) {
        assert_eq!(
            picture.planes[0],
            luma(values, 16, 16),
            "亮度不符: tr={}",
            picture.info.temporal_reference
        );
        assert_eq!(picture.planes[1], vec![90; 64], "Cb 不符");
        assert_eq!(picture.planes[2], vec![200; 64], "Cr 不符");
        assert!(!picture.corrupted);
    }
}

#[test]
fn test_decode_order_without_reorder() {
    let config = test_config().with_reorder(false);
    let (result, pictures) = decode(config, &ipbb_stream(), 4096);
    result.expect("解码应成功");
    assert_eq!(
        order(&pictures),
        vec![
            (PictureType::I, 0),
            (PictureType::P, 3),
            (PictureType::B, 1),
            (PictureType::B, 2),
        ],
        "关闭重排时应按解码顺序输出"
    );
    let indices: Vec<u64> = pictures.iter().map(|p| p.info.decode_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn test_chunked_push_matches_whole_buffer() {
    let stream = ipbb_stream();
    let (whole, expected) = decode(test_config(), &stream, stream.len());
    whole.expect("整块解码应成功");
    for chunk in [1, 3, 7, 64] {
        let (result, pictures) = decode(test_config(), &stream, chunk);
        result.expect("分块解码应成功");
        assert_eq!(pictures, expected, "分块大小 {chunk} 结果不一致");
    }
}

#[test]
fn test_single_thread_matches_multi_thread() {
    let stream = ipbb_stream();
    let (_, single) = decode(test_config().with_threads(1), &stream, 4096);
    let (_, multi) = decode(test_config().with_threads(4), &stream, 4096);
    assert_eq!(single.len(), 4);
    assert_eq!(single, multi, "线程数不应影响输出");
}

#[test]
fn test_field_pair_shares_frame() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, false);
    w.picture(0, I, TOP, false).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [50; 4], 128, 128);
    w.picture(0, I, BOTTOM, false).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [150; 4], 128, 128);
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    let summary = result.expect("场对解码应成功");
    assert_eq!(summary.pictures, 1, "两场应合成一帧");
    assert_eq!(summary.slices, 2);
    assert_eq!(pictures.len(), 1);

    let frame = &pictures[0];
    assert!(!frame.info.progressive_frame);
    for (y, row) in frame.planes[0].chunks(16).enumerate() {
        let expected = if y % 2 == 0 { 50 } else { 150 };
        assert!(row.iter().all(|&v| v == expected), "第 {y} 行应来自对应场");
    }
    assert!(frame.planes[1].iter().all(|&v| v == 128));
}

#[test]
fn test_skipped_macroblocks_copy_reference() {
    let mut w = StreamWriter::new();
    w.sequence(48, 16, 1, true);
    w.picture(0, I, FRAME, true).slice(0);
    let mut pred = [128; 3];
    for value in [60, 90, 120] {
        w.mb_increment(1);
        w.intra_macroblock(&mut pred, [value; 4], 128, 128);
    }
    // 首宏块前向零向量, 跳过中间宏块, 末宏块前向零向量
    w.picture(1, P, FRAME, true).slice(0).mb_increment(1);
    w.bits(0b001, 3).bits(0b11, 2);
    w.mb_increment(2);
    w.bits(0b001, 3).bits(0b11, 2);
    w.end();

    let config = Mpeg2DecoderConfig::new(48, 16).with_threads(2);
    let (result, pictures) = decode(config, &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(pictures.len(), 2);

    let expected: Vec<u8> = (0..16)
        .flat_map(|_| (0..48).map(|x| [60, 90, 120][x / 16]))
        .collect();
    assert_eq!(pictures[0].planes[0], expected, "I 图像亮度不符");
    assert_eq!(pictures[1].planes[0], expected, "跳过宏块应复制参考");
}

#[test]
fn test_closed_gop_leading_b_uses_backward_only() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, true).gop(true, false);
    w.picture(1, I, FRAME, true).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [70, 80, 90, 100], 110, 120);
    w.picture(0, B, FRAME, true).slice(0).mb_increment(1);
    w.bits(0b10, 2).bits(0b1111, 4);
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(
        order(&pictures),
        vec![(PictureType::B, 0), (PictureType::I, 1)]
    );
    assert_eq!(pictures[0].planes, pictures[1].planes, "前导 B 应等同于 I");
}

#[test]
fn test_broken_link_drops_leading_b() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, true).gop(false, true);
    w.picture(2, I, FRAME, true).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [100; 4], 128, 128);
    for tr in [0, 1] {
        w.picture(tr, B, FRAME, true).slice(0).mb_increment(1);
        w.bits(0b10, 2).bits(0b1111, 4);
    }
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    let summary = result.expect("丢弃图像不是错误");
    assert_eq!(summary.pictures, 1);
    assert_eq!(summary.slices, 1, "被丢弃图像的条带不应解码");
    assert_eq!(order(&pictures), vec![(PictureType::I, 2)]);
}

#[test]
fn test_picture_metadata_and_user_data() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, true).gop(false, false).user_data(b"tao!");
    w.picture(0, I, FRAME, true).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [128; 4], 128, 128);
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    result.expect("解码应成功");
    let info = &pictures[0].info;
    assert_eq!(info.user_data, b"tao!".to_vec(), "用户数据应挂到下一幅图像");
    assert_eq!(info.frame_rate, Rational::new(25, 1));
    assert_eq!(info.sample_aspect_ratio, Rational::new(1, 1));
    assert_eq!((info.display_width, info.display_height), (16, 16));
    assert!(info.progressive_frame);
    assert_eq!(info.coding_type, PictureCodingType::Intra);
}

// ============================================================================
// 运动补偿与系数路径
// ============================================================================

/// 按坐标生成紧密排列的平面
fn plane(width: usize, height: usize, value: impl Fn(usize, usize) -> u8) -> Vec<u8> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| value(x, y))
        .collect()
}

/// 帧内块的重建像素: DC 与若干 (自然顺序位置, 反量化值), 含失配控制
fn intra_pixels(dc: i32, ac: &[(usize, i32)]) -> [u8; 64] {
    let mut block = [0i32; 64];
    block[0] = dc * 8;
    for &(pos, v) in ac {
        block[pos] = v;
    }
    if block.iter().sum::<i32>() & 1 == 0 {
        block[63] ^= 1;
    }
    let mut out = [0u8; 64];
    super::idct::idct_put(&mut block, &mut out, 8);
    out
}

/// 两个宏块的 32x16 I 图像, 亮度左 40 右 80, 色度 90/200
fn two_column_intra(w: &mut StreamWriter) {
    w.sequence(32, 16, 1, true);
    w.picture(0, I, FRAME, true).slice(0);
    let mut pred = [128; 3];
    for value in [40, 80] {
        w.mb_increment(1);
        w.intra_macroblock(&mut pred, [value; 4], 90, 200);
    }
}

/// 16x32 隔行序列的 I 场对: 顶场亮度 50 / Cb 100, 底场亮度 150 / Cb 160
fn interlaced_reference(w: &mut StreamWriter) {
    w.sequence(16, 32, 1, false);
    w.picture(0, I, TOP, false).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [50; 4], 100, 128);
    w.picture(0, I, BOTTOM, false).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [150; 4], 160, 128);
}

/// 16x32 隔行序列的单个 I 顶场: 亮度块 30/70/110/150, Cb 100
fn intra_top_field(w: &mut StreamWriter) {
    w.sequence(16, 32, 1, false);
    w.picture(0, I, TOP, false).slice(0).mb_increment(1);
    w.intra_macroblock(&mut [128; 3], [30, 70, 110, 150], 100, 128);
}

fn interlaced_config() -> Mpeg2DecoderConfig {
    Mpeg2DecoderConfig::new(16, 32).with_threads(2)
}

/// 顶场第 `k` 行的亮度
fn top_field_luma(x: usize, k: usize) -> u8 {
    match (k < 8, x < 8) {
        (true, true) => 30,
        (true, false) => 70,
        (false, true) => 110,
        (false, false) => 150,
    }
}

#[test]
fn test_half_pel_frame_vector() {
    let mut w = StreamWriter::new();
    two_column_intra(&mut w);
    // 两个宏块均为前向 (3, 0), 即 1.5 像素; 第二个宏块沿用预测器
    w.picture(1, P, FRAME, true).slice(0).mb_increment(1);
    w.bits(0b001, 3).motion(3).motion(0);
    w.mb_increment(1).bits(0b001, 3).motion(0).motion(0);
    w.end();

    let config = Mpeg2DecoderConfig::new(32, 16).with_threads(2);
    let (result, pictures) = decode(config, &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(order(&pictures), vec![(PictureType::I, 0), (PictureType::P, 1)]);

    let expected = plane(32, 16, |x, _| match x {
        0..=13 => 40,
        14 => 60,
        _ => 80,
    });
    assert_eq!(pictures[1].planes[0], expected, "半像素插值结果不符");
    assert!(pictures[1].planes[1].iter().all(|&v| v == 90));
    assert!(pictures[1].planes[2].iter().all(|&v| v == 200));
}

#[test]
fn test_field_prediction_in_frame_picture() {
    let mut w = StreamWriter::new();
    interlaced_reference(&mut w);
    w.picture(1, P, FRAME, false);
    for row in 0..2 {
        w.slice(row).mb_increment(1);
        // MF, 场预测: 顶场行取底场参考, 底场行取顶场参考
        w.bits(0b001, 3).bits(0b01, 2);
        w.bits(1, 1).motion(0).motion(0);
        w.bits(0, 1).motion(0).motion(0);
    }
    w.end();

    let (result, pictures) = decode(interlaced_config(), &w.finish(), 4096);
    let summary = result.expect("解码应成功");
    assert_eq!(summary.pictures, 2);
    assert_eq!(summary.slices, 4);

    let reference = &pictures[0];
    assert_eq!(
        reference.planes[0],
        plane(16, 32, |_, y| if y % 2 == 0 { 50 } else { 150 })
    );
    let predicted = &pictures[1];
    assert_eq!(
        predicted.planes[0],
        plane(16, 32, |_, y| if y % 2 == 0 { 150 } else { 50 }),
        "field_select 应交换两场"
    );
    assert_eq!(
        predicted.planes[1],
        plane(8, 16, |_, y| if y % 2 == 0 { 160 } else { 100 })
    );
    assert!(predicted.planes[2].iter().all(|&v| v == 128));
}

#[test]
fn test_dual_prime_in_frame_picture() {
    let mut w = StreamWriter::new();
    interlaced_reference(&mut w);
    w.picture(1, P, FRAME, false);
    for row in 0..2 {
        w.slice(row).mb_increment(1);
        // MF, 双基: 向量与差分向量均为零
        w.bits(0b001, 3).bits(0b11, 2);
        w.motion(0).bits(0, 1).motion(0).bits(0, 1);
    }
    w.end();

    let (result, pictures) = decode(interlaced_config(), &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(pictures.len(), 2);
    // 同奇偶场与相反奇偶场的平均: (50 + 150 + 1) >> 1
    let predicted = &pictures[1];
    assert!(predicted.planes[0].iter().all(|&v| v == 100), "双基亮度不符");
    assert!(predicted.planes[1].iter().all(|&v| v == 130), "双基色度不符");
    assert!(predicted.planes[2].iter().all(|&v| v == 128));
}

#[test]
fn test_b_skip_run_reuses_previous_prediction() {
    let mut w = StreamWriter::new();
    w.sequence(64, 16, 1, true);
    w.picture(0, I, FRAME, true).slice(0);
    let mut pred = [128; 3];
    for value in [60, 90, 120, 150] {
        w.mb_increment(1);
        w.intra_macroblock(&mut pred, [value; 4], 128, 128);
    }
    w.picture(3, P, FRAME, true).slice(0);
    let mut pred = [128; 3];
    for value in [160, 190, 220, 250] {
        // P 图像中的帧内宏块
        w.mb_increment(1).bits(0b00011, 5);
        w.intra_blocks(&mut pred, &[value, value, value, value, 100, 150]);
    }
    w.picture(1, B, FRAME, true).slice(0).mb_increment(1);
    // MF|MB: 前向 (2, 0), 后向零向量; 随后跳过两个宏块, 末宏块仅后向
    w.bits(0b10, 2).motion(2).motion(0).motion(0).motion(0);
    w.mb_increment(3).bits(0b010, 3).motion(0).motion(0);
    w.end();

    let config = Mpeg2DecoderConfig::new(64, 16).with_threads(2);
    let (result, pictures) = decode(config, &w.finish(), 4096);
    let summary = result.expect("解码应成功");
    assert_eq!(summary.slices, 3);
    assert_eq!(
        order(&pictures),
        vec![(PictureType::I, 0), (PictureType::B, 1), (PictureType::P, 3)]
    );

    // 前向右移一个像素后与后向平均, 跳过的宏块沿用双向与前向向量
    let expected = plane(64, 16, |x, _| match x {
        0..=14 => 110,
        15 => 125,
        16..=30 => 140,
        31 => 155,
        32..=46 => 170,
        47 => 185,
        _ => 250,
    });
    let b = &pictures[1];
    assert_eq!(b.planes[0], expected, "B 跳过宏块预测不符");
    assert_eq!(b.planes[1], plane(32, 8, |x, _| if x < 24 { 114 } else { 100 }));
    assert_eq!(b.planes[2], plane(32, 8, |x, _| if x < 24 { 139 } else { 150 }));
}

#[test]
fn test_intra_table_one_alternate_scan_field_dct() {
    let flags = CodingFlags {
        q_scale_type: true,
        intra_vlc: true,
        alternate_scan: true,
        ..Default::default()
    };
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, true);
    w.picture_with(0, I, FRAME, false, flags).slice(0).mb_increment(1);
    // Intra, dct_type = 场
    w.bits(1, 1).bits(1, 1);
    let luma = [100, 120, 140, 160];
    let mut pred = 128;
    for (i, &value) in luma.iter().enumerate() {
        w.dc(value - pred, true);
        pred = value;
        if i == 0 {
            // B-15: run 0, level +1
            w.bits(0b10, 2).bits(0, 1);
        }
        // B-15 EOB
        w.bits(0b0110, 4);
    }
    for value in [90, 200] {
        w.dc(value - 128, false);
        w.bits(0b0110, 4);
    }
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(pictures.len(), 1);

    // 交替扫描序号 1 对应自然位置 8 (垂直频率 1); 权重 16, 非线性尺度 8:
    // (1 * 16 * 8) >> 4 = 8
    let blocks = [
        intra_pixels(100, &[(8, 8)]),
        intra_pixels(120, &[]),
        intra_pixels(140, &[]),
        intra_pixels(160, &[]),
    ];
    assert!(blocks[0][0] > blocks[0][56], "AC 系数应形成垂直渐变");
    // 场 DCT: 块 0/1 占偶数行, 块 2/3 占奇数行
    let expected = plane(16, 16, |x, y| {
        blocks[(y % 2) * 2 + x / 8][(y / 2) * 8 + x % 8]
    });
    let picture = &pictures[0];
    assert_eq!(picture.planes[0], expected, "亮度重建不符");
    assert_eq!(picture.planes[1], intra_pixels(90, &[]).to_vec());
    assert_eq!(picture.planes[2], intra_pixels(200, &[]).to_vec());
}

/// I 图像之后的 P 图像: 帧内宏块携带隐藏向量 (-4, 0), 下一宏块前向增量为零
fn concealment_stream(marker: bool) -> Vec<u8> {
    let mut w = StreamWriter::new();
    two_column_intra(&mut w);
    let flags = CodingFlags {
        concealment: true,
        ..Default::default()
    };
    w.picture_with(1, P, FRAME, true, flags).slice(0).mb_increment(1);
    w.bits(0b00011, 5).motion(-4).motion(0).bits(u32::from(marker), 1);
    w.intra_blocks(&mut [128; 3], &[200, 200, 200, 200, 90, 200]);
    w.mb_increment(1).bits(0b001, 3).motion(0).motion(0);
    w.end();
    w.finish()
}

#[test]
fn test_concealment_vectors_feed_predictor() {
    let config = Mpeg2DecoderConfig::new(32, 16).with_threads(2);
    let (result, pictures) = decode(config, &concealment_stream(true), 4096);
    result.expect("解码应成功");
    assert_eq!(pictures.len(), 2);

    // 第二个宏块以 (-4, 0) 即左移两个像素预测
    let expected = plane(32, 16, |x, _| match x {
        0..=15 => 200,
        16 | 17 => 40,
        _ => 80,
    });
    assert_eq!(pictures[1].planes[0], expected, "隐藏向量应进入预测器");
    assert!(!pictures[1].corrupted);
}

#[test]
fn test_concealment_without_marker_is_corrupt() {
    let config = Mpeg2DecoderConfig::new(32, 16).with_threads(2);
    let (result, pictures) = decode(config, &concealment_stream(false), 4096);
    assert!(
        matches!(result, Err(TaoError::InvalidData(_))),
        "缺少标记位应报告条带失败: {result:?}"
    );
    assert_eq!(pictures.len(), 2);
    assert!(!pictures[0].corrupted);
    assert!(pictures[1].corrupted);
}

#[test]
fn test_p_second_field_predicts_from_first_field() {
    let mut w = StreamWriter::new();
    intra_top_field(&mut w);
    w.picture(0, P, BOTTOM, false).slice(0).mb_increment(1);
    // MF, 场预测, field_select = 顶场 (同帧第一场), 向量 (0, 2) 即下移一场行
    w.bits(0b001, 3).bits(0b01, 2).bits(0, 1).motion(0).motion(2);
    w.end();

    let (result, pictures) = decode(interlaced_config(), &w.finish(), 4096);
    let summary = result.expect("I/P 场对应能解码");
    assert_eq!(summary.pictures, 1, "两场应合成一帧");
    assert_eq!(summary.slices, 2);

    let frame = &pictures[0];
    assert_eq!(frame.picture_type, PictureType::I);
    let expected = plane(16, 32, |x, y| {
        if y % 2 == 0 {
            top_field_luma(x, y / 2)
        } else {
            top_field_luma(x, (y / 2 + 1).min(15))
        }
    });
    assert_eq!(frame.planes[0], expected, "底场应来自同帧顶场");
    assert!(frame.planes[1].iter().all(|&v| v == 100));
}

#[test]
fn test_16x8_prediction_in_field_picture() {
    let mut w = StreamWriter::new();
    intra_top_field(&mut w);
    w.picture(0, P, BOTTOM, false).slice(0).mb_increment(1);
    // MF, 16x8: 上半零向量, 下半向量 (0, -16) 即上移八场行, 均取顶场
    w.bits(0b001, 3).bits(0b10, 2);
    w.bits(0, 1).motion(0).motion(0);
    w.bits(0, 1).motion(0).motion(-16);
    w.end();

    let (result, pictures) = decode(interlaced_config(), &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(pictures.len(), 1);

    let expected = plane(16, 32, |x, y| {
        if y % 2 == 0 {
            top_field_luma(x, y / 2)
        } else {
            top_field_luma(x, (y / 2) % 8)
        }
    });
    assert_eq!(pictures[0].planes[0], expected, "16x8 两半应分别预测");
    assert!(pictures[0].planes[1].iter().all(|&v| v == 100));
}

#[test]
fn test_422_coded_block_pattern_extension() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 2, true);
    w.picture(0, I, FRAME, true).slice(0).mb_increment(1);
    // 4:2:2 帧内宏块: Cb/Cr 上半, 再 Cb/Cr 下半
    w.bits(1, 1);
    w.intra_blocks(&mut [128; 3], &[100, 100, 100, 100, 90, 200, 90, 200]);
    w.picture(1, P, FRAME, true).slice(0).mb_increment(1);
    // MF|PAT 零向量; 4:2:0 部分为 0, 扩展两位 '01' 只选中下半 Cr 块
    let (code, len) = CBP_CODES[0];
    w.bits(0b1, 1).motion(0).motion(0);
    w.bits(u32::from(code), u32::from(len)).bits(0b01, 2);
    // 首系数 +1 后 EOB: (3 * 16 * 16) >> 5 = 24, 即像素 +3
    w.bits(0b10, 2).bits(0b10, 2);
    w.end();

    let config = test_config().with_chroma_format(ChromaFormat::Yuv422);
    let (result, pictures) = decode(config, &w.finish(), 4096);
    result.expect("解码应成功");
    assert_eq!(pictures.len(), 2);

    let p = &pictures[1];
    assert!(p.planes[0].iter().all(|&v| v == 100));
    assert_eq!(p.planes[1], vec![90; 8 * 16], "Cb 不应有残差");
    assert_eq!(
        p.planes[2],
        plane(8, 16, |_, y| if y < 8 { 200 } else { 203 }),
        "残差只应落在下半 Cr 块"
    );
}

// ============================================================================
// 错误处理
// ============================================================================

#[test]
fn test_malformed_slice_marks_picture_corrupted() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 1, true);
    w.picture(0, I, FRAME, true).slice(0).mb_increment(1);
    // I 图像中不存在的宏块类型
    w.bits(0b00, 2).bits(0xFF, 8);
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    assert!(
        matches!(result, Err(TaoError::InvalidData(_))),
        "条带失败应在结束时报告: {result:?}"
    );
    assert_eq!(pictures.len(), 1, "损坏图像仍应输出");
    assert!(pictures[0].corrupted);
}

#[test]
fn test_mpeg1_stream_is_unsupported() {
    let mut w = StreamWriter::new();
    w.sequence_header(16, 16);
    w.picture(0, I, FRAME, true).slice(0);
    w.end();

    let (result, pictures) = decode(test_config(), &w.finish(), 4096);
    assert!(
        matches!(result, Err(TaoError::Unsupported(_))),
        "缺少序列扩展应不支持: {result:?}"
    );
    assert!(pictures.is_empty());
}

#[test]
fn test_chroma_format_mismatch_is_unsupported() {
    let mut w = StreamWriter::new();
    w.sequence(16, 16, 2, true);
    w.end();

    let (result, _) = decode(test_config(), &w.finish(), 4096);
    assert!(matches!(result, Err(TaoError::Unsupported(_))));
}

#[test]
fn test_oversized_sequence_is_unsupported() {
    let mut w = StreamWriter::new();
    w.sequence(64, 64, 1, true);
    w.end();

    let (result, _) = decode(test_config(), &w.finish(), 4096);
    assert!(matches!(result, Err(TaoError::Unsupported(_))));
}

#[test]
fn test_reject_small_pool() {
    let config = test_config().with_max_b_frames(2).with_pool_depth(4);
    let result = Mpeg2Decoder::new(config, |_| {});
    assert!(matches!(result, Err(TaoError::InvalidArgument(_))));
}

#[test]
fn test_empty_input_finishes_cleanly() {
    let (result, pictures) = decode(test_config(), &[], 1);
    assert_eq!(result.expect("空输入"), DecodeSummary::default());
    assert!(pictures.is_empty());
}

// ============================================================================
// 像素内核注入
// ============================================================================

struct CountingKernel {
    calls: AtomicUsize,
}

impl PixelKernel for CountingKernel {
    fn predict(
        &self,
        dst: &mut [u8],
        dst_stride: usize,
        src: &[u8],
        src_stride: usize,
        block: PredBlock,
        average: bool,
    ) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        PortableKernel.predict(dst, dst_stride, src, src_stride, block, average);
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

#[test]
fn test_custom_kernel_is_used() {
    let kernel = Arc::new(CountingKernel {
        calls: AtomicUsize::new(0),
    });
    let (pictures, sink) = collecting_sink();
    let mut decoder = Mpeg2Decoder::with_kernel(test_config(), kernel.clone(), sink)
        .expect("创建解码器");
    decoder.push(&ipbb_stream()).expect("推入数据");
    decoder.finish().expect("解码应成功");

    // P: 3 个平面; B1: 双向 6; B2: 3
    assert_eq!(kernel.calls.load(Ordering::Relaxed), 12);
    assert_eq!(pictures.lock().unwrap().len(), 4);
}

// ============================================================================
// Decoder trait 适配
// ============================================================================

#[test]
fn test_decoder_trait_adapter() {
    let mut decoder = Mpeg2VideoDecoder::create().expect("创建解码器");
    let mut params = CodecParameters::new(CodecId::Mpeg2Video);
    params.video.width = 16;
    params.video.height = 16;
    params.video.pixel_format = PixelFormat::Yuv420p;
    decoder.open(&params).expect("打开解码器");

    decoder
        .send_packet(&Packet::from_data(ipbb_stream()))
        .expect("发送数据");
    decoder.send_packet(&Packet::empty()).expect("结束输入");

    let mut frames = Vec::new();
    loop {
        match decoder.receive_frame() {
            Ok(frame) => frames.push(frame),
            Err(TaoError::Eof) => break,
            Err(e) => panic!("意外错误: {e}"),
        }
    }
    assert_eq!(frames.len(), 4);
    let pts: Vec<i64> = frames.iter().map(|f| f.pts).collect();
    assert_eq!(pts, vec![0, 1, 2, 3]);
    let types: Vec<PictureType> = frames.iter().map(|f| f.picture_type).collect();
    assert_eq!(
        types,
        vec![PictureType::I, PictureType::B, PictureType::B, PictureType::P]
    );
    let first_pixels: Vec<u8> = frames.iter().map(|f| f.data[0][0]).collect();
    assert_eq!(first_pixels, vec![100, 102, 103, 103]);
    assert_eq!(frames[0].linesize, vec![16, 8, 8]);
    assert!(frames[0].is_keyframe);

    assert!(
        decoder.send_packet(&Packet::from_data(vec![0u8; 4])).is_err(),
        "结束后再送数据应报错"
    );
    decoder.flush();
    assert!(matches!(
        decoder.receive_frame(),
        Err(TaoError::NeedMoreData)
    ));
}

#[test]
fn test_open_rejects_other_codec() {
    let mut decoder = Mpeg2VideoDecoder::create().expect("创建解码器");
    let params = CodecParameters::new(CodecId::Mpeg1Video);
    assert!(matches!(
        decoder.open(&params),
        Err(TaoError::InvalidArgument(_))
    ));
}
