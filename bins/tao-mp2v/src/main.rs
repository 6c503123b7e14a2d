//! tao-mp2v - MPEG-2 视频基本流解码工具
//!
//! 读取 .m2v 基本流, 多线程解码后按显示顺序写出平面 YUV.

mod logging;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};

use tao_codec::decoders::mpeg2video::header::{
    EXTENSION_START_CODE, Extension, ExtensionContext, SEQUENCE_HEADER_CODE, parse_extension,
    parse_sequence_header,
};
use tao_codec::decoders::mpeg2video::{
    ChromaFormat, Mpeg2Decoder, Mpeg2DecoderConfig, OutputPicture,
};
use tao_core::bitreader::BitReader;
use tao_core::startcode::StartCodeIter;

/// 探测序列头时读取的最大字节数
const PROBE_SIZE: usize = 1 << 20;

#[derive(Parser, Debug)]
#[command(name = "tao-mp2v", version, about = "纯 Rust MPEG-2 视频解码工具")]
struct Cli {
    /// 输入基本流文件路径
    #[arg(short, long)]
    input: String,

    /// 输出平面 YUV 文件路径, "-" 表示标准输出
    #[arg(short, long)]
    output: Option<String>,

    /// 工作线程数
    #[arg(short = 'j', long, default_value_t = 4)]
    threads: usize,

    /// 两个参考图像之间最多的 B 图像数
    #[arg(long, default_value_t = 2)]
    max_b_frames: usize,

    /// 图像池深度, 默认取所需最小值加 2
    #[arg(long)]
    pool_depth: Option<usize>,

    /// 帧池尺寸 (如 "1920x1088"), 默认从序列头探测
    #[arg(short = 's', long = "size")]
    size: Option<String>,

    /// 每次推入解码器的字节数
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    /// 按解码顺序输出, 不做显示重排
    #[arg(long)]
    no_reorder: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// 从码流开头探测到的序列参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SequenceProbe {
    width: usize,
    height: usize,
    chroma_format: ChromaFormat,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init("tao-mp2v", cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }
    if let Err(e) = run(&cli) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.chunk_size == 0 {
        bail!("--chunk-size 不能为 0");
    }
    let mut input =
        File::open(&cli.input).with_context(|| format!("无法打开输入文件 '{}'", cli.input))?;
    let head = read_head(&mut input, PROBE_SIZE)?;

    let config = build_config(cli, &head)?;
    info!(
        "输入: {}, 帧池 {}x{} {:?}, {} 线程, 池深度 {}",
        cli.input,
        config.width,
        config.height,
        config.chroma_format,
        config.threads,
        config.pool_depth
    );

    let writer: Option<Box<dyn Write + Send>> = match cli.output.as_deref() {
        None => None,
        Some("-") => Some(Box::new(BufWriter::new(std::io::stdout()))),
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("无法创建输出文件 '{path}'"))?;
            Some(Box::new(BufWriter::new(file)))
        }
    };
    let writer = Arc::new(Mutex::new(writer));
    let write_error = Arc::new(Mutex::new(None));

    let sink = {
        let writer = Arc::clone(&writer);
        let write_error = Arc::clone(&write_error);
        move |picture: OutputPicture| {
            debug!(
                "输出图像: {:?} tr={} #{}",
                picture.picture_type(),
                picture.info().temporal_reference,
                picture.info().decode_index
            );
            if picture.corrupted() {
                warn!(
                    "图像 tr={} 有条带解码失败",
                    picture.info().temporal_reference
                );
            }
            let Ok(mut guard) = writer.lock() else {
                return;
            };
            if let Some(out) = guard.as_mut()
                && let Err(e) = picture.write_yuv(out)
            {
                // 写失败后停止输出, 解码继续以便正常结束
                *guard = None;
                if let Ok(mut slot) = write_error.lock() {
                    *slot = Some(e);
                }
            }
        }
    };

    let started = Instant::now();
    let mut decoder = Mpeg2Decoder::new(config, sink)?;
    decoder.push(&head)?;
    let mut chunk = vec![0u8; cli.chunk_size];
    loop {
        let n = input.read(&mut chunk).context("读取输入失败")?;
        if n == 0 {
            break;
        }
        decoder.push(&chunk[..n])?;
    }
    let result = decoder.finish();
    let elapsed = started.elapsed();

    if let Some(e) = write_error.lock().ok().and_then(|mut slot| slot.take()) {
        return Err(e).context("写出 YUV 失败");
    }
    if let Some(mut out) = writer.lock().ok().and_then(|mut guard| guard.take()) {
        out.flush().context("写出 YUV 失败")?;
    }

    let summary = result?;
    let fps = summary.pictures as f64 / elapsed.as_secs_f64().max(1e-6);
    info!(
        "解码完成: {} 幅图像, {} 个条带, 用时 {:.3}s ({fps:.1} fps)",
        summary.pictures,
        summary.slices,
        elapsed.as_secs_f64()
    );
    Ok(())
}

/// 读取开头最多 `limit` 字节
fn read_head(input: &mut impl Read, limit: usize) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(limit.min(64 * 1024));
    input
        .take(limit as u64)
        .read_to_end(&mut head)
        .context("读取输入失败")?;
    Ok(head)
}

fn build_config(cli: &Cli, head: &[u8]) -> Result<Mpeg2DecoderConfig> {
    let probe = probe_sequence(head);
    let (width, height, chroma) = match (cli.size.as_deref(), probe) {
        (Some(size), probe) => {
            let (w, h) = parse_size(size)
                .with_context(|| format!("无效的尺寸 '{size}', 应为 WxH"))?;
            let chroma = probe.map_or(ChromaFormat::Yuv420, |p| p.chroma_format);
            (w, h, chroma)
        }
        (None, Some(p)) => (p.width, p.height, p.chroma_format),
        (None, None) => bail!("未找到 MPEG-2 序列头, 请用 --size 指定帧池尺寸"),
    };
    let min_depth = Mpeg2DecoderConfig::min_pool_depth(cli.max_b_frames);
    let config = Mpeg2DecoderConfig::new(width, height)
        .with_chroma_format(chroma)
        .with_threads(cli.threads)
        .with_max_b_frames(cli.max_b_frames)
        .with_pool_depth(cli.pool_depth.unwrap_or(min_depth + 2))
        .with_reorder(!cli.no_reorder);
    config.validate()?;
    Ok(config)
}

/// 解析 "WxH" 形式的尺寸
fn parse_size(s: &str) -> Option<(usize, usize)> {
    let (w, h) = s.split_once(['x', 'X'])?;
    let w = w.trim().parse().ok()?;
    let h = h.trim().parse().ok()?;
    Some((w, h))
}

/// 在码流开头查找序列头与紧随的序列扩展
fn probe_sequence(data: &[u8]) -> Option<SequenceProbe> {
    let mut probe: Option<SequenceProbe> = None;
    for offset in StartCodeIter::new(data) {
        let code = data.get(offset + 3).copied()?;
        let payload = data.get(offset + 4..)?;
        match (code, probe.as_mut()) {
            (SEQUENCE_HEADER_CODE, None) => {
                let header = parse_sequence_header(&mut BitReader::new(payload)).ok()?;
                probe = Some(SequenceProbe {
                    width: header.horizontal_size_value as usize,
                    height: header.vertical_size_value as usize,
                    chroma_format: ChromaFormat::Yuv420,
                });
            }
            (EXTENSION_START_CODE, Some(p)) => {
                let ext = parse_extension(&mut BitReader::new(payload), &ExtensionContext::default());
                if let Ok(Extension::Sequence(ext)) = ext {
                    p.width |= (ext.horizontal_size_extension as usize) << 12;
                    p.height |= (ext.vertical_size_extension as usize) << 12;
                    p.chroma_format = ext.chroma_format;
                }
                break;
            }
            (_, Some(_)) => break,
            _ => {}
        }
    }
    probe
}
