//! 流解码器: 码流分单元, 图像生命周期, 参考窗口与显示重排
//!
//! 调用线程负责切分起始码单元, 解析头部并把条带封装为任务; 固定数量的工作线程
//! 执行条带任务; 一个输出线程按提交顺序把完成的图像交给回调.
//!
//! 重排: B 图像完成后立即输出, I/P 图像推迟到下一个参考图像 (或序列结束) 时才
//! 进入输出队列, 输出队列本身按入队顺序交付, 因此得到显示顺序.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLockReadGuard};
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use tao_core::bitreader::BitReader;
use tao_core::startcode::{PREFIX_LEN, find_start_codes};
use tao_core::{Rational, TaoError, TaoResult};

use super::config::Mpeg2DecoderConfig;
use super::frame_buffer::{FrameCell, PictureBuffer, PictureInfo};
use super::header::{
    EXTENSION_START_CODE, Extension, ExtensionContext, GROUP_START_CODE, PICTURE_START_CODE,
    PictureCodingExtension, PictureHeader, SEQUENCE_END_CODE, SEQUENCE_ERROR_CODE,
    SEQUENCE_HEADER_CODE, SLICE_START_CODE_MAX, SLICE_START_CODE_MIN, ScalableMode,
    SequenceDisplayExtension, SequenceExtension, SequenceHeader, SequenceScalableExtension,
    USER_DATA_START_CODE, parse_extension, parse_gop_header, parse_picture_header,
    parse_sequence_header,
};
use super::kernel::{PixelKernel, PortableKernel};
use super::scheduler::{PictureId, TaskScheduler};
use super::slice::{PictureParams, QuantMatrices, SequenceGeometry, SliceTask};
use super::tables::{display_aspect_ratio, frame_rate};
use super::types::{ChromaFormat, PictureCodingType, PictureStructure};
use crate::frame::PictureType;

type PictureScheduler = TaskScheduler<SliceTask, Arc<FrameCell>>;

/// 码流结束时追加的序列结束码
const END_OF_SEQUENCE: [u8; 4] = [0x00, 0x00, 0x01, SEQUENCE_END_CODE];

/// 尾部填充对齐
const TAIL_ALIGN: usize = 16;

// ============================================================================
// 输出
// ============================================================================

/// 交给输出回调的已解码图像
///
/// 持有期间对应的池槽位不会被复用; 丢弃即释放回图像池. 回调如果长期保留图像,
/// 解码器会在池满时阻塞.
pub struct OutputPicture {
    id: PictureId,
    cell: Arc<FrameCell>,
    info: PictureInfo,
    chroma: ChromaFormat,
    scheduler: Arc<PictureScheduler>,
}

impl OutputPicture {
    pub fn info(&self) -> &PictureInfo {
        &self.info
    }

    pub fn picture_type(&self) -> PictureType {
        self.info.coding_type.picture_type()
    }

    /// 显示宽度
    pub fn width(&self) -> usize {
        self.info.display_width
    }

    /// 显示高度
    pub fn height(&self) -> usize {
        self.info.display_height
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        self.chroma
    }

    /// 至少一个条带解码失败
    pub fn corrupted(&self) -> bool {
        self.cell.failed_slices() > 0
    }

    /// 编码尺寸的完整图像缓冲 (含步长与右下填充)
    pub fn buffer(&self) -> TaoResult<RwLockReadGuard<'_, PictureBuffer>> {
        self.cell.read()
    }

    /// 平面的显示尺寸
    pub fn plane_size(&self, plane: usize) -> (usize, usize) {
        let (w, h) = (self.width(), self.height());
        if plane == 0 {
            return (w, h);
        }
        let (sx, sy) = self.chroma.shift();
        ((w + (1 << sx) - 1) >> sx, (h + (1 << sy) - 1) >> sy)
    }

    /// 按显示尺寸裁剪并紧密排列的三个平面
    pub fn copy_planes(&self) -> TaoResult<[Vec<u8>; 3]> {
        let buffer = self.buffer()?;
        Ok(std::array::from_fn(|i| {
            let (w, h) = self.plane_size(i);
            let plane = buffer.plane(i);
            let mut out = Vec::with_capacity(w * h);
            for y in 0..h.min(plane.height()) {
                out.extend_from_slice(&plane.row(y)[..w.min(plane.width())]);
            }
            out
        }))
    }

    /// 以平面 YUV 格式写出显示区域
    pub fn write_yuv<W: Write>(&self, out: &mut W) -> TaoResult<()> {
        for plane in self.copy_planes()? {
            out.write_all(&plane)?;
        }
        Ok(())
    }
}

impl Drop for OutputPicture {
    fn drop(&mut self) {
        if let Err(e) = self.scheduler.release(self.id) {
            warn!("MPEG-2: 释放输出图像失败: {e}");
        }
    }
}

impl std::fmt::Debug for OutputPicture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPicture")
            .field("slot", &self.id.slot())
            .field("info", &self.info)
            .finish()
    }
}

/// 解码统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    /// 交给回调的图像数
    pub pictures: usize,
    /// 提交解码的条带数
    pub slices: usize,
    pub failed_slices: usize,
}

#[derive(Default)]
struct OutputStats {
    pictures: AtomicUsize,
    failed_slices: AtomicUsize,
}

// ============================================================================
// 序列与图像状态
// ============================================================================

/// 序列级上下文, 由序列头与序列扩展更新, 图像解码期间只读
struct SequenceContext {
    header: SequenceHeader,
    extension: Option<SequenceExtension>,
    display: Option<SequenceDisplayExtension>,
    scalable: Option<SequenceScalableExtension>,
    matrices: QuantMatrices,
}

impl SequenceContext {
    fn new(header: SequenceHeader, previous: Option<&SequenceContext>) -> Self {
        let mut matrices = previous.map(|s| s.matrices.clone()).unwrap_or_default();
        matrices.load_sequence_header(&header);
        Self {
            header,
            extension: None,
            display: None,
            scalable: None,
            matrices,
        }
    }

    fn horizontal_size(&self) -> u32 {
        let ext = self.extension.as_ref().map_or(0, |e| e.horizontal_size_extension);
        self.header.horizontal_size_value | (ext << 12)
    }

    fn vertical_size(&self) -> u32 {
        let ext = self.extension.as_ref().map_or(0, |e| e.vertical_size_extension);
        self.header.vertical_size_value | (ext << 12)
    }

    fn geometry(&self) -> TaoResult<SequenceGeometry> {
        let ext = self.extension.as_ref().ok_or_else(|| {
            TaoError::Unsupported("缺少序列扩展, 不支持 MPEG-1 码流".into())
        })?;
        let (width, height) = (self.horizontal_size() as usize, self.vertical_size() as usize);
        let mb_height = if ext.progressive_sequence {
            height.div_ceil(16)
        } else {
            2 * height.div_ceil(32)
        };
        Ok(SequenceGeometry {
            mb_width: width.div_ceil(16),
            mb_height,
            vertical_size: self.vertical_size(),
            chroma: ext.chroma_format,
            data_partitioning: self
                .scalable
                .as_ref()
                .is_some_and(|s| s.scalable_mode == ScalableMode::DataPartitioning),
        })
    }

    fn frame_rate(&self) -> Rational {
        let base = frame_rate(self.header.frame_rate_code).unwrap_or(Rational::UNDEFINED);
        match &self.extension {
            Some(ext) => base.scaled(
                i32::from(ext.frame_rate_extension_n) + 1,
                i32::from(ext.frame_rate_extension_d) + 1,
            ),
            None => base,
        }
    }

    /// 显示宽高比换算为采样宽高比
    fn sample_aspect_ratio(&self) -> Rational {
        match display_aspect_ratio(self.header.aspect_ratio_information) {
            Some(dar) if dar == Rational::new(1, 1) => dar,
            Some(dar) => {
                // 显示区域优先取序列显示扩展
                let (w, h) = self.display.as_ref().map_or(
                    (self.horizontal_size(), self.vertical_size()),
                    |d| (d.display_horizontal_size, d.display_vertical_size),
                );
                if w == 0 || h == 0 {
                    Rational::UNDEFINED
                } else {
                    dar.scaled(h as i32, w as i32)
                }
            }
            None => Rational::UNDEFINED,
        }
    }

    fn picture_info(
        &self,
        picture: &PendingPicture,
        coding: &PictureCodingExtension,
        decode_index: u64,
    ) -> PictureInfo {
        PictureInfo {
            decode_index,
            coding_type: picture.header.picture_coding_type,
            temporal_reference: picture.header.temporal_reference,
            display_width: self.horizontal_size() as usize,
            display_height: self.vertical_size() as usize,
            progressive_frame: coding.progressive_frame,
            top_field_first: coding.top_field_first,
            repeat_first_field: coding.repeat_first_field,
            frame_rate: self.frame_rate(),
            sample_aspect_ratio: self.sample_aspect_ratio(),
            user_data: picture.user_data.clone(),
        }
    }
}

/// 参考窗口中的图像
#[derive(Clone)]
struct RefFrame {
    id: PictureId,
    cell: Arc<FrameCell>,
}

/// 已提交, 等待第二场的第一场
struct FirstField {
    id: PictureId,
    cell: Arc<FrameCell>,
    coding_type: PictureCodingType,
    parity: usize,
}

/// 已分配槽位, 正在收集条带的图像
struct ActivePicture {
    id: PictureId,
    cell: Arc<FrameCell>,
    params: Arc<PictureParams>,
    forward: Option<Arc<FrameCell>>,
    backward: Option<Arc<FrameCell>>,
    /// 场对按第一场的类型参与参考窗口
    frame_type: PictureCodingType,
    structure: PictureStructure,
    second_field: bool,
}

enum PictureState {
    /// 头部与扩展阶段, 尚未见到条带
    Collecting,
    Active(ActivePicture),
    /// 缺少参考或序列信息, 其条带被忽略
    Dropped,
}

struct PendingPicture {
    header: PictureHeader,
    coding: Option<PictureCodingExtension>,
    user_data: Vec<u8>,
    state: PictureState,
}

// ============================================================================
// 流解码器
// ============================================================================

/// MPEG-2 视频基本流解码器
///
/// ```rust,no_run
/// use tao_codec::decoders::mpeg2video::{Mpeg2Decoder, Mpeg2DecoderConfig};
///
/// let config = Mpeg2DecoderConfig::new(720, 576);
/// let mut decoder = Mpeg2Decoder::new(config, |picture| {
///     println!("{:?} {}", picture.picture_type(), picture.info().temporal_reference);
/// })?;
/// decoder.push(&std::fs::read("input.m2v")?)?;
/// let summary = decoder.finish()?;
/// println!("{} 幅图像", summary.pictures);
/// # Ok::<(), tao_core::TaoError>(())
/// ```
pub struct Mpeg2Decoder {
    config: Mpeg2DecoderConfig,
    scheduler: Arc<PictureScheduler>,
    kernel: Arc<dyn PixelKernel>,
    workers: Vec<JoinHandle<()>>,
    output: Option<JoinHandle<()>>,
    stats: Arc<OutputStats>,
    /// 最后一个完整单元之后的残留字节
    pending: BytesMut,
    /// `pending` 中已扫描过起始码的字节数
    scanned: usize,
    sequence: Option<SequenceContext>,
    picture: Option<PendingPicture>,
    first_field: Option<FirstField>,
    /// `[较早的参考, 最近的参考]`
    refs: [Option<RefFrame>; 2],
    /// 下一个图像之前的用户数据
    user_data: Vec<u8>,
    closed_gop: bool,
    broken_link: bool,
    /// 当前 GOP 内已提交的参考帧数
    gop_references: usize,
    decode_index: u64,
    slices: usize,
}

impl Mpeg2Decoder {
    /// 使用可移植像素内核创建解码器
    pub fn new<F>(config: Mpeg2DecoderConfig, sink: F) -> TaoResult<Self>
    where
        F: FnMut(OutputPicture) + Send + 'static,
    {
        Self::with_kernel(config, Arc::new(PortableKernel), sink)
    }

    /// 使用指定像素内核创建解码器, 校验配置后启动工作线程与输出线程
    pub fn with_kernel<F>(
        config: Mpeg2DecoderConfig,
        kernel: Arc<dyn PixelKernel>,
        sink: F,
    ) -> TaoResult<Self>
    where
        F: FnMut(OutputPicture) + Send + 'static,
    {
        config.validate()?;
        let (coded_width, coded_height) = config.coded_size();
        let chroma = config.chroma_format;
        let scheduler = Arc::new(PictureScheduler::new(config.pool_depth, |_| {
            Arc::new(FrameCell::new(PictureBuffer::new(
                coded_width,
                coded_height,
                chroma,
            )))
        }));
        let stats = Arc::new(OutputStats::default());
        debug!(
            "MPEG-2: 创建解码器 {}x{} {:?}, 池深度={}, 线程={}, 重排={}, 内核={}",
            config.width,
            config.height,
            chroma,
            config.pool_depth,
            config.threads,
            config.reorder,
            kernel.name()
        );

        let mut decoder = Self {
            config,
            scheduler,
            kernel,
            workers: Vec::new(),
            output: None,
            stats,
            pending: BytesMut::new(),
            scanned: 0,
            sequence: None,
            picture: None,
            first_field: None,
            refs: [None, None],
            user_data: Vec::new(),
            closed_gop: false,
            broken_link: false,
            gop_references: 0,
            decode_index: 0,
            slices: 0,
        };
        if let Err(e) = decoder.spawn_threads(sink) {
            decoder.scheduler.abort();
            return Err(e);
        }
        Ok(decoder)
    }

    fn spawn_threads<F>(&mut self, mut sink: F) -> TaoResult<()>
    where
        F: FnMut(OutputPicture) + Send + 'static,
    {
        for i in 0..self.config.threads {
            let scheduler = Arc::clone(&self.scheduler);
            let handle = thread::Builder::new()
                .name(format!("mpeg2-slice-{i}"))
                .spawn(move || {
                    while let Some((id, task)) = scheduler.get_task() {
                        task.execute();
                        if let Err(e) = scheduler.done(id) {
                            warn!("MPEG-2: 条带完成通知失败: {e}");
                        }
                    }
                    trace!("MPEG-2: 工作线程 {i} 退出");
                })?;
            self.workers.push(handle);
        }

        let scheduler = Arc::clone(&self.scheduler);
        let stats = Arc::clone(&self.stats);
        let handle = thread::Builder::new()
            .name("mpeg2-output".into())
            .spawn(move || {
                while let Some((id, cell)) = scheduler.get_decoded() {
                    let prepared = cell.info().map(|info| info.clone()).and_then(|info| {
                        let chroma = cell.read()?.chroma_format();
                        Ok((info, chroma))
                    });
                    let (info, chroma) = match prepared {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("MPEG-2: 无法读取输出图像: {e}");
                            if let Err(e) = scheduler.release(id) {
                                warn!("MPEG-2: 释放输出图像失败: {e}");
                            }
                            continue;
                        }
                    };
                    stats.pictures.fetch_add(1, Ordering::AcqRel);
                    stats
                        .failed_slices
                        .fetch_add(cell.failed_slices(), Ordering::AcqRel);
                    trace!(
                        "MPEG-2: 输出图像 #{} {:?} tr={}",
                        info.decode_index, info.coding_type, info.temporal_reference
                    );
                    sink(OutputPicture {
                        id,
                        cell,
                        info,
                        chroma,
                        scheduler: Arc::clone(&scheduler),
                    });
                }
                trace!("MPEG-2: 输出线程退出");
            })?;
        self.output = Some(handle);
        Ok(())
    }

    pub fn config(&self) -> &Mpeg2DecoderConfig {
        &self.config
    }

    /// 当前统计 (输出端计数随解码进度增长)
    pub fn summary(&self) -> DecodeSummary {
        DecodeSummary {
            pictures: self.stats.pictures.load(Ordering::Acquire),
            slices: self.slices,
            failed_slices: self.stats.failed_slices.load(Ordering::Acquire),
        }
    }

    /// 送入任意长度的码流片段
    ///
    /// 跨片段的起始码会被正确拼接; 只有遇到下一个起始码时前一个单元才会被处理.
    pub fn push(&mut self, chunk: &[u8]) -> TaoResult<()> {
        if self.output.is_none() {
            return Err(TaoError::Codec("解码器已结束".into()));
        }
        self.pending.extend_from_slice(chunk);
        self.process_units()
    }

    /// 输入结束: 追加序列结束码, 等待全部图像输出并停止线程
    ///
    /// 有条带解码失败时返回 `InvalidData`, 与正常结束区分.
    pub fn finish(mut self) -> TaoResult<DecodeSummary> {
        let drained = self.drain();
        let stopped = self.shutdown(drained.is_ok());
        drained?;
        stopped?;
        let summary = self.summary();
        debug!(
            "MPEG-2: 解码结束, 图像={}, 条带={}, 失败条带={}",
            summary.pictures, summary.slices, summary.failed_slices
        );
        if summary.failed_slices > 0 {
            return Err(TaoError::InvalidData(format!(
                "{} / {} 个条带解码失败",
                summary.failed_slices, summary.slices
            )));
        }
        Ok(summary)
    }

    /// 处理缓冲中所有完整的单元, 保留最后一个起始码之后的数据
    ///
    /// 残留数据中已扫描过的部分不再重扫, 只回退前缀长度以接上跨片段的起始码.
    fn process_units(&mut self) -> TaoResult<()> {
        let from = self.scanned.saturating_sub(PREFIX_LEN);
        let data = self.pending.split().freeze();
        // from > 0 时残留数据必以起始码开头
        let mut offsets = if from > 0 { vec![0] } else { Vec::new() };
        offsets.extend(find_start_codes(&data[from..]).into_iter().map(|o| o + from));
        let Some(&last) = offsets.last() else {
            // 可能是被切断的前缀
            let keep = data.len().min(PREFIX_LEN);
            self.pending.extend_from_slice(&data[data.len() - keep..]);
            self.scanned = self.pending.len();
            return Ok(());
        };
        if offsets[0] > 0 {
            trace!("MPEG-2: 跳过起始码之前的 {} 字节", offsets[0]);
        }
        self.pending.extend_from_slice(&data[last..]);
        self.scanned = self.pending.len();
        for pair in offsets.windows(2) {
            self.handle_unit(data.slice(pair[0]..pair[1]))?;
        }
        Ok(())
    }

    /// 追加序列结束码并处理剩余单元
    fn drain(&mut self) -> TaoResult<()> {
        self.pending.extend_from_slice(&END_OF_SEQUENCE);
        let padded = self.pending.len().next_multiple_of(TAIL_ALIGN);
        self.pending.resize(padded, 0);
        self.process_units()?;
        let tail = self.pending.split().freeze();
        self.scanned = 0;
        if tail.len() > PREFIX_LEN {
            self.handle_unit(tail)?;
        }
        Ok(())
    }

    /// 停止调度器并回收线程; `graceful` 时先等待全部图像释放
    fn shutdown(&mut self, graceful: bool) -> TaoResult<()> {
        let result = if graceful {
            self.scheduler.kill()
        } else {
            self.scheduler.abort();
            Ok(())
        };
        if result.is_err() {
            self.scheduler.abort();
        }
        for handle in self.workers.drain(..).chain(self.output.take()) {
            if handle.join().is_err() {
                warn!("MPEG-2: 解码线程异常退出");
            }
        }
        result
    }

    // ========================================================================
    // 单元分发
    // ========================================================================

    fn handle_unit(&mut self, unit: Bytes) -> TaoResult<()> {
        let code = unit[PREFIX_LEN];
        if (SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX).contains(&code) {
            return self.handle_slice(unit);
        }

        let ends_picture = !matches!(code, EXTENSION_START_CODE | USER_DATA_START_CODE);
        if self
            .picture
            .as_ref()
            .is_some_and(|p| ends_picture || !matches!(p.state, PictureState::Collecting))
        {
            self.finish_picture()?;
        }

        let mut br = BitReader::new(&unit[PREFIX_LEN + 1..]);
        match code {
            SEQUENCE_HEADER_CODE => {
                let header = parse_sequence_header(&mut br)?;
                self.sequence = Some(SequenceContext::new(header, self.sequence.as_ref()));
            }
            EXTENSION_START_CODE => self.handle_extension(&mut br)?,
            USER_DATA_START_CODE => {
                let payload = &unit[PREFIX_LEN + 1..];
                match self.picture.as_mut() {
                    Some(p) => p.user_data.extend_from_slice(payload),
                    None => self.user_data.extend_from_slice(payload),
                }
            }
            GROUP_START_CODE => {
                let gop = parse_gop_header(&mut br)?;
                self.closed_gop = gop.closed_gop;
                self.broken_link = gop.broken_link;
                self.gop_references = 0;
            }
            PICTURE_START_CODE => {
                let header = parse_picture_header(&mut br)?;
                self.begin_picture(header)?;
            }
            SEQUENCE_END_CODE => self.end_sequence()?,
            SEQUENCE_ERROR_CODE => warn!("MPEG-2: 码流中出现 sequence_error_code"),
            _ => trace!("MPEG-2: 忽略起始码 0x{code:02X}"),
        }
        Ok(())
    }

    fn handle_extension(&mut self, br: &mut BitReader) -> TaoResult<()> {
        let ctx = ExtensionContext {
            progressive_sequence: self
                .sequence
                .as_ref()
                .and_then(|s| s.extension.as_ref())
                .is_some_and(|e| e.progressive_sequence),
            picture_coding: self.picture.as_ref().and_then(|p| p.coding.clone()),
        };
        let ext = parse_extension(br, &ctx)?;
        match ext {
            Extension::Sequence(ext) => self.apply_sequence_extension(ext)?,
            Extension::SequenceDisplay(ext) => {
                if let Some(seq) = self.sequence.as_mut() {
                    seq.display = Some(ext);
                }
            }
            Extension::SequenceScalable(ext) => {
                if ext.scalable_mode != ScalableMode::DataPartitioning {
                    warn!("MPEG-2: 仅解码基本层, 可分级模式 {:?}", ext.scalable_mode);
                }
                if let Some(seq) = self.sequence.as_mut() {
                    seq.scalable = Some(ext);
                }
            }
            Extension::QuantMatrix(ext) => {
                if let Some(seq) = self.sequence.as_mut() {
                    seq.matrices.apply_extension(&ext);
                }
            }
            Extension::PictureCoding(ext) => match self.picture.as_mut() {
                Some(p) => {
                    trace!(
                        "MPEG-2 图像编码扩展: {:?}, f_code={:?}, dc_precision={}",
                        ext.picture_structure, ext.f_code, ext.intra_dc_precision
                    );
                    p.coding = Some(ext);
                }
                None => warn!("MPEG-2: 图像编码扩展之前没有图像头"),
            },
            Extension::Copyright(ext) => trace!("MPEG-2 版权扩展: {ext:?}"),
            Extension::PictureDisplay(ext) => trace!("MPEG-2 图像显示扩展: {ext:?}"),
            Extension::PictureSpatialScalable(_) | Extension::PictureTemporalScalable(_) => {
                trace!("MPEG-2: 忽略增强层图像扩展");
            }
            Extension::Skipped(_) => {}
        }
        Ok(())
    }

    /// 序列扩展: 检查码流是否超出配置的帧池能力
    fn apply_sequence_extension(&mut self, ext: SequenceExtension) -> TaoResult<()> {
        let Some(seq) = self.sequence.as_mut() else {
            warn!("MPEG-2: 序列扩展之前没有序列头");
            return Ok(());
        };
        if ext.chroma_format != self.config.chroma_format {
            return Err(TaoError::Unsupported(format!(
                "码流色度格式 {:?} 与配置 {:?} 不一致",
                ext.chroma_format, self.config.chroma_format
            )));
        }
        seq.extension = Some(ext);
        let geometry = seq.geometry()?;
        let (max_width, max_height) = self.config.coded_size();
        if geometry.mb_width * 16 > max_width || geometry.mb_height * 16 > max_height {
            return Err(TaoError::Unsupported(format!(
                "码流尺寸 {}x{} 超出配置的帧池 {}x{}",
                seq.horizontal_size(),
                seq.vertical_size(),
                self.config.width,
                self.config.height
            )));
        }
        debug!(
            "MPEG-2 序列: {}x{}, {:?}, 逐行={}, 帧率={}",
            seq.horizontal_size(),
            seq.vertical_size(),
            geometry.chroma,
            seq.extension.as_ref().is_some_and(|e| e.progressive_sequence),
            seq.frame_rate()
        );
        Ok(())
    }

    // ========================================================================
    // 图像生命周期
    // ========================================================================

    fn begin_picture(&mut self, header: PictureHeader) -> TaoResult<()> {
        let state = match &self.sequence {
            None => {
                warn!("MPEG-2: 图像之前没有序列头, 已丢弃");
                PictureState::Dropped
            }
            Some(seq) if seq.extension.is_none() => {
                return Err(TaoError::Unsupported(
                    "缺少序列扩展, 不支持 MPEG-1 码流".into(),
                ));
            }
            Some(_) => PictureState::Collecting,
        };
        trace!(
            "MPEG-2 图像头: {:?}, tr={}",
            header.picture_coding_type, header.temporal_reference
        );
        self.picture = Some(PendingPicture {
            header,
            coding: None,
            user_data: std::mem::take(&mut self.user_data),
            state,
        });
        Ok(())
    }

    fn handle_slice(&mut self, unit: Bytes) -> TaoResult<()> {
        let Some(mut picture) = self.picture.take() else {
            trace!("MPEG-2: 条带不属于任何图像, 已忽略");
            return Ok(());
        };
        if matches!(picture.state, PictureState::Collecting) {
            match self.activate(&picture) {
                Ok(state) => picture.state = state,
                Err(e) => {
                    picture.state = PictureState::Dropped;
                    self.picture = Some(picture);
                    return Err(e);
                }
            }
        }
        if let PictureState::Active(active) = &picture.state {
            let task = SliceTask {
                data: unit,
                params: Arc::clone(&active.params),
                current: Arc::clone(&active.cell),
                forward: active.forward.clone(),
                backward: active.backward.clone(),
                kernel: Arc::clone(&self.kernel),
            };
            let added = self.scheduler.add_slice(active.id, task);
            if added.is_ok() {
                self.slices += 1;
            }
            self.picture = Some(picture);
            return added;
        }
        self.picture = Some(picture);
        Ok(())
    }

    /// 第一个条带到来: 选择参考, 分配槽位并构建图像参数
    fn activate(&mut self, picture: &PendingPicture) -> TaoResult<PictureState> {
        let Some(seq) = self.sequence.as_ref() else {
            return Ok(PictureState::Dropped);
        };
        let coding = picture
            .coding
            .as_ref()
            .ok_or_else(|| TaoError::InvalidData("图像缺少图像编码扩展".into()))?;
        let coding_type = picture.header.picture_coding_type;
        let structure = coding.picture_structure;
        let geometry = seq.geometry()?;

        let pairs = structure.is_field()
            && self.first_field.as_ref().is_some_and(|f| {
                f.parity != structure.parity()
                    && (f.coding_type == PictureCodingType::Bidirectional)
                        == (coding_type == PictureCodingType::Bidirectional)
            });
        let params = Arc::new(PictureParams::new(
            &geometry,
            coding_type,
            coding,
            &seq.matrices,
            pairs,
        ));
        let info = seq.picture_info(picture, coding, self.decode_index);
        let (coded_width, coded_height) = (geometry.mb_width * 16, geometry.mb_height * 16);

        if !pairs && let Some(first) = self.first_field.take() {
            warn!("MPEG-2: 场图像没有配对的第二场, 按单场帧输出");
            self.commit_frame(first.id, first.cell, first.coding_type)?;
        }

        let Some((forward, backward)) = self.select_references(coding_type, pairs) else {
            warn!(
                "MPEG-2: 缺少参考图像, 丢弃 {:?} 图像 (tr={})",
                coding_type, picture.header.temporal_reference
            );
            return Ok(PictureState::Dropped);
        };
        let first = if pairs { self.first_field.take() } else { None };
        if coding_type.is_reference()
            && first.is_none()
            && let Some(old) = self.refs[0].take()
        {
            // 新参考图像之后不会再有图像引用最早的参考
            self.scheduler.unhold(old.id)?;
        }

        let id = self.scheduler.create()?;
        let (cell, frame_type) = match &first {
            Some(first) => {
                self.scheduler.swap_payloads(first.id, id)?;
                self.scheduler.add_dependency(id, first.id)?;
                self.scheduler.release(first.id)?;
                (Arc::clone(&first.cell), first.coding_type)
            }
            None => {
                let cell = self.scheduler.payload(id)?;
                cell.write()?
                    .configure(coded_width, coded_height, geometry.chroma);
                cell.reset(info)?;
                self.decode_index += 1;
                (cell, coding_type)
            }
        };
        for r in forward.iter().chain(backward.iter()) {
            self.scheduler.add_dependency(id, r.id)?;
        }
        debug!(
            "MPEG-2 图像: {:?} {:?}, tr={}, 槽位={}, 第二场={}",
            coding_type,
            structure,
            picture.header.temporal_reference,
            id.slot(),
            first.is_some()
        );
        Ok(PictureState::Active(ActivePicture {
            id,
            cell,
            params,
            forward: forward.map(|r| r.cell),
            backward: backward.map(|r| r.cell),
            frame_type,
            structure,
            second_field: first.is_some(),
        }))
    }

    /// 按编码类型从参考窗口取 `(前向, 后向)`; 无法解码时返回 None
    fn select_references(
        &self,
        coding_type: PictureCodingType,
        second_field: bool,
    ) -> Option<(Option<RefFrame>, Option<RefFrame>)> {
        match coding_type {
            PictureCodingType::Intra => Some((None, None)),
            PictureCodingType::Predicted => match &self.refs[1] {
                Some(r) => Some((Some(r.clone()), None)),
                // I/P 场对的 P 场只能引用同帧的第一场
                None if second_field => Some((None, None)),
                None => None,
            },
            PictureCodingType::Bidirectional => {
                let backward = self.refs[1].clone()?;
                let leading = self.gop_references < 2;
                if leading && self.broken_link {
                    return None;
                }
                let forward = if leading && self.closed_gop {
                    Some(backward.clone())
                } else {
                    self.refs[0].clone()
                }?;
                Some((Some(forward), Some(backward)))
            }
        }
    }

    /// 当前图像的条带已全部加入: 提交给调度器
    fn finish_picture(&mut self) -> TaoResult<()> {
        let Some(picture) = self.picture.take() else {
            return Ok(());
        };
        match picture.state {
            PictureState::Active(active) => {
                self.scheduler.submit(active.id)?;
                if active.structure.is_field() && !active.second_field {
                    self.first_field = Some(FirstField {
                        id: active.id,
                        cell: active.cell,
                        coding_type: active.frame_type,
                        parity: active.structure.parity(),
                    });
                    return Ok(());
                }
                self.commit_frame(active.id, active.cell, active.frame_type)
            }
            PictureState::Collecting => {
                warn!(
                    "MPEG-2: 图像没有任何条带, 已丢弃 (tr={})",
                    picture.header.temporal_reference
                );
                Ok(())
            }
            PictureState::Dropped => Ok(()),
        }
    }

    /// 完整的帧进入输出队列与参考窗口
    fn commit_frame(
        &mut self,
        id: PictureId,
        cell: Arc<FrameCell>,
        frame_type: PictureCodingType,
    ) -> TaoResult<()> {
        let reference = frame_type.is_reference();
        if !self.config.reorder || !reference {
            self.scheduler.enqueue_output(id)?;
        }
        if reference {
            if self.config.reorder
                && let Some(previous) = &self.refs[1]
            {
                self.scheduler.enqueue_output(previous.id)?;
            }
            if let Some(old) = self.refs[0].take() {
                self.scheduler.unhold(old.id)?;
            }
            self.scheduler.hold(id)?;
            self.refs[0] = self.refs[1].take();
            self.refs[1] = Some(RefFrame { id, cell });
            self.gop_references = self.gop_references.saturating_add(1);
        }
        Ok(())
    }

    /// 序列结束: 输出保留的参考图像并清空参考窗口
    fn end_sequence(&mut self) -> TaoResult<()> {
        if let Some(first) = self.first_field.take() {
            warn!("MPEG-2: 序列结束时第一场没有配对, 按单场帧输出");
            self.commit_frame(first.id, first.cell, first.coding_type)?;
        }
        if self.config.reorder
            && let Some(last) = &self.refs[1]
        {
            self.scheduler.enqueue_output(last.id)?;
        }
        for r in &mut self.refs {
            if let Some(r) = r.take() {
                self.scheduler.unhold(r.id)?;
            }
        }
        trace!("MPEG-2: 序列结束");
        Ok(())
    }
}

impl Drop for Mpeg2Decoder {
    fn drop(&mut self) {
        if self.output.is_none() && self.workers.is_empty() {
            return;
        }
        let drained = self.drain();
        if let Err(e) = &drained {
            warn!("MPEG-2: 丢弃解码器时排空失败: {e}");
        }
        if let Err(e) = self.shutdown(drained.is_ok()) {
            warn!("MPEG-2: 停止解码线程失败: {e}");
        }
    }
}
