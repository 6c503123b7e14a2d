//! MPEG-2 头部解析
//!
//! 每个函数接收定位在起始码之后的 `BitReader`, 消耗该语法单元定义的全部位,
//! 并在返回前对齐到字节边界. 字段截断返回 `TaoError::InvalidData`.

use log::{debug, warn};
use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::tables::ZIGZAG_SCAN;
use super::types::{ChromaFormat, PictureCodingType, PictureStructure};

// ============================================================================
// 起始码
// ============================================================================

/// 图像起始码
pub const PICTURE_START_CODE: u8 = 0x00;
/// slice 起始码范围下界
pub const SLICE_START_CODE_MIN: u8 = 0x01;
/// slice 起始码范围上界
pub const SLICE_START_CODE_MAX: u8 = 0xAF;
/// 用户数据起始码
pub const USER_DATA_START_CODE: u8 = 0xB2;
/// 序列头起始码
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
/// 序列错误码
pub const SEQUENCE_ERROR_CODE: u8 = 0xB4;
/// 扩展起始码
pub const EXTENSION_START_CODE: u8 = 0xB5;
/// 序列结束码
pub const SEQUENCE_END_CODE: u8 = 0xB7;
/// GOP 起始码
pub const GROUP_START_CODE: u8 = 0xB8;

fn marker(br: &mut BitReader, what: &str) -> TaoResult<()> {
    if !br.read_flag()? {
        warn!("MPEG-2: {what} 标记位为 0, 继续解析");
    }
    Ok(())
}

/// 读取 zigzag 顺序传输的量化矩阵, 返回自然顺序
fn read_quant_matrix(br: &mut BitReader) -> TaoResult<[u8; 64]> {
    let mut natural = [0u8; 64];
    for &pos in ZIGZAG_SCAN.iter() {
        let v = br.read_bits(8)? as u8;
        if v == 0 {
            return Err(TaoError::InvalidData("量化矩阵元素不能为 0".into()));
        }
        natural[pos as usize] = v;
    }
    Ok(natural)
}

// ============================================================================
// 序列层
// ============================================================================

/// 序列头
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    pub horizontal_size_value: u32,
    pub vertical_size_value: u32,
    pub aspect_ratio_information: u8,
    pub frame_rate_code: u8,
    pub bit_rate_value: u32,
    pub vbv_buffer_size_value: u32,
    pub constrained_parameters_flag: bool,
    /// 自然顺序; None 表示使用默认矩阵
    pub intra_quantiser_matrix: Option<[u8; 64]>,
    pub non_intra_quantiser_matrix: Option<[u8; 64]>,
}

/// 解析序列头
pub fn parse_sequence_header(br: &mut BitReader) -> TaoResult<SequenceHeader> {
    let horizontal_size_value = br.read_bits(12)?;
    let vertical_size_value = br.read_bits(12)?;
    let aspect_ratio_information = br.read_bits(4)? as u8;
    let frame_rate_code = br.read_bits(4)? as u8;
    let bit_rate_value = br.read_bits(18)?;
    marker(br, "sequence_header")?;
    let vbv_buffer_size_value = br.read_bits(10)?;
    let constrained_parameters_flag = br.read_flag()?;
    let intra_quantiser_matrix = if br.read_flag()? {
        Some(read_quant_matrix(br)?)
    } else {
        None
    };
    let non_intra_quantiser_matrix = if br.read_flag()? {
        Some(read_quant_matrix(br)?)
    } else {
        None
    };
    br.align_to_byte();

    if horizontal_size_value == 0 || vertical_size_value == 0 {
        return Err(TaoError::InvalidData(format!(
            "序列头尺寸无效: {horizontal_size_value}x{vertical_size_value}"
        )));
    }
    debug!(
        "MPEG-2 序列头: {}x{}, aspect={}, frame_rate_code={}",
        horizontal_size_value, vertical_size_value, aspect_ratio_information, frame_rate_code
    );
    Ok(SequenceHeader {
        horizontal_size_value,
        vertical_size_value,
        aspect_ratio_information,
        frame_rate_code,
        bit_rate_value,
        vbv_buffer_size_value,
        constrained_parameters_flag,
        intra_quantiser_matrix,
        non_intra_quantiser_matrix,
    })
}

/// 序列扩展
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceExtension {
    pub profile_and_level_indication: u8,
    pub progressive_sequence: bool,
    pub chroma_format: ChromaFormat,
    pub horizontal_size_extension: u32,
    pub vertical_size_extension: u32,
    pub bit_rate_extension: u32,
    pub vbv_buffer_size_extension: u32,
    pub low_delay: bool,
    pub frame_rate_extension_n: u8,
    pub frame_rate_extension_d: u8,
}

fn parse_sequence_extension(br: &mut BitReader) -> TaoResult<SequenceExtension> {
    let profile_and_level_indication = br.read_bits(8)? as u8;
    let progressive_sequence = br.read_flag()?;
    let chroma_code = br.read_bits(2)?;
    let chroma_format = ChromaFormat::from_code(chroma_code)
        .ok_or_else(|| TaoError::InvalidData(format!("保留的色度格式: {chroma_code}")))?;
    let horizontal_size_extension = br.read_bits(2)?;
    let vertical_size_extension = br.read_bits(2)?;
    let bit_rate_extension = br.read_bits(12)?;
    marker(br, "sequence_extension")?;
    let vbv_buffer_size_extension = br.read_bits(8)?;
    let low_delay = br.read_flag()?;
    let frame_rate_extension_n = br.read_bits(2)? as u8;
    let frame_rate_extension_d = br.read_bits(5)? as u8;
    Ok(SequenceExtension {
        profile_and_level_indication,
        progressive_sequence,
        chroma_format,
        horizontal_size_extension,
        vertical_size_extension,
        bit_rate_extension,
        vbv_buffer_size_extension,
        low_delay,
        frame_rate_extension_n,
        frame_rate_extension_d,
    })
}

/// 颜色描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

/// 序列显示扩展
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDisplayExtension {
    pub video_format: u8,
    pub colour_description: Option<ColourDescription>,
    pub display_horizontal_size: u32,
    pub display_vertical_size: u32,
}

fn parse_sequence_display_extension(br: &mut BitReader) -> TaoResult<SequenceDisplayExtension> {
    let video_format = br.read_bits(3)? as u8;
    let colour_description = if br.read_flag()? {
        Some(ColourDescription {
            colour_primaries: br.read_bits(8)? as u8,
            transfer_characteristics: br.read_bits(8)? as u8,
            matrix_coefficients: br.read_bits(8)? as u8,
        })
    } else {
        None
    };
    let display_horizontal_size = br.read_bits(14)?;
    marker(br, "sequence_display_extension")?;
    let display_vertical_size = br.read_bits(14)?;
    Ok(SequenceDisplayExtension {
        video_format,
        colour_description,
        display_horizontal_size,
        display_vertical_size,
    })
}

/// 可分级模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalableMode {
    DataPartitioning,
    Spatial,
    Snr,
    Temporal,
}

/// 序列可分级扩展
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceScalableExtension {
    pub scalable_mode: ScalableMode,
    pub layer_id: u8,
    /// 空间可分级参数: 下层尺寸与上/下采样因子 `(h, v, hm, hn, vm, vn)`
    pub spatial: Option<(u32, u32, u8, u8, u8, u8)>,
    /// 时间可分级参数: `(mux_to_progressive_sequence, picture_mux_order, picture_mux_factor)`
    pub temporal: Option<(Option<bool>, u8, u8)>,
}

fn parse_sequence_scalable_extension(br: &mut BitReader) -> TaoResult<SequenceScalableExtension> {
    let scalable_mode = match br.read_bits(2)? {
        0 => ScalableMode::DataPartitioning,
        1 => ScalableMode::Spatial,
        2 => ScalableMode::Snr,
        _ => ScalableMode::Temporal,
    };
    let layer_id = br.read_bits(4)? as u8;
    let mut spatial = None;
    let mut temporal = None;
    match scalable_mode {
        ScalableMode::Spatial => {
            let h = br.read_bits(14)?;
            marker(br, "sequence_scalable_extension")?;
            let v = br.read_bits(14)?;
            let hm = br.read_bits(5)? as u8;
            let hn = br.read_bits(5)? as u8;
            let vm = br.read_bits(5)? as u8;
            let vn = br.read_bits(5)? as u8;
            spatial = Some((h, v, hm, hn, vm, vn));
        }
        ScalableMode::Temporal => {
            let mux_to_progressive = if br.read_flag()? {
                Some(br.read_flag()?)
            } else {
                None
            };
            let order = br.read_bits(3)? as u8;
            let factor = br.read_bits(3)? as u8;
            temporal = Some((mux_to_progressive, order, factor));
        }
        _ => {}
    }
    Ok(SequenceScalableExtension {
        scalable_mode,
        layer_id,
        spatial,
        temporal,
    })
}

/// 量化矩阵扩展 (自然顺序)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuantMatrixExtension {
    pub intra: Option<[u8; 64]>,
    pub non_intra: Option<[u8; 64]>,
    pub chroma_intra: Option<[u8; 64]>,
    pub chroma_non_intra: Option<[u8; 64]>,
}

fn parse_quant_matrix_extension(br: &mut BitReader) -> TaoResult<QuantMatrixExtension> {
    let mut ext = QuantMatrixExtension::default();
    for slot in [
        &mut ext.intra,
        &mut ext.non_intra,
        &mut ext.chroma_intra,
        &mut ext.chroma_non_intra,
    ] {
        if br.read_flag()? {
            *slot = Some(read_quant_matrix(br)?);
        }
    }
    Ok(ext)
}

/// 版权扩展
#[derive(Debug, Clone, PartialEq)]
pub struct CopyrightExtension {
    pub copyright_flag: bool,
    pub copyright_identifier: u8,
    pub original_or_copy: bool,
    /// 64 位版权号 (20 + 22 + 22 位拼接)
    pub copyright_number: u64,
}

fn parse_copyright_extension(br: &mut BitReader) -> TaoResult<CopyrightExtension> {
    let copyright_flag = br.read_flag()?;
    let copyright_identifier = br.read_bits(8)? as u8;
    let original_or_copy = br.read_flag()?;
    br.read_bits(7)?;
    marker(br, "copyright_extension")?;
    let n1 = u64::from(br.read_bits(20)?);
    marker(br, "copyright_extension")?;
    let n2 = u64::from(br.read_bits(22)?);
    marker(br, "copyright_extension")?;
    let n3 = u64::from(br.read_bits(22)?);
    Ok(CopyrightExtension {
        copyright_flag,
        copyright_identifier,
        original_or_copy,
        copyright_number: (n1 << 44) | (n2 << 22) | n3,
    })
}

// ============================================================================
// GOP 与图像层
// ============================================================================

/// 时间码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeCode {
    pub drop_frame: bool,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub pictures: u8,
}

/// GOP 头
#[derive(Debug, Clone, PartialEq)]
pub struct GopHeader {
    pub time_code: TimeCode,
    pub closed_gop: bool,
    pub broken_link: bool,
}

/// 解析 GOP 头
pub fn parse_gop_header(br: &mut BitReader) -> TaoResult<GopHeader> {
    let drop_frame = br.read_flag()?;
    let hours = br.read_bits(5)? as u8;
    let minutes = br.read_bits(6)? as u8;
    marker(br, "time_code")?;
    let seconds = br.read_bits(6)? as u8;
    let pictures = br.read_bits(6)? as u8;
    let closed_gop = br.read_flag()?;
    let broken_link = br.read_flag()?;
    br.align_to_byte();
    debug!(
        "MPEG-2 GOP: {:02}:{:02}:{:02}.{:02}, closed={}, broken={}",
        hours, minutes, seconds, pictures, closed_gop, broken_link
    );
    Ok(GopHeader {
        time_code: TimeCode {
            drop_frame,
            hours,
            minutes,
            seconds,
            pictures,
        },
        closed_gop,
        broken_link,
    })
}

/// 图像头
#[derive(Debug, Clone, PartialEq)]
pub struct PictureHeader {
    pub temporal_reference: u16,
    pub picture_coding_type: PictureCodingType,
    pub vbv_delay: u16,
    pub full_pel_forward_vector: bool,
    pub forward_f_code: u8,
    pub full_pel_backward_vector: bool,
    pub backward_f_code: u8,
    pub extra_information: Vec<u8>,
}

/// 解析图像头
pub fn parse_picture_header(br: &mut BitReader) -> TaoResult<PictureHeader> {
    let temporal_reference = br.read_bits(10)? as u16;
    let type_code = br.read_bits(3)?;
    let picture_coding_type = PictureCodingType::from_code(type_code).ok_or_else(|| {
        TaoError::Unsupported(format!("不支持的图像编码类型: {type_code}"))
    })?;
    let vbv_delay = br.read_bits(16)? as u16;
    let mut header = PictureHeader {
        temporal_reference,
        picture_coding_type,
        vbv_delay,
        full_pel_forward_vector: false,
        forward_f_code: 0,
        full_pel_backward_vector: false,
        backward_f_code: 0,
        extra_information: Vec::new(),
    };
    if picture_coding_type != PictureCodingType::Intra {
        header.full_pel_forward_vector = br.read_flag()?;
        header.forward_f_code = br.read_bits(3)? as u8;
    }
    if picture_coding_type == PictureCodingType::Bidirectional {
        header.full_pel_backward_vector = br.read_flag()?;
        header.backward_f_code = br.read_bits(3)? as u8;
    }
    while br.read_flag()? {
        header.extra_information.push(br.read_bits(8)? as u8);
    }
    br.align_to_byte();
    Ok(header)
}

/// 复合显示参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeDisplay {
    pub v_axis: bool,
    pub field_sequence: u8,
    pub sub_carrier: bool,
    pub burst_amplitude: u8,
    pub sub_carrier_phase: u8,
}

/// 图像编码扩展
#[derive(Debug, Clone, PartialEq)]
pub struct PictureCodingExtension {
    /// `f_code[s][t]`: s=0 前向, 1 后向; t=0 水平, 1 垂直
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    pub picture_structure: PictureStructure,
    pub top_field_first: bool,
    pub frame_pred_frame_dct: bool,
    pub concealment_motion_vectors: bool,
    pub q_scale_type: bool,
    pub intra_vlc_format: bool,
    pub alternate_scan: bool,
    pub repeat_first_field: bool,
    pub chroma_420_type: bool,
    pub progressive_frame: bool,
    pub composite_display: Option<CompositeDisplay>,
}

fn parse_picture_coding_extension(br: &mut BitReader) -> TaoResult<PictureCodingExtension> {
    let mut f_code = [[0u8; 2]; 2];
    for dir in f_code.iter_mut() {
        for comp in dir.iter_mut() {
            *comp = br.read_bits(4)? as u8;
        }
    }
    let intra_dc_precision = br.read_bits(2)? as u8;
    let structure_code = br.read_bits(2)?;
    let picture_structure = PictureStructure::from_code(structure_code)
        .ok_or_else(|| TaoError::InvalidData("保留的 picture_structure: 0".into()))?;
    let top_field_first = br.read_flag()?;
    let frame_pred_frame_dct = br.read_flag()?;
    let concealment_motion_vectors = br.read_flag()?;
    let q_scale_type = br.read_flag()?;
    let intra_vlc_format = br.read_flag()?;
    let alternate_scan = br.read_flag()?;
    let repeat_first_field = br.read_flag()?;
    let chroma_420_type = br.read_flag()?;
    let progressive_frame = br.read_flag()?;
    let composite_display = if br.read_flag()? {
        Some(CompositeDisplay {
            v_axis: br.read_flag()?,
            field_sequence: br.read_bits(3)? as u8,
            sub_carrier: br.read_flag()?,
            burst_amplitude: br.read_bits(7)? as u8,
            sub_carrier_phase: br.read_bits(8)? as u8,
        })
    } else {
        None
    };
    Ok(PictureCodingExtension {
        f_code,
        intra_dc_precision,
        picture_structure,
        top_field_first,
        frame_pred_frame_dct,
        concealment_motion_vectors,
        q_scale_type,
        intra_vlc_format,
        alternate_scan,
        repeat_first_field,
        chroma_420_type,
        progressive_frame,
        composite_display,
    })
}

/// 图像显示扩展
#[derive(Debug, Clone, PartialEq)]
pub struct PictureDisplayExtension {
    /// 帧中心偏移 `(水平, 垂直)`, 单位 1/16 像素
    pub frame_centre_offsets: Vec<(i16, i16)>,
}

fn parse_picture_display_extension(
    br: &mut BitReader,
    ctx: &ExtensionContext,
) -> TaoResult<PictureDisplayExtension> {
    let pce = ctx.picture_coding.as_ref().ok_or_else(|| {
        TaoError::InvalidData("图像显示扩展出现在图像编码扩展之前".into())
    })?;
    let count = if ctx.progressive_sequence {
        match (pce.repeat_first_field, pce.top_field_first) {
            (true, true) => 3,
            (true, false) => 2,
            _ => 1,
        }
    } else if pce.picture_structure.is_field() {
        1
    } else if pce.repeat_first_field {
        3
    } else {
        2
    };
    let mut frame_centre_offsets = Vec::with_capacity(count);
    for _ in 0..count {
        let h = br.read_signed(16)? as i16;
        marker(br, "picture_display_extension")?;
        let v = br.read_signed(16)? as i16;
        marker(br, "picture_display_extension")?;
        frame_centre_offsets.push((h, v));
    }
    Ok(PictureDisplayExtension {
        frame_centre_offsets,
    })
}

/// 图像空间可分级扩展
#[derive(Debug, Clone, PartialEq)]
pub struct PictureSpatialScalableExtension {
    pub lower_layer_temporal_reference: u16,
    pub lower_layer_horizontal_offset: i16,
    pub lower_layer_vertical_offset: i16,
    pub spatial_temporal_weight_code_table_index: u8,
    pub lower_layer_progressive_frame: bool,
    pub lower_layer_deinterlaced_field_select: bool,
}

fn parse_picture_spatial_scalable_extension(
    br: &mut BitReader,
) -> TaoResult<PictureSpatialScalableExtension> {
    let lower_layer_temporal_reference = br.read_bits(10)? as u16;
    marker(br, "picture_spatial_scalable_extension")?;
    let lower_layer_horizontal_offset = br.read_signed(15)? as i16;
    marker(br, "picture_spatial_scalable_extension")?;
    let lower_layer_vertical_offset = br.read_signed(15)? as i16;
    Ok(PictureSpatialScalableExtension {
        lower_layer_temporal_reference,
        lower_layer_horizontal_offset,
        lower_layer_vertical_offset,
        spatial_temporal_weight_code_table_index: br.read_bits(2)? as u8,
        lower_layer_progressive_frame: br.read_flag()?,
        lower_layer_deinterlaced_field_select: br.read_flag()?,
    })
}

/// 图像时间可分级扩展
#[derive(Debug, Clone, PartialEq)]
pub struct PictureTemporalScalableExtension {
    pub reference_select_code: u8,
    pub forward_temporal_reference: u16,
    pub backward_temporal_reference: u16,
}

fn parse_picture_temporal_scalable_extension(
    br: &mut BitReader,
) -> TaoResult<PictureTemporalScalableExtension> {
    let reference_select_code = br.read_bits(2)? as u8;
    let forward_temporal_reference = br.read_bits(10)? as u16;
    marker(br, "picture_temporal_scalable_extension")?;
    let backward_temporal_reference = br.read_bits(10)? as u16;
    Ok(PictureTemporalScalableExtension {
        reference_select_code,
        forward_temporal_reference,
        backward_temporal_reference,
    })
}

// ============================================================================
// 扩展分发
// ============================================================================

/// 扩展单元
#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    Sequence(SequenceExtension),
    SequenceDisplay(SequenceDisplayExtension),
    QuantMatrix(QuantMatrixExtension),
    Copyright(CopyrightExtension),
    SequenceScalable(SequenceScalableExtension),
    PictureDisplay(PictureDisplayExtension),
    PictureCoding(PictureCodingExtension),
    PictureSpatialScalable(PictureSpatialScalableExtension),
    PictureTemporalScalable(PictureTemporalScalableExtension),
    /// 已识别但不处理的扩展 (摄像机参数, ITU-T 扩展, 保留值)
    Skipped(u8),
}

/// 解析扩展时需要的上下文
#[derive(Debug, Clone, Default)]
pub struct ExtensionContext {
    pub progressive_sequence: bool,
    pub picture_coding: Option<PictureCodingExtension>,
}

/// 解析扩展单元 (4 位 extension_start_code_identifier 之后的内容)
pub fn parse_extension(br: &mut BitReader, ctx: &ExtensionContext) -> TaoResult<Extension> {
    let id = br.read_bits(4)? as u8;
    let ext = match id {
        1 => Extension::Sequence(parse_sequence_extension(br)?),
        2 => Extension::SequenceDisplay(parse_sequence_display_extension(br)?),
        3 => Extension::QuantMatrix(parse_quant_matrix_extension(br)?),
        4 => Extension::Copyright(parse_copyright_extension(br)?),
        5 => Extension::SequenceScalable(parse_sequence_scalable_extension(br)?),
        7 => Extension::PictureDisplay(parse_picture_display_extension(br, ctx)?),
        8 => Extension::PictureCoding(parse_picture_coding_extension(br)?),
        9 => Extension::PictureSpatialScalable(parse_picture_spatial_scalable_extension(br)?),
        10 => Extension::PictureTemporalScalable(parse_picture_temporal_scalable_extension(br)?),
        _ => {
            warn!("MPEG-2: 跳过不支持的扩展, id={id}");
            return Ok(Extension::Skipped(id));
        }
    };
    br.align_to_byte();
    Ok(ext)
}
