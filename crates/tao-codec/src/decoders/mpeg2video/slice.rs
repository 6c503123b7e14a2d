//! 图像级解码参数与条带任务
//!
//! 图像的第一个条带到来时构建 [`PictureParams`]: 有效量化矩阵 (转为扫描顺序),
//! 宏块例程与几何参数. 每个条带封装为一个 [`SliceTask`], 由工作线程独立执行.

use std::sync::Arc;

use bytes::Bytes;
use log::{trace, warn};
use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::frame_buffer::FrameCell;
use super::header::{PictureCodingExtension, QuantMatrixExtension, SequenceHeader};
use super::kernel::PixelKernel;
use super::macroblock::{MacroblockRoutine, References, SliceDecoder};
use super::tables::{DEFAULT_INTRA_MATRIX, DEFAULT_NON_INTRA_MATRIX, to_scan_order};
use super::types::{ChromaFormat, PictureCodingType};

// ============================================================================
// 量化矩阵
// ============================================================================

/// 当前生效的四个量化矩阵 (自然顺序)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantMatrices {
    pub intra: [u8; 64],
    pub non_intra: [u8; 64],
    pub chroma_intra: [u8; 64],
    pub chroma_non_intra: [u8; 64],
}

impl Default for QuantMatrices {
    fn default() -> Self {
        Self {
            intra: DEFAULT_INTRA_MATRIX,
            non_intra: DEFAULT_NON_INTRA_MATRIX,
            chroma_intra: DEFAULT_INTRA_MATRIX,
            chroma_non_intra: DEFAULT_NON_INTRA_MATRIX,
        }
    }
}

impl QuantMatrices {
    /// 序列头重置全部矩阵, 色度矩阵跟随亮度矩阵
    pub fn load_sequence_header(&mut self, header: &SequenceHeader) {
        self.intra = header.intra_quantiser_matrix.unwrap_or(DEFAULT_INTRA_MATRIX);
        self.non_intra = header
            .non_intra_quantiser_matrix
            .unwrap_or(DEFAULT_NON_INTRA_MATRIX);
        self.chroma_intra = self.intra;
        self.chroma_non_intra = self.non_intra;
    }

    /// 量化矩阵扩展: 亮度矩阵同时覆盖对应的色度矩阵
    pub fn apply_extension(&mut self, ext: &QuantMatrixExtension) {
        if let Some(m) = ext.intra {
            self.intra = m;
            self.chroma_intra = m;
        }
        if let Some(m) = ext.non_intra {
            self.non_intra = m;
            self.chroma_non_intra = m;
        }
        if let Some(m) = ext.chroma_intra {
            self.chroma_intra = m;
        }
        if let Some(m) = ext.chroma_non_intra {
            self.chroma_non_intra = m;
        }
    }

    fn scan_weights(&self, scan: &[u8; 64]) -> QuantWeights {
        QuantWeights {
            intra: to_scan_order(&self.intra, scan),
            non_intra: to_scan_order(&self.non_intra, scan),
            chroma_intra: to_scan_order(&self.chroma_intra, scan),
            chroma_non_intra: to_scan_order(&self.chroma_non_intra, scan),
        }
    }
}

/// 扫描顺序的量化权重
#[derive(Debug, Clone)]
pub(super) struct QuantWeights {
    pub intra: [u8; 64],
    pub non_intra: [u8; 64],
    pub chroma_intra: [u8; 64],
    pub chroma_non_intra: [u8; 64],
}

// ============================================================================
// 图像参数
// ============================================================================

/// 构建 [`PictureParams`] 所需的序列级信息
pub(super) struct SequenceGeometry {
    pub mb_width: usize,
    /// 帧的宏块行数
    pub mb_height: usize,
    pub vertical_size: u32,
    pub chroma: ChromaFormat,
    pub data_partitioning: bool,
}

/// 一幅图像所有条带共享的只读参数
#[derive(Debug)]
pub(super) struct PictureParams {
    pub routine: MacroblockRoutine,
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    pub top_field_first: bool,
    /// 场对中的第二场
    pub second_field: bool,
    pub mb_width: usize,
    /// 本图像的宏块行数 (场图像为帧的一半)
    pub mb_rows: usize,
    pub vertical_size: u32,
    pub data_partitioning: bool,
    pub weights: QuantWeights,
}

impl PictureParams {
    pub(super) fn new(
        geometry: &SequenceGeometry,
        coding_type: PictureCodingType,
        ext: &PictureCodingExtension,
        matrices: &QuantMatrices,
        second_field: bool,
    ) -> Self {
        let routine = MacroblockRoutine::select(coding_type, ext, geometry.chroma);
        let mb_rows = if ext.picture_structure.is_field() {
            geometry.mb_height / 2
        } else {
            geometry.mb_height
        };
        Self {
            weights: matrices.scan_weights(routine.scan),
            routine,
            f_code: ext.f_code,
            intra_dc_precision: ext.intra_dc_precision.min(3),
            top_field_first: ext.top_field_first,
            second_field,
            mb_width: geometry.mb_width,
            mb_rows,
            vertical_size: geometry.vertical_size,
            data_partitioning: geometry.data_partitioning,
        }
    }
}

// ============================================================================
// 条带
// ============================================================================

/// 条带头
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SliceHeader {
    pub mb_row: usize,
    pub quantiser_scale_code: u32,
    pub intra_slice: bool,
    pub priority_breakpoint: Option<u8>,
}

/// 解析条带头, `br` 位于起始码之后
pub(super) fn parse_slice_header(
    br: &mut BitReader,
    start_code: u8,
    params: &PictureParams,
) -> TaoResult<SliceHeader> {
    let mut mb_row = usize::from(start_code).saturating_sub(1);
    if params.vertical_size > 2800 {
        mb_row += (br.read_bits(3)? as usize) << 7;
    }
    let priority_breakpoint = if params.data_partitioning {
        Some(br.read_bits(7)? as u8)
    } else {
        None
    };
    let quantiser_scale_code = br.read_bits(5)?;
    let mut intra_slice = false;
    if br.read_flag()? {
        intra_slice = br.read_flag()?;
        br.read_bits(7)?;
        while br.read_flag()? {
            br.read_bits(8)?;
        }
    }
    if mb_row >= params.mb_rows {
        return Err(TaoError::InvalidData(format!(
            "条带行号越界: {mb_row} >= {}",
            params.mb_rows
        )));
    }
    Ok(SliceHeader {
        mb_row,
        quantiser_scale_code,
        intra_slice,
        priority_breakpoint,
    })
}

/// 可由任意工作线程执行的条带解码任务
pub(super) struct SliceTask {
    /// 含 4 字节起始码的条带单元
    pub data: Bytes,
    pub params: Arc<PictureParams>,
    pub current: Arc<FrameCell>,
    pub forward: Option<Arc<FrameCell>>,
    pub backward: Option<Arc<FrameCell>>,
    pub kernel: Arc<dyn PixelKernel>,
}

impl SliceTask {
    /// 解码条带并把完成的宏块提交到当前图像
    pub(super) fn run(&self) -> TaoResult<()> {
        if self.data.len() < 4 {
            return Err(TaoError::InvalidData("条带单元过短".into()));
        }
        let start_code = self.data[3];
        let mut br = BitReader::new(&self.data[4..]);
        let header = parse_slice_header(&mut br, start_code, &self.params)?;
        trace!(
            "MPEG-2: 条带 行={}, qscale_code={}, intra_slice={}",
            header.mb_row, header.quantiser_scale_code, header.intra_slice
        );

        let refs = References {
            current: &self.current,
            forward: self.forward.as_deref(),
            backward: self.backward.as_deref(),
        };
        let mut decoder = SliceDecoder::new(
            br,
            &self.params,
            refs,
            self.kernel.as_ref(),
            header.mb_row,
            header.quantiser_scale_code,
        );
        let mut decoded = 0..0;
        let result = decoder.run(&mut decoded);
        if !decoded.is_empty() {
            let mut buffer = self.current.write()?;
            decoder.strip().commit(
                &mut buffer,
                header.mb_row,
                self.params.routine.structure,
                decoded,
            );
        }
        result
    }

    /// 执行并把结果计入当前图像的条带统计
    pub(super) fn execute(self) {
        let result = self.run();
        if let Err(e) = &result {
            warn!("MPEG-2: 条带解码失败, 已放弃该条带: {e}");
        }
        self.current.record_slice(result.is_ok());
    }
}
