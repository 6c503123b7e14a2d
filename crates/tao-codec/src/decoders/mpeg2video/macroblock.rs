//! 宏块解码状态机
//!
//! 每个条带由一个 [`SliceDecoder`] 顺序解码: 地址增量 -> 模式 -> 量化尺度 -> 运动向量
//! -> 预测器传播 -> 运动补偿 -> 系数解码与重建. 运动向量预测器与 DC 预测器只在
//! 条带内传递.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::block::{BlockQuant, IntraBlockFn, parse_intra_block, parse_non_intra_block};
use super::frame_buffer::{FrameCell, SliceStrip};
use super::header::PictureCodingExtension;
use super::idct::{idct_add, idct_put};
use super::kernel::PixelKernel;
use super::motion::{
    PredictionArea, PredictionSource, decode_motion_component, dual_prime_field,
    dual_prime_frame, predict_area,
};
use super::slice::PictureParams;
use super::tables::{ALTERNATE_SCAN, ZIGZAG_SCAN, linear_qscale, non_linear_qscale};
use super::types::{
    ChromaFormat, MacroblockType, MotionVector, PictureCodingType, PictureStructure,
    PredictionType,
};
use super::vlc::{
    decode_coded_block_pattern, decode_dc_size, decode_dmvector, decode_macroblock_type,
    decode_mb_address_increment,
};

// ============================================================================
// 图像级宏块例程
// ============================================================================

/// 按图像选定的宏块解码能力
///
/// 在图像初始化时由编码类型, 图像结构, frame_pred_frame_dct, 隐藏向量, 色度格式,
/// q_scale_type 与 alternate_scan 七个维度一次确定, 宏块循环中不再重复判断.
#[derive(Clone, Copy)]
pub(super) struct MacroblockRoutine {
    pub coding_type: PictureCodingType,
    pub structure: PictureStructure,
    pub frame_pred_frame_dct: bool,
    pub concealment_vectors: bool,
    pub chroma: ChromaFormat,
    /// 帧内块系数解码 (B-14 或 B-15 表)
    pub intra_block: IntraBlockFn,
    pub scan: &'static [u8; 64],
    pub qscale: fn(u32) -> i32,
}

impl MacroblockRoutine {
    pub(super) fn select(
        coding_type: PictureCodingType,
        ext: &PictureCodingExtension,
        chroma: ChromaFormat,
    ) -> Self {
        let intra_block: IntraBlockFn = if ext.intra_vlc_format {
            parse_intra_block::<true>
        } else {
            parse_intra_block::<false>
        };
        Self {
            coding_type,
            structure: ext.picture_structure,
            frame_pred_frame_dct: ext.frame_pred_frame_dct,
            concealment_vectors: ext.concealment_motion_vectors,
            chroma,
            intra_block,
            scan: if ext.alternate_scan {
                &ALTERNATE_SCAN
            } else {
                &ZIGZAG_SCAN
            },
            qscale: if ext.q_scale_type {
                non_linear_qscale
            } else {
                linear_qscale
            },
        }
    }

    fn is_frame(&self) -> bool {
        self.structure == PictureStructure::Frame
    }

    /// 未显式给出运动类型时的预测方式
    fn default_prediction(&self) -> PredictionType {
        if self.is_frame() {
            PredictionType::Frame
        } else {
            PredictionType::Field
        }
    }
}

impl std::fmt::Debug for MacroblockRoutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacroblockRoutine")
            .field("coding_type", &self.coding_type)
            .field("structure", &self.structure)
            .field("frame_pred_frame_dct", &self.frame_pred_frame_dct)
            .field("concealment_vectors", &self.concealment_vectors)
            .field("chroma", &self.chroma)
            .field("alternate_scan", &std::ptr::eq(self.scan, &ALTERNATE_SCAN))
            .finish()
    }
}

// ============================================================================
// 条带解码
// ============================================================================

/// 运动补偿使用的帧单元
#[derive(Clone, Copy)]
pub(super) struct References<'a> {
    /// 当前图像 (第二场预测第一场时使用)
    pub current: &'a FrameCell,
    pub forward: Option<&'a FrameCell>,
    pub backward: Option<&'a FrameCell>,
}

/// 单个宏块的运动信息
#[derive(Debug, Clone, Copy, Default)]
struct MacroblockMotion {
    prediction: PredictionType,
    vectors: [[MotionVector; 2]; 2],
    field_select: [[usize; 2]; 2],
    dmv: MotionVector,
}

const FORWARD: usize = 0;
const BACKWARD: usize = 1;

pub(super) struct SliceDecoder<'a> {
    br: BitReader<'a>,
    params: &'a PictureParams,
    routine: &'a MacroblockRoutine,
    refs: References<'a>,
    kernel: &'a dyn PixelKernel,
    strip: SliceStrip,
    mb_row: usize,
    mb_x: usize,
    qscale: i32,
    dc_pred: [i32; 3],
    /// PMV[r][s]
    pmv: [[MotionVector; 2]; 2],
    prev_type: MacroblockType,
    block: [i32; 64],
}

impl<'a> SliceDecoder<'a> {
    pub(super) fn new(
        br: BitReader<'a>,
        params: &'a PictureParams,
        refs: References<'a>,
        kernel: &'a dyn PixelKernel,
        mb_row: usize,
        qscale_code: u32,
    ) -> Self {
        let routine = &params.routine;
        let mut decoder = Self {
            br,
            params,
            routine,
            refs,
            kernel,
            strip: SliceStrip::new(params.mb_width, routine.chroma),
            mb_row,
            mb_x: 0,
            qscale: (routine.qscale)(qscale_code),
            dc_pred: [0; 3],
            pmv: [[MotionVector::ZERO; 2]; 2],
            prev_type: MacroblockType::empty(),
            block: [0; 64],
        };
        decoder.reset_dc();
        decoder
    }

    pub(super) fn strip(&self) -> &SliceStrip {
        &self.strip
    }

    fn reset_dc(&mut self) {
        self.dc_pred = [1 << (self.params.intra_dc_precision + 7); 3];
    }

    fn corrupt(&self, what: &str) -> TaoError {
        TaoError::InvalidData(format!(
            "{what}, 宏块 ({}, {}), 位置: {}",
            self.mb_x,
            self.mb_row,
            self.br.bits_read()
        ))
    }

    /// 解码整个条带, 返回成功重建的宏块列范围
    ///
    /// 出错时 `decoded` 仍记录出错前已完成的列范围.
    pub(super) fn run(&mut self, decoded: &mut std::ops::Range<usize>) -> TaoResult<()> {
        let increment = decode_mb_address_increment(&mut self.br)? as usize;
        self.mb_x = increment.saturating_sub(1);
        *decoded = self.mb_x..self.mb_x;
        loop {
            if self.mb_x >= self.params.mb_width {
                return Err(self.corrupt("宏块地址超出图像宽度"));
            }
            self.decode_macroblock()?;
            self.mb_x += 1;
            decoded.end = self.mb_x;

            if self.br.peek_bits(23) == 0 {
                break;
            }
            if self.br.is_overrun() {
                return Err(self.corrupt("条带数据越界"));
            }

            let increment = decode_mb_address_increment(&mut self.br)? as usize;
            for _ in 1..increment {
                if self.mb_x >= self.params.mb_width {
                    return Err(self.corrupt("跳过宏块超出图像宽度"));
                }
                self.decode_skipped()?;
                self.mb_x += 1;
                decoded.end = self.mb_x;
            }
        }
        if self.br.is_overrun() {
            return Err(self.corrupt("条带数据越界"));
        }
        Ok(())
    }

    // ========================================================================
    // 宏块
    // ========================================================================

    fn decode_macroblock(&mut self) -> TaoResult<()> {
        let routine = self.routine;
        let mb_type = decode_macroblock_type(&mut self.br, routine.coding_type)?;
        let has_motion =
            mb_type.intersects(MacroblockType::MOTION_FORWARD | MacroblockType::MOTION_BACKWARD);

        let mut motion = MacroblockMotion {
            prediction: routine.default_prediction(),
            ..Default::default()
        };
        if has_motion && !(routine.is_frame() && routine.frame_pred_frame_dct) {
            motion.prediction = match (routine.is_frame(), self.br.get_bits(2)) {
                (_, 1) => PredictionType::Field,
                (true, 2) => PredictionType::Frame,
                (false, 2) => PredictionType::Mc16x8,
                (_, 3) => PredictionType::DualPrime,
                _ => return Err(self.corrupt("保留的运动类型")),
            };
        }
        let field_dct = routine.is_frame()
            && !routine.frame_pred_frame_dct
            && (mb_type.is_intra() || mb_type.contains(MacroblockType::PATTERN))
            && self.br.get_bit();

        if mb_type.contains(MacroblockType::QUANT) {
            self.qscale = (routine.qscale)(self.br.get_bits(5));
        }

        if mb_type.is_intra() {
            if routine.concealment_vectors {
                let mut concealment = MacroblockMotion {
                    prediction: routine.default_prediction(),
                    ..Default::default()
                };
                self.read_motion_vectors(FORWARD, &mut concealment)?;
                if !self.br.get_bit() {
                    return Err(self.corrupt("隐藏运动向量后缺少标记位"));
                }
            } else {
                self.pmv = [[MotionVector::ZERO; 2]; 2];
            }
            self.prev_type = mb_type;
            return self.decode_intra_blocks(field_dct);
        }

        self.reset_dc();
        if mb_type.contains(MacroblockType::MOTION_FORWARD) {
            self.read_motion_vectors(FORWARD, &mut motion)?;
        }
        if mb_type.contains(MacroblockType::MOTION_BACKWARD) {
            self.read_motion_vectors(BACKWARD, &mut motion)?;
        }

        let mut directions = mb_type;
        if routine.coding_type == PictureCodingType::Predicted
            && !mb_type.contains(MacroblockType::MOTION_FORWARD)
        {
            // 无运动补偿宏块: 零向量前向预测
            self.pmv = [[MotionVector::ZERO; 2]; 2];
            motion = self.zero_motion();
            directions |= MacroblockType::MOTION_FORWARD;
        }
        self.motion_compensate(directions, &motion)?;

        if mb_type.contains(MacroblockType::PATTERN) {
            let cbp = self.read_coded_block_pattern()?;
            self.decode_inter_blocks(cbp, field_dct)?;
        }
        self.prev_type = mb_type;
        Ok(())
    }

    /// 跳过宏块: P 图像零向量前向预测, B 图像沿用前一宏块的方向与预测器
    fn decode_skipped(&mut self) -> TaoResult<()> {
        self.reset_dc();
        match self.routine.coding_type {
            PictureCodingType::Predicted => {
                self.pmv = [[MotionVector::ZERO; 2]; 2];
                let motion = self.zero_motion();
                self.motion_compensate(MacroblockType::MOTION_FORWARD, &motion)
            }
            PictureCodingType::Bidirectional => {
                if self.prev_type.is_intra() || self.prev_type.is_empty() {
                    return Err(self.corrupt("B 图像跳过宏块之前为帧内宏块"));
                }
                let mut motion = self.zero_motion();
                motion.vectors[0] = [self.pmv[0][FORWARD], self.pmv[0][BACKWARD]];
                self.motion_compensate(self.prev_type, &motion)
            }
            PictureCodingType::Intra => Err(self.corrupt("I 图像中出现跳过宏块")),
        }
    }

    fn zero_motion(&self) -> MacroblockMotion {
        let parity = self.routine.structure.parity();
        MacroblockMotion {
            prediction: self.routine.default_prediction(),
            field_select: [[parity; 2]; 2],
            ..Default::default()
        }
    }

    // ========================================================================
    // 运动向量
    // ========================================================================

    fn read_motion_vectors(&mut self, s: usize, motion: &mut MacroblockMotion) -> TaoResult<()> {
        let frame = self.routine.is_frame();
        let dual = motion.prediction == PredictionType::DualPrime;
        let field_format = !frame
            || matches!(
                motion.prediction,
                PredictionType::Field | PredictionType::DualPrime
            );
        let halve_vertical = frame && field_format;
        let count = match motion.prediction {
            PredictionType::Mc16x8 => 2,
            PredictionType::Field if frame => 2,
            _ => 1,
        };
        let [fx, fy] = self.params.f_code[s];

        for r in 0..count {
            if field_format && !dual {
                motion.field_select[r][s] = usize::from(self.br.get_bit());
            }
            let pred = self.pmv[r][s];
            let x = decode_motion_component(&mut self.br, fx, pred.x)?;
            if dual {
                motion.dmv.x = decode_dmvector(&mut self.br);
            }
            let pred_y = if halve_vertical { pred.y >> 1 } else { pred.y };
            let y = decode_motion_component(&mut self.br, fy, pred_y)?;
            if dual {
                motion.dmv.y = decode_dmvector(&mut self.br);
            }
            self.pmv[r][s] = MotionVector::new(x, if halve_vertical { y * 2 } else { y });
            motion.vectors[r][s] = MotionVector::new(x, y);
        }
        if count == 1 {
            self.pmv[1][s] = self.pmv[0][s];
        }
        Ok(())
    }

    // ========================================================================
    // 运动补偿
    // ========================================================================

    fn reference(&self, s: usize) -> TaoResult<&'a FrameCell> {
        let cell = if s == FORWARD {
            self.refs.forward
        } else {
            self.refs.backward
        };
        cell.ok_or_else(|| self.corrupt("缺少运动补偿所需的参考图像"))
    }

    /// 场图像中按 field_select 选择参考: P 第二场的相反奇偶场来自当前帧
    fn field_reference(&self, s: usize, field: usize) -> TaoResult<&'a FrameCell> {
        if self.params.second_field
            && self.routine.coding_type == PictureCodingType::Predicted
            && field != self.routine.structure.parity()
        {
            Ok(self.refs.current)
        } else {
            self.reference(s)
        }
    }

    fn predict(
        &mut self,
        cell: &FrameCell,
        field: Option<usize>,
        mv: MotionVector,
        area: PredictionArea,
        average: bool,
    ) -> TaoResult<()> {
        predict_area(
            self.kernel,
            &mut self.strip,
            self.routine.chroma,
            PredictionSource { cell, field },
            mv,
            area,
            average,
        )
    }

    fn motion_compensate(
        &mut self,
        directions: MacroblockType,
        motion: &MacroblockMotion,
    ) -> TaoResult<()> {
        let mut average = false;
        for (s, flag) in [
            (FORWARD, MacroblockType::MOTION_FORWARD),
            (BACKWARD, MacroblockType::MOTION_BACKWARD),
        ] {
            if directions.contains(flag) {
                if self.routine.is_frame() {
                    self.predict_frame_picture(s, motion, average)?;
                } else {
                    self.predict_field_picture(s, motion, average)?;
                }
                average = true;
            }
        }
        Ok(())
    }

    fn predict_frame_picture(
        &mut self,
        s: usize,
        motion: &MacroblockMotion,
        average: bool,
    ) -> TaoResult<()> {
        let cell = self.reference(s)?;
        let x = self.mb_x * 16;
        let row = self.mb_row;
        let field_area = |parity: usize| PredictionArea {
            x,
            dst_y: 0,
            dst_field: Some(parity),
            src_y: row * 8,
            width: 16,
            height: 8,
        };
        match motion.prediction {
            PredictionType::Field => {
                for parity in 0..2 {
                    let select = motion.field_select[parity][s];
                    let mv = motion.vectors[parity][s];
                    self.predict(cell, Some(select), mv, field_area(parity), average)?;
                }
            }
            PredictionType::DualPrime => {
                let mv = motion.vectors[0][s];
                let derived = dual_prime_frame(mv, motion.dmv, self.params.top_field_first);
                for parity in 0..2 {
                    self.predict(cell, Some(parity), mv, field_area(parity), average)?;
                }
                for parity in 0..2 {
                    self.predict(cell, Some(parity ^ 1), derived[parity], field_area(parity), true)?;
                }
            }
            _ => {
                let area = PredictionArea {
                    x,
                    dst_y: 0,
                    dst_field: None,
                    src_y: row * 16,
                    width: 16,
                    height: 16,
                };
                self.predict(cell, None, motion.vectors[0][s], area, average)?;
            }
        }
        Ok(())
    }

    fn predict_field_picture(
        &mut self,
        s: usize,
        motion: &MacroblockMotion,
        average: bool,
    ) -> TaoResult<()> {
        let x = self.mb_x * 16;
        let src_y = self.mb_row * 16;
        let full = PredictionArea {
            x,
            dst_y: 0,
            dst_field: None,
            src_y,
            width: 16,
            height: 16,
        };
        match motion.prediction {
            PredictionType::Mc16x8 => {
                for half in 0..2 {
                    let select = motion.field_select[half][s];
                    let cell = self.field_reference(s, select)?;
                    let area = PredictionArea {
                        dst_y: half * 8,
                        src_y: src_y + half * 8,
                        height: 8,
                        ..full
                    };
                    self.predict(cell, Some(select), motion.vectors[half][s], area, average)?;
                }
            }
            PredictionType::DualPrime => {
                let own = self.routine.structure.parity();
                let mv = motion.vectors[0][s];
                let same = self.reference(s)?;
                self.predict(same, Some(own), mv, full, average)?;
                let opposite = self.field_reference(s, own ^ 1)?;
                let derived = dual_prime_field(mv, motion.dmv, own == 1);
                self.predict(opposite, Some(own ^ 1), derived, full, true)?;
            }
            _ => {
                let select = motion.field_select[0][s];
                let cell = self.field_reference(s, select)?;
                self.predict(cell, Some(select), motion.vectors[0][s], full, average)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // 系数块
    // ========================================================================

    fn read_coded_block_pattern(&mut self) -> TaoResult<u32> {
        let cbp = decode_coded_block_pattern(&mut self.br)?;
        Ok(match self.routine.chroma {
            ChromaFormat::Yuv420 => cbp,
            ChromaFormat::Yuv422 => (cbp << 2) | self.br.get_bits(2),
            ChromaFormat::Yuv444 => (cbp << 6) | self.br.get_bits(6),
        })
    }

    /// 第 `index` 个 8x8 块在条带中的位置 `(平面, x, y, 场)`
    fn block_position(&self, index: usize, field_dct: bool) -> (usize, usize, usize, Option<usize>) {
        if index < 4 {
            let x = self.mb_x * 16 + (index & 1) * 8;
            let half = index >> 1;
            return if field_dct {
                (0, x, 0, Some(half))
            } else {
                (0, x, half * 8, None)
            };
        }
        let chroma = self.routine.chroma;
        let (cw, _) = chroma.mb_chroma_size();
        let plane = 1 + ((index - 4) & 1);
        let k = (index - 4) >> 1;
        let x = self.mb_x * cw + (k >> 1) * 8;
        let half = k & 1;
        if field_dct && chroma != ChromaFormat::Yuv420 {
            (plane, x, 0, Some(half))
        } else {
            (plane, x, half * 8, None)
        }
    }

    fn decode_intra_dc(&mut self, component: usize) -> TaoResult<i32> {
        let size = decode_dc_size(&mut self.br, component == 0)?;
        let diff = if size == 0 {
            0
        } else {
            let v = self.br.get_bits(size) as i32;
            if v < 1 << (size - 1) {
                v + 1 - (1 << size)
            } else {
                v
            }
        };
        self.dc_pred[component] += diff;
        Ok(self.dc_pred[component] << (3 - self.params.intra_dc_precision))
    }

    fn decode_intra_blocks(&mut self, field_dct: bool) -> TaoResult<()> {
        let routine = self.routine;
        let weights = &self.params.weights;
        for index in 0..routine.chroma.block_count() {
            let component = if index < 4 { 0 } else { 1 + ((index - 4) & 1) };
            let dc = self.decode_intra_dc(component)?;
            let quant = BlockQuant {
                weights: if component == 0 {
                    &weights.intra
                } else {
                    &weights.chroma_intra
                },
                scan: routine.scan,
                qscale: self.qscale,
            };
            self.block.fill(0);
            (routine.intra_block)(&mut self.br, &mut self.block, dc, &quant)?;
            let (plane, x, y, field) = self.block_position(index, field_dct);
            let (dst, stride) = self.strip.target(plane, x, y, field);
            idct_put(&mut self.block, dst, stride);
        }
        Ok(())
    }

    fn decode_inter_blocks(&mut self, cbp: u32, field_dct: bool) -> TaoResult<()> {
        let count = self.routine.chroma.block_count();
        let weights = &self.params.weights;
        for index in 0..count {
            if cbp & (1 << (count - 1 - index)) == 0 {
                continue;
            }
            let quant = BlockQuant {
                weights: if index < 4 {
                    &weights.non_intra
                } else {
                    &weights.chroma_non_intra
                },
                scan: self.routine.scan,
                qscale: self.qscale,
            };
            self.block.fill(0);
            parse_non_intra_block(&mut self.br, &mut self.block, &quant)?;
            let (plane, x, y, field) = self.block_position(index, field_dct);
            let (dst, stride) = self.strip.target(plane, x, y, field);
            idct_add(&mut self.block, dst, stride);
        }
        Ok(())
    }
}
