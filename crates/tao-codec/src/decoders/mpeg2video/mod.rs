//! MPEG-2 视频解码器
//!
//! 实现 ISO/IEC 13818-2 (MPEG-2 Video) 基本流解码, 以条带为单位多线程并行.
//!
//! 已实现:
//! - 全部序列层/GOP/图像层头部与扩展解析, 用户数据收集
//! - I/P/B 图像, 帧图像与场图像 (场对共用一帧)
//! - 帧预测, 场预测, 16x8 预测与双基预测, 半像素运动补偿
//! - 隐藏运动向量, 非线性量化尺度, 交替扫描, 帧/场 DCT
//! - 4:2:0 / 4:2:2 / 4:4:4 色度格式
//! - 反量化饱和与失配控制, 符合 IEEE 1180 的整数 IDCT
//! - 依赖感知的条带调度, 有界图像池, 显示顺序重排
//!
//! ## 模块结构
//!
//! - `types`: 色度格式, 图像类型, 宏块类型与运动向量
//! - `tables`: 扫描表, 默认量化矩阵, 量化尺度, 帧率与宽高比表
//! - `header`: 起始码常量与头部/扩展解析
//! - `vlc`: 宏块级 VLC 与系数表
//! - `block`: 8x8 块系数解码与反量化
//! - `idct`: 整数逆 DCT
//! - `kernel`: 可替换的像素预测内核
//! - `frame_buffer`: 平面, 帧缓冲, 条带重建缓冲与共享帧单元
//! - `motion`: 运动向量解码与运动补偿
//! - `macroblock`: 宏块解码状态机
//! - `slice`: 图像参数, 条带头与条带任务
//! - `scheduler`: 依赖感知的任务调度器
//! - `config`: 流解码器配置
//! - `stream`: 流解码器与输出图像

mod block;
pub mod config;
pub mod frame_buffer;
pub mod header;
pub mod idct;
pub mod kernel;
mod macroblock;
mod motion;
pub mod scheduler;
mod slice;
pub mod stream;
pub mod tables;
#[cfg(test)]
mod tests;
pub mod types;
mod vlc;

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use log::{debug, warn};
use tao_core::{TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{PictureType, VideoFrame};
use crate::packet::Packet;

pub use config::Mpeg2DecoderConfig;
pub use frame_buffer::{PictureBuffer, PictureInfo, Plane};
pub use header::{
    GopHeader, PictureCodingExtension, PictureHeader, SequenceExtension, SequenceHeader,
};
pub use kernel::{PixelKernel, PortableKernel, PredBlock};
pub use scheduler::{PictureId, TaskScheduler};
pub use slice::QuantMatrices;
pub use stream::{DecodeSummary, Mpeg2Decoder, OutputPicture};
pub use types::{ChromaFormat, PictureCodingType, PictureStructure};

// ============================================================================
// Decoder trait 适配
// ============================================================================

/// 把输出图像复制为 [`VideoFrame`] (显示尺寸, 紧密排列)
fn to_video_frame(picture: &OutputPicture) -> TaoResult<VideoFrame> {
    let planes = picture.copy_planes()?;
    let info = picture.info();
    let mut frame = VideoFrame::new(
        picture.width() as u32,
        picture.height() as u32,
        picture.chroma_format().pixel_format(),
    );
    frame.linesize = (0..3).map(|i| picture.plane_size(i).0).collect();
    frame.data = Vec::from(planes);
    frame.picture_type = picture.picture_type();
    frame.is_keyframe = frame.picture_type == PictureType::I;
    frame.temporal_reference = info.temporal_reference;
    frame.progressive = info.progressive_frame;
    frame.top_field_first = info.top_field_first;
    frame.repeat_first_field = info.repeat_first_field;
    frame.frame_rate = info.frame_rate;
    if info.sample_aspect_ratio.is_valid() {
        frame.sample_aspect_ratio = info.sample_aspect_ratio;
    }
    frame.corrupted = picture.corrupted();
    Ok(frame)
}

/// 基于 [`Mpeg2Decoder`] 的 [`Decoder`] 实现
///
/// 数据包可以任意切分; 空包表示输入结束. 帧由输出线程异步产生,
/// `receive_frame` 在帧尚未就绪时返回 `NeedMoreData`.
pub struct Mpeg2VideoDecoder {
    config: Mpeg2DecoderConfig,
    decoder: Option<Mpeg2Decoder>,
    sender: Sender<VideoFrame>,
    frames: Receiver<VideoFrame>,
    finished: bool,
    next_pts: i64,
}

impl Mpeg2VideoDecoder {
    /// 创建解码器实例 (工厂函数)
    pub fn create() -> TaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self::with_config(Mpeg2DecoderConfig::default())?))
    }

    pub fn with_config(config: Mpeg2DecoderConfig) -> TaoResult<Self> {
        config.validate()?;
        let (sender, frames) = mpsc::channel();
        Ok(Self {
            config,
            decoder: None,
            sender,
            frames,
            finished: false,
            next_pts: 0,
        })
    }

    fn decoder(&mut self) -> TaoResult<&mut Mpeg2Decoder> {
        if self.decoder.is_none() {
            let sender = self.sender.clone();
            let decoder = Mpeg2Decoder::new(self.config.clone(), move |picture| {
                match to_video_frame(&picture) {
                    Ok(frame) => {
                        // 接收端只会在适配器销毁时关闭
                        let _ = sender.send(frame);
                    }
                    Err(e) => warn!("MPEG-2: 输出帧转换失败: {e}"),
                }
            })?;
            self.decoder = Some(decoder);
        }
        self.decoder
            .as_mut()
            .ok_or_else(|| TaoError::Internal("解码器未创建".into()))
    }
}

impl Decoder for Mpeg2VideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Mpeg2Video
    }

    fn name(&self) -> &str {
        "mpeg2video"
    }

    fn open(&mut self, params: &CodecParameters) -> TaoResult<()> {
        if params.codec_id != CodecId::Mpeg2Video {
            return Err(TaoError::InvalidArgument(format!(
                "MPEG-2 解码器不能打开 {}",
                params.codec_id
            )));
        }
        let video = &params.video;
        let mut config = self.config.clone();
        if video.width > 0 && video.height > 0 {
            config.width = video.width as usize;
            config.height = video.height as usize;
        }
        if let Some(chroma) = ChromaFormat::from_pixel_format(video.pixel_format) {
            config.chroma_format = chroma;
        }
        config.validate()?;
        debug!(
            "MPEG-2: 打开解码器 {}x{} {:?}",
            config.width, config.height, config.chroma_format
        );
        self.flush();
        self.config = config;
        if !params.extra_data.is_empty() {
            self.decoder()?.push(&params.extra_data)?;
        }
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> TaoResult<()> {
        if packet.is_empty() {
            if self.finished {
                return Ok(());
            }
            self.finished = true;
            return match self.decoder.take() {
                Some(decoder) => decoder.finish().map(|summary| {
                    debug!("MPEG-2: 输入结束, 共输出 {} 幅图像", summary.pictures);
                }),
                None => Ok(()),
            };
        }
        if self.finished {
            return Err(TaoError::Codec("输入已结束, 需要先 flush".into()));
        }
        self.decoder()?.push(&packet.data)
    }

    fn receive_frame(&mut self) -> TaoResult<VideoFrame> {
        match self.frames.try_recv() {
            Ok(mut frame) => {
                frame.pts = self.next_pts;
                self.next_pts += 1;
                Ok(frame)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) if self.finished => {
                Err(TaoError::Eof)
            }
            Err(_) => Err(TaoError::NeedMoreData),
        }
    }

    fn flush(&mut self) {
        // 丢弃解码器会等待在途图像输出
        self.decoder = None;
        let discarded = self.frames.try_iter().count();
        if discarded > 0 {
            debug!("MPEG-2: flush 丢弃 {discarded} 帧");
        }
        self.finished = false;
        self.next_pts = 0;
    }
}
