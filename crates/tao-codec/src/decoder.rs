//! 解码器 trait 定义.

use tao_core::TaoResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::VideoFrame;
use crate::packet::Packet;

/// 解码器 trait
///
/// 解码流程:
/// 1. 调用 `send_packet()` 送入压缩数据
/// 2. 调用 `receive_frame()` 取出解码后的帧
/// 3. 重复以上步骤直到所有数据处理完毕
/// 4. 送入空包 (flush) 以获取解码器中缓存的帧
pub trait Decoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用参数配置解码器
    ///
    /// 默认实现为空操作.
    fn open(&mut self, _params: &CodecParameters) -> TaoResult<()> {
        Ok(())
    }

    /// 送入一个压缩数据包进行解码
    ///
    /// 送入空包表示输入结束, 解码器将输出所有缓存帧.
    fn send_packet(&mut self, packet: &Packet) -> TaoResult<()>;

    /// 从解码器取出一帧解码数据
    ///
    /// # 返回
    /// - `Ok(frame)`: 成功取出一帧
    /// - `Err(TaoError::NeedMoreData)`: 需要送入更多数据包
    /// - `Err(TaoError::Eof)`: 所有帧已取出
    fn receive_frame(&mut self) -> TaoResult<VideoFrame>;

    /// 刷新解码器, 清空内部状态
    fn flush(&mut self);
}
