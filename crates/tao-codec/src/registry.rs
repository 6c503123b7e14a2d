//! 解码器注册表.
//!
//! 支持按 CodecId 查找并实例化解码器.

use std::collections::HashMap;

use tao_core::{TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::decoder::Decoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn() -> TaoResult<Box<dyn Decoder>>;

/// 解码器注册条目
struct DecoderEntry {
    /// 解码器名称
    name: String,
    /// 工厂函数
    factory: DecoderFactory,
}

/// 编解码器注册表
#[derive(Default)]
pub struct CodecRegistry {
    decoders: HashMap<CodecId, Vec<DecoderEntry>>,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个解码器
    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders
            .entry(codec_id)
            .or_default()
            .push(DecoderEntry {
                name: name.into(),
                factory,
            });
    }

    /// 创建指定编解码器 ID 的解码器实例
    pub fn create_decoder(&self, codec_id: CodecId) -> TaoResult<Box<dyn Decoder>> {
        let entry = self
            .decoders
            .get(&codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到 {codec_id} 的解码器")))?;
        (entry.factory)()
    }

    /// 获取所有已注册的解码器名称
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        self.decoders
            .iter()
            .flat_map(|(id, entries)| entries.iter().map(move |e| (*id, e.name.as_str())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_create_mpeg2() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);
        let dec = registry
            .create_decoder(CodecId::Mpeg2Video)
            .expect("应能创建 MPEG-2 解码器");
        assert_eq!(dec.codec_id(), CodecId::Mpeg2Video);
        assert_eq!(dec.name(), "mpeg2video");
        assert!(
            registry
                .list_decoders()
                .iter()
                .any(|(id, _)| *id == CodecId::Mpeg2Video)
        );
    }

    #[test]
    fn test_missing_codec() {
        let registry = CodecRegistry::new();
        assert!(matches!(
            registry.create_decoder(CodecId::Mpeg1Video),
            Err(TaoError::CodecNotFound(_))
        ));
    }
}
