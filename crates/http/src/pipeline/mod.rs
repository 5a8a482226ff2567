//! Per-connection pipeline assembly.
//!
//! A pipeline is an ordered list of stages: `wiretap -> http-codec ->
//! compression -> protocol-handler`. The order is enforced when a stage is
//! added, so a pipeline that exists is always well formed. Which optional
//! stages are present, and how the codec is configured, is decided by the
//! [`PipelineAssembler`] from the attributes a configuration chain left on
//! the [`Bootstrap`](crate::bootstrap::Bootstrap).

mod assembler;
mod compression;
pub mod keys;

pub use assembler::{Assembly, ExchangeOptions, PipelineAssembler};
pub use compression::{ACCEPTED_ENCODINGS, Compression, CompressionPolicy, CompressionPredicate, Decompress, Encoding};

use std::fmt;

use crate::codec::CodecConfig;
use crate::protocol::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageName {
    Wiretap,
    HttpCodec,
    Compression,
    ProtocolHandler,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Wiretap => "wiretap",
            StageName::HttpCodec => "http-codec",
            StageName::Compression => "compression",
            StageName::ProtocolHandler => "protocol-handler",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum Stage<H> {
    Wiretap,
    HttpCodec(CodecConfig),
    Compression(Compression),
    ProtocolHandler(H),
}

impl<H> Stage<H> {
    pub fn name(&self) -> StageName {
        match self {
            Stage::Wiretap => StageName::Wiretap,
            Stage::HttpCodec(_) => StageName::HttpCodec,
            Stage::Compression(_) => StageName::Compression,
            Stage::ProtocolHandler(_) => StageName::ProtocolHandler,
        }
    }
}

impl<H> fmt::Debug for Stage<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::HttpCodec(config) => f.debug_tuple("HttpCodec").field(config).finish(),
            Stage::Compression(compression) => f.debug_tuple("Compression").field(compression).finish(),
            other => f.write_str(other.name().as_str()),
        }
    }
}

pub struct Pipeline<H> {
    stages: Vec<Stage<H>>,
}

impl<H> Pipeline<H> {
    pub fn new() -> Self {
        Self { stages: Vec::with_capacity(4) }
    }

    /// Appends `stage`, which must come strictly after the last installed one.
    pub fn add_last(&mut self, stage: Stage<H>) -> Result<(), ConfigError> {
        if let Some(last) = self.stages.last() {
            let (previous, next) = (last.name(), stage.name());
            crate::ensure!(next > previous, ConfigError::PipelineOrder { stage: next.as_str(), previous: previous.as_str() });
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn names(&self) -> Vec<StageName> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn contains(&self, name: StageName) -> bool {
        self.stages.iter().any(|s| s.name() == name)
    }

    pub fn wiretap(&self) -> bool {
        self.contains(StageName::Wiretap)
    }

    pub fn codec_config(&self) -> Option<&CodecConfig> {
        self.stages.iter().find_map(|s| match s {
            Stage::HttpCodec(config) => Some(config),
            _ => None,
        })
    }

    pub fn compression(&self) -> Option<&Compression> {
        self.stages.iter().find_map(|s| match s {
            Stage::Compression(compression) => Some(compression),
            _ => None,
        })
    }

    pub fn handler(&self) -> Option<&H> {
        self.stages.iter().find_map(|s| match s {
            Stage::ProtocolHandler(handler) => Some(handler),
            _ => None,
        })
    }

    pub fn into_handler(self) -> Option<H> {
        self.stages.into_iter().find_map(|s| match s {
            Stage::ProtocolHandler(handler) => Some(handler),
            _ => None,
        })
    }
}

impl<H> Default for Pipeline<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for Pipeline<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.stages).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_installed_in_order() {
        let mut pipeline = Pipeline::new();
        pipeline.add_last(Stage::Wiretap).unwrap();
        pipeline.add_last(Stage::HttpCodec(CodecConfig::default())).unwrap();
        pipeline.add_last(Stage::ProtocolHandler(())).unwrap();

        assert_eq!(pipeline.names(), vec![StageName::Wiretap, StageName::HttpCodec, StageName::ProtocolHandler]);
        assert!(pipeline.wiretap());
        assert!(pipeline.compression().is_none());
    }

    #[test]
    fn compression_before_codec_is_rejected() {
        let mut pipeline = Pipeline::<()>::new();
        pipeline.add_last(Stage::Compression(Compression::Decode)).unwrap();

        let err = pipeline.add_last(Stage::HttpCodec(CodecConfig::default())).unwrap_err();
        assert!(matches!(err, ConfigError::PipelineOrder { stage: "http-codec", previous: "compression" }));
    }

    #[test]
    fn a_stage_is_installed_once() {
        let mut pipeline = Pipeline::<()>::new();
        pipeline.add_last(Stage::HttpCodec(CodecConfig::default())).unwrap();
        assert!(pipeline.add_last(Stage::HttpCodec(CodecConfig::default())).is_err());
        assert_eq!(pipeline.names().len(), 1);
    }
}
