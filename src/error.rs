use thiserror::Error;

use crate::{bits::BitError, caster::CasterError, config::ConfigError, frame::FrameError, ssr::SsrError};

/// Top level error type. Decode errors (see [SsrError], [FrameError], [BitError])
/// never escape the stream decoder: they are logged and converted into
/// advisories. Only network and configuration errors propagate up as `Result`.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("caster error: {0}")]
    Caster(#[from] CasterError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("ssr error: {0}")]
    Ssr(#[from] SsrError),

    #[error("bit error: {0}")]
    Bits(#[from] BitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
