//! Error types for the frame pipeline
//!
//! Only lifecycle and configuration failures are errors. A full buffer, an
//! empty poll, a repeated `start`/`stop` and a failing transform are all
//! normal pipeline states and never surface as `PipelineError`.

use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn frame worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Why a processed frame could not be handed to the sink.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink is full")]
    Full,

    #[error("sink receiver is gone")]
    Disconnected,
}

/// Rejections from the demo image effects
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("frame {width}x{height} is too small to process")]
    TooSmall { width: u32, height: u32 },

    #[error("frame {width}x{height} exceeds the processing limit")]
    TooLarge { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BadBuffer { expected: usize, actual: usize },
}
