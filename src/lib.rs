pub mod capture;
pub mod effects;
pub mod error;
pub mod pipeline;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{ImageFrame, SyntheticCamera};
pub use error::{PipelineError, PipelineResult, SinkError};
pub use pipeline::{
    AsyncFrameProcessor, BufferPool, FrameRecord, FrameRingBuffer, FrameSink, PreviewSlot,
    ProcessorState, ProcessorStats, Recycle, RingStats,
};

/// Environment prefix for overrides, e.g. `SHUTTER__PIPELINE__RING_BUFFER_SIZE=4`
pub const ENV_PREFIX: &str = "SHUTTER";

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub effects: EffectsConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames held between camera and worker (3-5 keeps latency low)
    pub ring_buffer_size: usize,
    /// Minimum spacing between transform starts
    pub processing_interval_ms: u64,
    /// Worker back-off while the buffer is empty
    pub idle_wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    /// Log-curve whitening strength, 1.0 (off) to 5.0
    pub whiten_level: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// How long the demo binary runs before stopping on its own
    pub run_seconds: u64,
    /// Statistics log period
    pub stats_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 60,
            format: PixelFormat::Rgb24,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 3,
            processing_interval_ms: 33, // ~30fps
            idle_wait_ms: 5,
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self { whiten_level: 2.5 }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            run_seconds: 5,
            stats_interval_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.ring_buffer_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "pipeline.ring_buffer_size must be at least 1".into(),
            ));
        }
        if self.processing_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "pipeline.processing_interval_ms must be at least 1".into(),
            ));
        }
        if self.idle_wait_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "pipeline.idle_wait_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Layer defaults, an optional TOML file, then `SHUTTER__*` variables.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.pipeline.validate()?;
        if self.capture.width == 0 || self.capture.height == 0 || self.capture.fps == 0 {
            return Err(PipelineError::InvalidConfig(
                "capture width, height and fps must be non-zero".into(),
            ));
        }
        if !(1.0..=5.0).contains(&self.effects.whiten_level) {
            return Err(PipelineError::InvalidConfig(format!(
                "effects.whiten_level {} outside 1.0..=5.0",
                self.effects.whiten_level
            )));
        }
        Ok(())
    }
}
