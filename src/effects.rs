//! Beauty effects applied by the frame worker
//!
//! These sit on top of the pipeline as ordinary transforms; the processor
//! knows nothing about them.

use tracing::debug;

use crate::capture::{ImageFrame, PixelFormat};
use crate::error::EffectError;

/// Frames with either side below this are passed through untouched
pub const MIN_DIMENSION: u32 = 32;
pub const MAX_DIMENSION: u32 = 2048;
pub const MAX_PIXELS: u64 = 4_000_000;

/// Log-curve brightening: `255 * ln(v/255 * (level - 1) + 1) / ln(level)`.
///
/// Precomputed into a lookup table, so applying it is one table read per
/// channel.
#[derive(Clone)]
pub struct Whiten {
    level: f32,
    lut: [u8; 256],
}

impl Whiten {
    /// `level` is clamped to 1.0..=5.0; 1.0 is the identity.
    pub fn new(level: f32) -> Self {
        let level = level.clamp(1.0, 5.0);
        let mut lut = [0u8; 256];
        let a = level.ln();
        for (v, out) in lut.iter_mut().enumerate() {
            *out = if a == 0.0 {
                v as u8
            } else {
                let x = v as f32 / 255.0;
                (255.0 * ((x * (level - 1.0) + 1.0).ln() / a)).clamp(0.0, 255.0) as u8
            };
        }
        Self { level, lut }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_identity(&self) -> bool {
        self.level <= 1.0
    }

    /// Whiten `frame` in place.
    ///
    /// Returns `Ok(false)` when the effect would not change the frame.
    pub fn apply(&self, frame: &mut ImageFrame) -> Result<bool, EffectError> {
        check_geometry(frame)?;
        if self.is_identity() {
            return Ok(false);
        }

        match frame.format {
            PixelFormat::Rgba32 => {
                for px in frame.pixels.chunks_exact_mut(4) {
                    for channel in &mut px[..3] {
                        *channel = self.lut[*channel as usize];
                    }
                }
            }
            PixelFormat::Rgb24 | PixelFormat::Gray8 => {
                for channel in frame.pixels.iter_mut() {
                    *channel = self.lut[*channel as usize];
                }
            }
        }
        Ok(true)
    }

    /// Worker transform: whitened frame, or `None` if nothing would change.
    pub fn into_transform(
        self,
    ) -> impl FnMut(ImageFrame) -> Result<Option<ImageFrame>, EffectError> {
        move |mut frame| {
            if frame.width < MIN_DIMENSION || frame.height < MIN_DIMENSION {
                debug!(width = frame.width, height = frame.height, "frame below effect size");
                return Ok(None);
            }
            Ok(self.apply(&mut frame)?.then_some(frame))
        }
    }
}

fn check_geometry(frame: &ImageFrame) -> Result<(), EffectError> {
    let (width, height) = (frame.width, frame.height);
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(EffectError::TooSmall { width, height });
    }
    if width > MAX_DIMENSION
        || height > MAX_DIMENSION
        || width as u64 * height as u64 > MAX_PIXELS
    {
        return Err(EffectError::TooLarge { width, height });
    }
    let expected = frame.format.frame_len(width, height);
    if frame.pixels.len() != expected {
        return Err(EffectError::BadBuffer {
            expected,
            actual: frame.pixels.len(),
        });
    }
    Ok(())
}
