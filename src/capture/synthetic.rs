//! Test-pattern frame source standing in for the platform camera callback

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capture::frame::ImageFrame;
use crate::pipeline::BufferPool;
use crate::CaptureConfig;

/// Generates a scrolling gradient at the configured geometry
pub struct SyntheticCamera {
    config: CaptureConfig,
    sequence: u64,
    pool: Option<Arc<BufferPool>>,
}

impl SyntheticCamera {
    pub fn new(config: CaptureConfig) -> Self {
        info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            format = ?config.format,
            "Initializing synthetic camera"
        );
        Self {
            config,
            sequence: 0,
            pool: None,
        }
    }

    /// Draw pixel buffers from `pool` instead of allocating each frame
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Time between frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.config.fps.max(1)
    }

    /// Frames produced so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Render the next frame of the pattern
    pub fn capture_frame(&mut self) -> ImageFrame {
        let CaptureConfig {
            width,
            height,
            format,
            ..
        } = self.config;
        let len = format.frame_len(width, height);

        let buf = match &self.pool {
            Some(pool) => pool.acquire(len),
            None => bytes::BytesMut::with_capacity(len),
        };
        let mut frame = ImageFrame::from_buffer(buf, width, height, format);

        // A zero-sized geometry has a zero stride and nothing to draw
        if len > 0 {
            self.draw_gradient(&mut frame);
        }

        self.sequence += 1;
        frame
    }

    fn draw_gradient(&self, frame: &mut ImageFrame) {
        let shift = self.sequence as usize;
        let bpp = frame.format.bytes_per_pixel();
        let stride = frame.stride();
        for (y, row) in frame.pixels.chunks_exact_mut(stride).enumerate() {
            for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
                let v = ((x + y + shift) & 0xff) as u8;
                for (c, channel) in px.iter_mut().enumerate() {
                    *channel = v.wrapping_add((c * 85) as u8);
                }
            }
        }
    }
}
