use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// CPU-accessible image handed over by the camera callback.
///
/// Format conversion happens before a frame reaches the pipeline, so the
/// pixel buffer is always tightly packed in `format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub pixels: BytesMut,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Bytes needed for one packed frame of the given size.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

impl ImageFrame {
    /// Zero-filled frame of the given geometry
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = format.frame_len(width, height);
        let mut pixels = BytesMut::with_capacity(len);
        pixels.resize(len, 0);
        Self {
            pixels,
            width,
            height,
            format,
        }
    }

    /// Wrap an existing buffer, resizing it to fit the geometry.
    ///
    /// Reuses the allocation when it is already large enough, which is what
    /// makes recycled buffers from [`crate::pipeline::BufferPool`] cheap.
    pub fn from_buffer(mut pixels: BytesMut, width: u32, height: u32, format: PixelFormat) -> Self {
        let len = format.frame_len(width, height);
        pixels.clear();
        pixels.resize(len, 0);
        Self {
            pixels,
            width,
            height,
            format,
        }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Give up the pixel buffer so it can be reused for another frame.
    pub fn into_buffer(self) -> BytesMut {
        self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_frame_is_packed() {
        let frame = ImageFrame::blank(4, 2, PixelFormat::Rgb24);
        assert_eq!(frame.pixels.len(), 24);
        assert_eq!(frame.stride(), 12);
        assert!(frame.pixels.iter().all(|&b| b == 0));
    }

    #[test]
    fn from_buffer_keeps_allocation() {
        let buf = BytesMut::with_capacity(1024);
        let frame = ImageFrame::from_buffer(buf, 8, 8, PixelFormat::Gray8);
        assert_eq!(frame.pixels.len(), 64);
        assert!(frame.pixels.capacity() >= 1024);
    }
}
