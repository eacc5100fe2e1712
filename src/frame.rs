//! Camera frames and the frame source boundary.
//!
//! - `Frame`: owned capture buffer tagged with its pixel format.
//! - `FrameSource`: the camera side of the stream loop. Frames are borrowed out
//!   with `acquire()` and handed back with `release()` so a source can recycle
//!   its buffers.
//!
//! `Frame` deliberately does not implement `Clone`: a capture buffer has exactly
//! one owner at a time, and the stream handler must give it back before asking
//! for the next one.

use anyhow::Result;
use std::time::Instant;

/// Pixel layout of a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Already-compressed JPEG bytes.
    Jpeg,
    /// Packed 8-bit RGB.
    Rgb888,
    /// Packed 16-bit RGB 5-6-5, big-endian (sensor byte order).
    Rgb565,
    /// 8-bit luma only.
    Grayscale,
    /// YUYV 4:2:2 (Y0 U Y1 V).
    Yuv422,
}

impl PixelFormat {
    pub fn is_jpeg(self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }

    /// Bytes per pixel for uncompressed layouts, `None` for JPEG.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => Some(2),
            PixelFormat::Grayscale => Some(1),
        }
    }
}

/// A captured frame.
pub struct Frame {
    data: Vec<u8>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            data,
            format,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Give up the frame and keep its buffer (used by sources that recycle).
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Camera frame source.
///
/// `acquire` blocks until a frame is available or the camera fails. Every
/// acquired frame must come back through `release` before the next `acquire`
/// on the same stream, otherwise sources with a fixed buffer pool starve.
pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Capture the next frame.
    fn acquire(&mut self) -> Result<Frame>;

    /// Return a frame to the source.
    fn release(&mut self, frame: Frame);
}
