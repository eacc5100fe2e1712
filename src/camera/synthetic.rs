//! Synthetic camera for dry runs and tests.
//!
//! `stub://rgb` produces raw RGB frames (exercising the JPEG fallback),
//! `stub://jpeg` produces frames that are already compressed, the way a
//! sensor in JPEG mode does. Released buffers are recycled.

use anyhow::{anyhow, Result};

use super::CameraConfig;
use crate::encode::{ImageJpegEncoder, JpegEncoder};
use crate::frame::{Frame, FrameSource, PixelFormat};

/// Quality the synthetic sensor uses in JPEG mode.
const SENSOR_JPEG_QUALITY: u8 = 12;
const MAX_POOLED_BUFFERS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Rgb,
    Jpeg,
}

pub struct SyntheticCamera {
    config: CameraConfig,
    mode: Mode,
    frame_count: u64,
    released: u64,
    pool: Vec<Vec<u8>>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let mode = match config.source.as_str() {
            "stub://rgb" | "stub://" => Mode::Rgb,
            "stub://jpeg" => Mode::Jpeg,
            other => {
                return Err(anyhow!(
                    "unknown synthetic camera '{}'; expected stub://rgb or stub://jpeg",
                    other
                ))
            }
        };
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic camera needs a non-zero frame size"));
        }
        log::info!(
            "SyntheticCamera: {} ({}x{})",
            config.source,
            config.width,
            config.height
        );
        Ok(Self {
            config,
            mode,
            frame_count: 0,
            released: 0,
            pool: Vec::new(),
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Frames handed out and not yet released.
    pub fn outstanding(&self) -> u64 {
        self.frame_count - self.released
    }

    fn recycle(&mut self, buf: Vec<u8>) {
        if self.pool.len() < MAX_POOLED_BUFFERS {
            self.pool.push(buf);
        }
    }

    /// Moving diagonal gradient; `frame_count` shifts it one step per frame.
    fn fill_pattern(&self, buf: &mut Vec<u8>) {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        buf.clear();
        buf.reserve(width * height * 3);
        let shift = self.frame_count as usize;
        for y in 0..height {
            for x in 0..width {
                buf.push(((x + shift) % 256) as u8);
                buf.push(((y + shift) % 256) as u8);
                buf.push(((x + y) % 256) as u8);
            }
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.config.source
    }

    fn acquire(&mut self) -> Result<Frame> {
        let mut buf = self.pool.pop().unwrap_or_default();
        self.fill_pattern(&mut buf);
        let frame = Frame::new(buf, PixelFormat::Rgb888, self.config.width, self.config.height);
        let frame = match self.mode {
            Mode::Rgb => frame,
            Mode::Jpeg => {
                let jpeg = ImageJpegEncoder.encode_to_jpeg(&frame, SENSOR_JPEG_QUALITY)?;
                self.recycle(frame.into_data());
                Frame::new(jpeg, PixelFormat::Jpeg, self.config.width, self.config.height)
            }
        };
        self.frame_count += 1;
        Ok(frame)
    }

    fn release(&mut self, frame: Frame) {
        self.released += 1;
        self.recycle(frame.into_data());
    }
}
