//! V4L2 camera (USB webcams, CSI sensors behind a V4L2 driver).
//!
//! Prefers MJPEG so frames can be streamed as-is; falls back to whatever the
//! device negotiates (YUYV, RGB3, GREY), which the stream loop then compresses.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::CameraConfig;
use crate::frame::{Frame, FrameSource, PixelFormat};

const CAPTURE_BUFFERS: u32 = 4;

pub struct V4l2Camera {
    config: CameraConfig,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Jpeg,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.source)
            .with_context(|| format!("open v4l2 device {}", self.config.source))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set MJPG on {}: {}",
                    self.config.source,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = pixel_format(&format.fourcc.repr)?;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: connected to {} ({}x{} {:?})",
            self.config.source,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }
}

impl FrameSource for V4l2Camera {
    fn name(&self) -> &str {
        &self.config.source
    }

    fn acquire(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let data = state
            .with_mut(|fields| {
                fields.stream.next().map(|(buf, meta)| {
                    let used = (meta.bytesused as usize).min(buf.len());
                    let used = if used == 0 { buf.len() } else { used };
                    buf[..used].to_vec()
                })
            })
            .context("capture v4l2 frame")?;

        Ok(Frame::new(
            data,
            self.format,
            self.active_width,
            self.active_height,
        ))
    }

    fn release(&mut self, _frame: Frame) {
        // Capture copies out of the mmap ring, so there is nothing to hand back.
    }
}

fn pixel_format(fourcc: &[u8; 4]) -> Result<PixelFormat> {
    match fourcc {
        b"MJPG" | b"JPEG" => Ok(PixelFormat::Jpeg),
        b"YUYV" => Ok(PixelFormat::Yuv422),
        b"RGB3" => Ok(PixelFormat::Rgb888),
        b"GREY" => Ok(PixelFormat::Grayscale),
        other => Err(anyhow!(
            "unsupported v4l2 pixel format {}",
            String::from_utf8_lossy(other)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_fourccs() -> Result<()> {
        assert_eq!(pixel_format(b"MJPG")?, PixelFormat::Jpeg);
        assert_eq!(pixel_format(b"YUYV")?, PixelFormat::Yuv422);
        assert!(pixel_format(b"NV12").is_err());
        Ok(())
    }

    #[test]
    fn acquire_before_connect_fails() {
        let mut camera = V4l2Camera::new(CameraConfig {
            source: "/dev/video-missing".to_string(),
            ..CameraConfig::default()
        });
        assert!(camera.acquire().is_err());
    }
}
