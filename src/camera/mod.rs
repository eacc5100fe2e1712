//! Camera frame sources.
//!
//! - Synthetic test pattern (`stub://rgb`, `stub://jpeg`)
//! - USB/V4L2 devices (feature: camera-v4l2), e.g. `/dev/video0`
//!
//! Sources hand out owned `Frame`s and take them back through
//! `FrameSource::release`. The stream loop never keeps a frame across two
//! captures.

pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::FrameSource;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Camera selection and geometry.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// `stub://rgb`, `stub://jpeg`, or a V4L2 device path.
    pub source: String,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "stub://rgb".to_string(),
            width: 320,
            height: 240,
        }
    }
}

/// Open the source named by `config.source`.
pub fn open_camera(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    if config.source.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(config.clone())?));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        let mut camera = V4l2Camera::new(config.clone());
        camera.connect()?;
        Ok(Box::new(camera))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        anyhow::bail!(
            "camera '{}' requires the camera-v4l2 feature",
            config.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_sources() -> Result<()> {
        let mut camera = open_camera(&CameraConfig::default())?;
        let frame = camera.acquire()?;
        assert_eq!((frame.width, frame.height), (320, 240));
        camera.release(frame);
        Ok(())
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn device_paths_need_v4l2_feature() {
        let config = CameraConfig {
            source: "/dev/video0".to_string(),
            ..CameraConfig::default()
        };
        assert!(open_camera(&config).is_err());
    }
}
