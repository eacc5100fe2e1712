//! camcar - camera robot car service
//!
//! Two HTTP listeners share one process:
//!
//! - **control** (base port): the control page, `/control?var=..&val=..`
//!   commands for drive speed, direction and flash, and a `/status` snapshot.
//! - **stream** (base port + 1): `/stream`, an endless
//!   `multipart/x-mixed-replace` MJPEG response.
//!
//! # Module Structure
//!
//! - `frame`: captured frames and the `FrameSource` trait
//! - `camera`: frame sources (synthetic, V4L2)
//! - `encode`: JPEG fallback for raw frames
//! - `pwm`: PWM outputs (memory, Linux sysfs)
//! - `motion`: drive speed, direction table and motion state
//! - `command`: `/control` parsing and dispatch
//! - `http`: request parsing, responses, chunked writer
//! - `server`: the two listeners
//! - `config`: layered configuration (file, env)

pub mod camera;
pub mod command;
pub mod config;
pub mod encode;
pub mod frame;
pub mod http;
pub mod motion;
pub mod pwm;
pub mod server;

pub use camera::{open_camera, CameraConfig, SyntheticCamera};
#[cfg(feature = "camera-v4l2")]
pub use camera::V4l2Camera;
pub use command::{Command, CommandError};
pub use encode::{ImageJpegEncoder, JpegEncoder, STREAM_JPEG_QUALITY};
pub use frame::{Frame, FrameSource, PixelFormat};
pub use motion::{DriveAction, MotionController, MotionSnapshot, MotionState, SharedMotion};
pub use pwm::{Channel, ChannelMap, MemoryPwm, PwmOutput, SysfsPwm};
pub use server::control::ControlConfig;
pub use server::stream::{SharedCamera, StreamConfig};
pub use server::{ControlServer, ServerHandle, StreamServer};
