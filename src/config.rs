use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::camera::CameraConfig;
use crate::motion::DEFAULT_SPEED;
use crate::pwm::ChannelMap;

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CAMERA: &str = "stub://rgb";
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_PWM_BACKEND: &str = "memory";
const DEFAULT_PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";
const DEFAULT_PWM_FREQUENCY_HZ: u32 = 2000;

#[derive(Debug, Deserialize, Default)]
struct CarConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    pwm: Option<PwmConfigFile>,
    motion: Option<MotionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    bind: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PwmConfigFile {
    backend: Option<String>,
    chip: Option<PathBuf>,
    frequency_hz: Option<u32>,
    channels: Option<ChannelsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ChannelsConfigFile {
    left_forward: Option<u32>,
    left_reverse: Option<u32>,
    right_forward: Option<u32>,
    right_reverse: Option<u32>,
    flash: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    default_speed: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PwmBackend {
    Memory,
    Sysfs,
}

impl PwmBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(PwmBackend::Memory),
            "sysfs" => Ok(PwmBackend::Sysfs),
            other => Err(anyhow!(
                "unknown pwm backend '{}'; expected memory or sysfs",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CarConfig {
    pub bind: String,
    /// Control port; the stream listener uses `port + 1`.
    pub port: u16,
    pub camera: CameraConfig,
    pub pwm: PwmSettings,
    pub default_speed: u8,
}

#[derive(Debug, Clone)]
pub struct PwmSettings {
    pub backend: PwmBackend,
    pub chip: PathBuf,
    pub frequency_hz: u32,
    pub channels: ChannelMap,
}

impl CarConfig {
    /// Load from `CAMCAR_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMCAR_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn stream_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port.wrapping_add(1))
    }

    fn from_file(file: CarConfigFile) -> Result<Self> {
        let server = file.server.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let pwm = file.pwm.unwrap_or_default();
        let channels = pwm.channels.unwrap_or_default();
        let defaults = ChannelMap::default();
        let backend = match pwm.backend.as_deref() {
            Some(value) => PwmBackend::parse(value)?,
            None => PwmBackend::parse(DEFAULT_PWM_BACKEND)?,
        };
        Ok(Self {
            bind: server.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port: server.port.unwrap_or(DEFAULT_PORT),
            camera: CameraConfig {
                source: camera.source.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
            },
            pwm: PwmSettings {
                backend,
                chip: pwm.chip.unwrap_or_else(|| PathBuf::from(DEFAULT_PWM_CHIP)),
                frequency_hz: pwm.frequency_hz.unwrap_or(DEFAULT_PWM_FREQUENCY_HZ),
                channels: ChannelMap {
                    left_forward: channels.left_forward.unwrap_or(defaults.left_forward),
                    left_reverse: channels.left_reverse.unwrap_or(defaults.left_reverse),
                    right_forward: channels.right_forward.unwrap_or(defaults.right_forward),
                    right_reverse: channels.right_reverse.unwrap_or(defaults.right_reverse),
                    flash: channels.flash.unwrap_or(defaults.flash),
                },
            },
            default_speed: file
                .motion
                .and_then(|motion| motion.default_speed)
                .unwrap_or(DEFAULT_SPEED),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var("CAMCAR_BIND") {
            if !bind.trim().is_empty() {
                self.bind = bind.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("CAMCAR_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMCAR_PORT must be a port number"))?;
        }
        if let Ok(source) = std::env::var("CAMCAR_CAMERA") {
            if !source.trim().is_empty() {
                self.camera.source = source.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("CAMCAR_PWM_BACKEND") {
            self.pwm.backend = PwmBackend::parse(&backend)?;
        }
        if let Ok(chip) = std::env::var("CAMCAR_PWM_CHIP") {
            if !chip.trim().is_empty() {
                self.pwm.chip = PathBuf::from(chip.trim());
            }
        }
        if let Ok(speed) = std::env::var("CAMCAR_SPEED") {
            self.default_speed = speed
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMCAR_SPEED must be an integer between 0 and 255"))?;
        }
        Ok(())
    }

    /// Re-check after CLI overrides have been applied on top of `load()`.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port must be greater than zero"));
        }
        if self.port == u16::MAX {
            return Err(anyhow!(
                "port {} leaves no room for the stream port",
                self.port
            ));
        }
        self.bind
            .parse::<std::net::IpAddr>()
            .map_err(|_| anyhow!("bind address '{}' is not an IP address", self.bind))?;
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.pwm.frequency_hz == 0 {
            return Err(anyhow!("pwm frequency must be greater than zero"));
        }
        self.pwm.channels.validate()?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CarConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
