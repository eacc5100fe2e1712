//! PWM outputs for the drive motors and the flash LED.
//!
//! Duties are expressed on the 8-bit scale the control API uses (0-255).
//! Backends:
//! - `MemoryPwm`: keeps duties in memory (dry runs, tests)
//! - `SysfsPwm`: Linux `/sys/class/pwm` channels

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Logical PWM output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    LeftForward,
    LeftReverse,
    RightForward,
    RightReverse,
    Flash,
}

impl Channel {
    /// Motor channels in direction-table column order.
    pub const MOTORS: [Channel; 4] = [
        Channel::LeftForward,
        Channel::LeftReverse,
        Channel::RightForward,
        Channel::RightReverse,
    ];

    pub const ALL: [Channel; 5] = [
        Channel::LeftForward,
        Channel::LeftReverse,
        Channel::RightForward,
        Channel::RightReverse,
        Channel::Flash,
    ];

    pub fn index(self) -> usize {
        match self {
            Channel::LeftForward => 0,
            Channel::LeftReverse => 1,
            Channel::RightForward => 2,
            Channel::RightReverse => 3,
            Channel::Flash => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::LeftForward => "left_forward",
            Channel::LeftReverse => "left_reverse",
            Channel::RightForward => "right_forward",
            Channel::RightReverse => "right_reverse",
            Channel::Flash => "flash",
        }
    }
}

/// PWM peripheral boundary.
pub trait PwmOutput: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Write an 8-bit duty to one channel.
    fn set_duty(&mut self, channel: Channel, duty: u8) -> Result<()>;
}

/// Physical output index per logical channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMap {
    pub left_forward: u32,
    pub left_reverse: u32,
    pub right_forward: u32,
    pub right_reverse: u32,
    pub flash: u32,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            left_forward: 0,
            left_reverse: 1,
            right_forward: 2,
            right_reverse: 3,
            flash: 4,
        }
    }
}

impl ChannelMap {
    pub fn output(&self, channel: Channel) -> u32 {
        match channel {
            Channel::LeftForward => self.left_forward,
            Channel::LeftReverse => self.left_reverse,
            Channel::RightForward => self.right_forward,
            Channel::RightReverse => self.right_reverse,
            Channel::Flash => self.flash,
        }
    }

    /// Reject maps that bind two logical channels to the same output.
    pub fn validate(&self) -> Result<()> {
        for (i, a) in Channel::ALL.iter().enumerate() {
            for b in &Channel::ALL[i + 1..] {
                if self.output(*a) == self.output(*b) {
                    return Err(anyhow!(
                        "pwm channels {} and {} share output {}",
                        a.name(),
                        b.name(),
                        self.output(*a)
                    ));
                }
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory backend
// ----------------------------------------------------------------------------

/// In-memory PWM. Clones share the same duty table, so a test can keep a probe
/// while the motion controller owns the output.
#[derive(Clone, Debug, Default)]
pub struct MemoryPwm {
    duties: Arc<Mutex<[u8; 5]>>,
}

impl MemoryPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duty(&self, channel: Channel) -> u8 {
        self.duties.lock().map(|d| d[channel.index()]).unwrap_or(0)
    }

    /// Motor duties in direction-table order.
    pub fn motor_duties(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        for (slot, channel) in out.iter_mut().zip(Channel::MOTORS) {
            *slot = self.duty(channel);
        }
        out
    }
}

impl PwmOutput for MemoryPwm {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set_duty(&mut self, channel: Channel, duty: u8) -> Result<()> {
        let mut duties = self
            .duties
            .lock()
            .map_err(|_| anyhow!("memory pwm lock poisoned"))?;
        duties[channel.index()] = duty;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Linux sysfs backend
// ----------------------------------------------------------------------------

/// Linux sysfs PWM (`/sys/class/pwm/pwmchipN/pwmM`).
pub struct SysfsPwm {
    chip: PathBuf,
    map: ChannelMap,
    period_ns: u64,
}

impl SysfsPwm {
    /// Export and enable every mapped channel at `frequency_hz`, duty 0.
    pub fn open(chip: impl AsRef<Path>, map: ChannelMap, frequency_hz: u32) -> Result<Self> {
        if frequency_hz == 0 {
            return Err(anyhow!("pwm frequency must be greater than zero"));
        }
        map.validate()?;
        let pwm = Self {
            chip: chip.as_ref().to_path_buf(),
            map,
            period_ns: 1_000_000_000 / frequency_hz as u64,
        };
        for channel in Channel::ALL {
            pwm.export(channel)?;
        }
        log::info!(
            "SysfsPwm: {} ready ({} ns period)",
            pwm.chip.display(),
            pwm.period_ns
        );
        Ok(pwm)
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    fn channel_dir(&self, channel: Channel) -> PathBuf {
        self.chip.join(format!("pwm{}", self.map.output(channel)))
    }

    fn export(&self, channel: Channel) -> Result<()> {
        let dir = self.channel_dir(channel);
        if !dir.exists() {
            let index = self.map.output(channel);
            write_attr(&self.chip.join("export"), &index.to_string())
                .with_context(|| format!("export pwm output {} ({})", index, channel.name()))?;
        }
        write_attr(&dir.join("duty_cycle"), "0")?;
        write_attr(&dir.join("period"), &self.period_ns.to_string())?;
        write_attr(&dir.join("enable"), "1")?;
        Ok(())
    }

    fn duty_ns(&self, duty: u8) -> u64 {
        self.period_ns * duty as u64 / 255
    }
}

impl PwmOutput for SysfsPwm {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn set_duty(&mut self, channel: Channel, duty: u8) -> Result<()> {
        let path = self.channel_dir(channel).join("duty_cycle");
        write_attr(&path, &self.duty_ns(duty).to_string())
            .with_context(|| format!("set {} duty to {}", channel.name(), duty))
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).with_context(|| format!("write {}", path.display()))
}
