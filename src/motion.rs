//! Motion controller: drive speed, direction table and motion state.
//!
//! One `MotionController` owns the PWM output. The HTTP side shares it as
//! `SharedMotion` (one lock), so a drive action always writes all four motor
//! channels before any other command can observe or change them.
//!
//! Each directional action records a movement interval hint and a timestamp.
//! Nothing consumes them to stop the car; a command client that wants the car
//! to halt sends `car=3`.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::pwm::{Channel, PwmOutput};

/// Speed used until a `speed` command arrives.
pub const DEFAULT_SPEED: u8 = 255;

/// Interval hint recorded for straight motion.
pub const STRAIGHT_INTERVAL: Duration = Duration::from_millis(350);

/// Interval hint recorded for turns.
pub const TURN_INTERVAL: Duration = Duration::from_millis(100);

pub type SharedMotion = Arc<Mutex<MotionController>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionState {
    Stopped,
    Moving,
}

/// Drive actions, numbered as the `car` command numbers them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveAction {
    Forward,
    TurnLeft,
    Stop,
    TurnRight,
    Reverse,
}

impl DriveAction {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(DriveAction::Forward),
            2 => Some(DriveAction::TurnLeft),
            3 => Some(DriveAction::Stop),
            4 => Some(DriveAction::TurnRight),
            5 => Some(DriveAction::Reverse),
            _ => None,
        }
    }

    /// Duties for [left-fwd, left-rev, right-fwd, right-rev].
    ///
    /// The turn rows keep the car's established wiring labels: "left" spins the
    /// left side backwards and "right" spins the right side backwards.
    pub fn duties(self, speed: u8) -> [u8; 4] {
        match self {
            DriveAction::Forward => [speed, 0, speed, 0],
            DriveAction::Reverse => [0, speed, 0, speed],
            DriveAction::TurnLeft => [0, speed, speed, 0],
            DriveAction::TurnRight => [speed, 0, 0, speed],
            DriveAction::Stop => [0, 0, 0, 0],
        }
    }

    pub fn movement_interval(self) -> Option<Duration> {
        match self {
            DriveAction::Forward | DriveAction::Reverse => Some(STRAIGHT_INTERVAL),
            DriveAction::TurnLeft | DriveAction::TurnRight => Some(TURN_INTERVAL),
            DriveAction::Stop => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DriveAction::Forward => "forward",
            DriveAction::TurnLeft => "turn-left",
            DriveAction::Stop => "stop",
            DriveAction::TurnRight => "turn-right",
            DriveAction::Reverse => "reverse",
        }
    }
}

/// Read-only view served by `/status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MotionSnapshot {
    pub state: MotionState,
    pub speed: u8,
    pub flash: u8,
    pub duties: [u8; 4],
    pub movement_interval_ms: Option<u64>,
}

pub struct MotionController {
    pwm: Box<dyn PwmOutput>,
    speed: u8,
    flash: u8,
    state: MotionState,
    duties: [u8; 4],
    movement_interval: Option<Duration>,
    last_command_at: Option<Instant>,
}

impl MotionController {
    /// Take ownership of the PWM output and put every channel at rest.
    pub fn new(pwm: Box<dyn PwmOutput>, speed: u8) -> Result<Self> {
        let mut controller = Self {
            pwm,
            speed,
            flash: 0,
            state: MotionState::Stopped,
            duties: [0; 4],
            movement_interval: None,
            last_command_at: None,
        };
        controller.write_motors([0; 4])?;
        controller
            .pwm
            .set_duty(Channel::Flash, 0)
            .context("reset flash output")?;
        log::info!(
            "MotionController: {} pwm ready, speed {}",
            controller.pwm.name(),
            speed
        );
        Ok(controller)
    }

    pub fn into_shared(self) -> SharedMotion {
        Arc::new(Mutex::new(self))
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn flash(&self) -> u8 {
        self.flash
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn duties(&self) -> [u8; 4] {
        self.duties
    }

    pub fn movement_interval(&self) -> Option<Duration> {
        self.movement_interval
    }

    pub fn last_command_at(&self) -> Option<Instant> {
        self.last_command_at
    }

    /// Store a new drive speed, clamped to the duty range. Takes effect on the
    /// next drive action.
    pub fn set_speed(&mut self, requested: i64) -> u8 {
        self.speed = clamp_duty(requested);
        self.speed
    }

    /// Write the flash LED duty, clamped to the duty range.
    pub fn set_flash(&mut self, requested: i64) -> Result<u8> {
        let duty = clamp_duty(requested);
        self.pwm
            .set_duty(Channel::Flash, duty)
            .context("set flash duty")?;
        self.flash = duty;
        Ok(duty)
    }

    pub fn drive(&mut self, action: DriveAction) -> Result<()> {
        self.write_motors(action.duties(self.speed))?;
        if action == DriveAction::Stop {
            self.state = MotionState::Stopped;
        } else {
            self.state = MotionState::Moving;
            self.movement_interval = action.movement_interval();
            self.last_command_at = Some(Instant::now());
        }
        log::debug!(
            "MotionController: {} -> {:?} {:?}",
            action.name(),
            self.state,
            self.duties
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.drive(DriveAction::Stop)
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        MotionSnapshot {
            state: self.state,
            speed: self.speed,
            flash: self.flash,
            duties: self.duties,
            movement_interval_ms: self.movement_interval.map(|d| d.as_millis() as u64),
        }
    }

    /// Channels going to zero are written before channels being driven, so
    /// neither side ever has forward and reverse duty at once, not even
    /// between two writes. A failed write leaves the motors stopped.
    fn write_motors(&mut self, duties: [u8; 4]) -> Result<()> {
        let releasing = (0..4).filter(move |&i| duties[i] == 0);
        let driving = (0..4).filter(move |&i| duties[i] != 0);
        for i in releasing.chain(driving) {
            let channel = Channel::MOTORS[i];
            if let Err(err) = self.pwm.set_duty(channel, duties[i]) {
                self.halt();
                return Err(err.context(format!("write {} duty", channel.name())));
            }
            self.duties[i] = duties[i];
        }
        Ok(())
    }

    fn halt(&mut self) {
        for (i, channel) in Channel::MOTORS.into_iter().enumerate() {
            match self.pwm.set_duty(channel, 0) {
                Ok(()) => self.duties[i] = 0,
                Err(err) => log::error!(
                    "MotionController: could not zero {}: {:#}",
                    channel.name(),
                    err
                ),
            }
        }
        self.state = MotionState::Stopped;
    }
}

/// Lock the shared controller.
pub fn lock(motion: &Mutex<MotionController>) -> Result<MutexGuard<'_, MotionController>> {
    motion
        .lock()
        .map_err(|_| anyhow!("motion controller lock poisoned"))
}

fn clamp_duty(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwm::MemoryPwm;

    fn controller(speed: u8) -> (MotionController, MemoryPwm) {
        let probe = MemoryPwm::new();
        let controller = MotionController::new(Box::new(probe.clone()), speed).expect("controller");
        (controller, probe)
    }

    #[test]
    fn direction_table_matches_every_action() -> Result<()> {
        let (mut motion, probe) = controller(180);
        let expected = [
            (1, [180, 0, 180, 0]),
            (2, [0, 180, 180, 0]),
            (3, [0, 0, 0, 0]),
            (4, [180, 0, 0, 180]),
            (5, [0, 180, 0, 180]),
        ];
        for (code, duties) in expected {
            let action = DriveAction::from_code(code).expect("known code");
            motion.drive(action)?;
            assert_eq!(probe.motor_duties(), duties, "car={}", code);
            assert_eq!(motion.duties(), duties);
        }
        Ok(())
    }

    #[test]
    fn unknown_codes_have_no_action() {
        for code in [0, 6, -1, 255] {
            assert_eq!(DriveAction::from_code(code), None);
        }
    }

    #[test]
    fn never_drives_both_directions_on_one_side() {
        for code in 1..=5 {
            let duties = DriveAction::from_code(code).expect("known").duties(255);
            assert!(duties[0] == 0 || duties[1] == 0);
            assert!(duties[2] == 0 || duties[3] == 0);
        }
    }

    /// Keeps every motor duty vector the hardware passes through and can be
    /// told to reject driving one channel.
    #[derive(Clone, Default)]
    struct TracingPwm {
        current: [u8; 4],
        history: Arc<Mutex<Vec<[u8; 4]>>>,
        reject: Option<Channel>,
    }

    impl TracingPwm {
        fn history(&self) -> Vec<[u8; 4]> {
            self.history.lock().expect("history").clone()
        }

        fn last(&self) -> [u8; 4] {
            self.history().last().copied().unwrap_or([0; 4])
        }
    }

    impl PwmOutput for TracingPwm {
        fn name(&self) -> &'static str {
            "tracing"
        }

        fn set_duty(&mut self, channel: Channel, duty: u8) -> Result<()> {
            if channel == Channel::Flash {
                return Ok(());
            }
            if self.reject == Some(channel) && duty != 0 {
                return Err(anyhow!("{} write failed", channel.name()));
            }
            self.current[channel.index()] = duty;
            self.history.lock().expect("history").push(self.current);
            Ok(())
        }
    }

    fn one_side_both_ways(duties: &[u8; 4]) -> bool {
        (duties[0] != 0 && duties[1] != 0) || (duties[2] != 0 && duties[3] != 0)
    }

    #[test]
    fn switching_actions_never_passes_through_conflicting_duties() -> Result<()> {
        let actions = [
            DriveAction::Forward,
            DriveAction::TurnLeft,
            DriveAction::Stop,
            DriveAction::TurnRight,
            DriveAction::Reverse,
        ];
        for from in actions {
            for to in actions {
                let pwm = TracingPwm::default();
                let mut motion = MotionController::new(Box::new(pwm.clone()), 200)?;
                motion.drive(from)?;
                motion.drive(to)?;
                let history = pwm.history();
                for duties in &history {
                    assert!(
                        !one_side_both_ways(duties),
                        "{} -> {} passed through {:?}",
                        from.name(),
                        to.name(),
                        duties
                    );
                }
                assert_eq!(pwm.last(), to.duties(200));
            }
        }
        Ok(())
    }

    #[test]
    fn failed_motor_write_leaves_the_car_stopped() -> Result<()> {
        let pwm = TracingPwm {
            reject: Some(Channel::RightForward),
            ..TracingPwm::default()
        };
        let mut motion = MotionController::new(Box::new(pwm.clone()), 200)?;
        motion.drive(DriveAction::TurnRight)?;
        assert_eq!(pwm.last(), [200, 0, 0, 200]);

        assert!(motion.drive(DriveAction::TurnLeft).is_err());
        assert_eq!(pwm.last(), [0, 0, 0, 0]);
        assert!(pwm.history().iter().all(|d| !one_side_both_ways(d)));
        assert_eq!(motion.duties(), [0, 0, 0, 0]);
        assert_eq!(motion.state(), MotionState::Stopped);
        Ok(())
    }

    #[test]
    fn stop_zeroes_motors_whatever_the_speed() -> Result<()> {
        let (mut motion, probe) = controller(DEFAULT_SPEED);
        motion.set_speed(97);
        motion.drive(DriveAction::Forward)?;
        assert_eq!(probe.motor_duties(), [97, 0, 97, 0]);
        assert_eq!(motion.state(), MotionState::Moving);

        motion.drive(DriveAction::Stop)?;
        assert_eq!(probe.motor_duties(), [0, 0, 0, 0]);
        assert_eq!(motion.state(), MotionState::Stopped);
        Ok(())
    }

    #[test]
    fn speed_clamps_and_applies_on_next_action() -> Result<()> {
        let (mut motion, probe) = controller(100);
        motion.drive(DriveAction::Forward)?;
        assert_eq!(motion.set_speed(300), 255);
        assert_eq!(probe.motor_duties(), [100, 0, 100, 0]);

        motion.drive(DriveAction::Reverse)?;
        assert_eq!(probe.motor_duties(), [0, 255, 0, 255]);
        assert_eq!(motion.set_speed(-20), 0);
        assert_eq!(motion.set_speed(42), 42);
        Ok(())
    }

    #[test]
    fn records_movement_interval_hints() -> Result<()> {
        let (mut motion, _probe) = controller(DEFAULT_SPEED);
        assert_eq!(motion.movement_interval(), None);
        assert!(motion.last_command_at().is_none());

        motion.drive(DriveAction::Forward)?;
        assert_eq!(motion.movement_interval(), Some(STRAIGHT_INTERVAL));
        motion.drive(DriveAction::TurnRight)?;
        assert_eq!(motion.movement_interval(), Some(TURN_INTERVAL));
        motion.drive(DriveAction::Stop)?;
        assert_eq!(motion.movement_interval(), Some(TURN_INTERVAL));
        assert!(motion.last_command_at().is_some());
        Ok(())
    }

    #[test]
    fn flash_duty_is_independent_of_motors() -> Result<()> {
        let (mut motion, probe) = controller(DEFAULT_SPEED);
        assert_eq!(motion.set_flash(512)?, 255);
        assert_eq!(probe.duty(Channel::Flash), 255);
        assert_eq!(probe.motor_duties(), [0, 0, 0, 0]);

        let snapshot = motion.snapshot();
        assert_eq!(snapshot.flash, 255);
        assert_eq!(snapshot.state, MotionState::Stopped);
        Ok(())
    }
}
