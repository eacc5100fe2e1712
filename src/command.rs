//! `/control` command parsing and dispatch.
//!
//! A command is `var=<name>&val=<int>`. Parsing is bounded: the raw query and
//! each value have a maximum length, and anything over it is treated the same
//! as a missing key.

use std::fmt;
use std::sync::Mutex;

use crate::motion::{self, DriveAction, MotionController};

/// Longest query string accepted by `/control`.
pub const MAX_QUERY_BYTES: usize = 512;

/// Longest `var` or `val` value accepted.
pub const MAX_VALUE_BYTES: usize = 31;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Flash LED duty (clamped to 0-255).
    Flash(i64),
    /// Drive speed for subsequent motion (clamped to 0-255).
    Speed(i64),
    /// Motion code, 1-5; other codes are accepted and ignored.
    Car(i64),
}

#[derive(Debug)]
pub enum CommandError {
    /// Missing, oversized or malformed query. Reported as 404.
    NotFound(String),
    /// `var` names nothing we control. Reported as 500.
    UnknownVariable(String),
    /// The command was valid but the outputs could not be written. Reported as 500.
    Output(anyhow::Error),
}

impl CommandError {
    pub fn status(&self) -> u16 {
        match self {
            CommandError::NotFound(_) => 404,
            CommandError::UnknownVariable(_) | CommandError::Output(_) => 500,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NotFound(reason) => write!(f, "bad command query: {}", reason),
            CommandError::UnknownVariable(var) => write!(f, "unknown command variable '{}'", var),
            CommandError::Output(err) => write!(f, "command output failed: {:#}", err),
        }
    }
}

impl std::error::Error for CommandError {}

/// Parse a raw (still percent-encoded) query string.
pub fn parse_query(query: Option<&str>) -> Result<Command, CommandError> {
    let query = query.unwrap_or("");
    if query.is_empty() {
        return Err(CommandError::NotFound("empty query".to_string()));
    }
    if query.len() > MAX_QUERY_BYTES {
        return Err(CommandError::NotFound(format!(
            "query longer than {} bytes",
            MAX_QUERY_BYTES
        )));
    }

    let var = query_value(query, "var")?;
    let val = query_value(query, "val")?;

    let build: fn(i64) -> Command = match var.as_str() {
        "flash" => Command::Flash,
        "speed" => Command::Speed,
        "car" => Command::Car,
        _ => return Err(CommandError::UnknownVariable(var.clone())),
    };
    let value: i64 = val
        .trim()
        .parse()
        .map_err(|_| CommandError::NotFound(format!("val '{}' is not an integer", val)))?;
    Ok(build(value))
}

fn query_value(query: &str, key: &str) -> Result<String, CommandError> {
    let value = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| CommandError::NotFound(format!("missing '{}'", key)))?;
    if value.is_empty() {
        return Err(CommandError::NotFound(format!("empty '{}'", key)));
    }
    if value.len() > MAX_VALUE_BYTES {
        return Err(CommandError::NotFound(format!(
            "'{}' longer than {} bytes",
            key, MAX_VALUE_BYTES
        )));
    }
    Ok(value)
}

/// Apply a parsed command to the shared controller.
pub fn dispatch(motion: &Mutex<MotionController>, command: Command) -> Result<(), CommandError> {
    let mut motion = motion::lock(motion).map_err(CommandError::Output)?;
    match command {
        Command::Flash(value) => {
            let duty = motion.set_flash(value).map_err(CommandError::Output)?;
            log::info!("flash duty {}", duty);
        }
        Command::Speed(value) => {
            let speed = motion.set_speed(value);
            log::info!("drive speed {}", speed);
        }
        Command::Car(code) => match DriveAction::from_code(code) {
            Some(action) => {
                motion.drive(action).map_err(CommandError::Output)?;
                log::info!("drive {}", action.name());
            }
            None => log::debug!("ignoring car code {}", code),
        },
    }
    Ok(())
}

/// Parse and apply one `/control` query.
pub fn handle_query(
    motion: &Mutex<MotionController>,
    query: Option<&str>,
) -> Result<Command, CommandError> {
    let command = parse_query(query)?;
    dispatch(motion, command)?;
    Ok(command)
}
