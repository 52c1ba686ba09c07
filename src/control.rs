//! Actuator command handling for the feeder servo and the aerator motor.
//!
//! Both actuators obey the same three commands, so one resolver serves both
//! and the two can never drift apart:
//!
//! ```text
//! off               -> Off, speed 0
//! on [speed]        -> On at speed (default 50); speed 0 resolves to Off
//! setspeed [speed]  -> On at speed (default 50); speed 0 resolves to Off
//! ```
//!
//! Operator commands are strict: an unknown action or a speed outside
//! `[0, 100]` is an error the caller maps to a 400. This is the opposite of
//! telemetry ingestion, where malformed input degrades to absent fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Speed used when `on`/`setspeed` arrives without an explicit value.
pub const DEFAULT_ON_SPEED: i64 = 50;

/// Actuator speeds are duty-cycle percentages.
pub const MAX_SPEED: i64 = 100;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorStatus {
    On,
    Off,
}

impl ActuatorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActuatorStatus::On => "on",
            ActuatorStatus::Off => "off",
        }
    }

    /// Parse a persisted status string. Anything unrecognized reads as
    /// `Off` is the safe state for both actuators.
    pub fn parse(s: &str) -> ActuatorStatus {
        match s {
            "on" => ActuatorStatus::On,
            _ => ActuatorStatus::Off,
        }
    }
}

/// Which physical actuator a command targets. Selects the column pair in
/// the control document and the field names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    Feeder,
    Motor,
}

impl Actuator {
    pub fn as_str(self) -> &'static str {
        match self {
            Actuator::Feeder => "feeder",
            Actuator::Motor => "motor",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid action '{0}' (expected on, off, or setspeed)")]
    InvalidAction(String),
    #[error("invalid speed: {0}")]
    InvalidSpeed(String),
}

// ---------------------------------------------------------------------------
// Command resolution
// ---------------------------------------------------------------------------

/// Resolve a command payload into the `(status, speed)` pair to persist.
///
/// The result always satisfies `speed == 0 <=> status == Off`, which is the
/// invariant every write path must maintain.
pub fn resolve_command(payload: &Value) -> Result<(ActuatorStatus, i64), CommandError> {
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match action {
        // `off` never inspects the speed field; a stop must always work.
        "off" => Ok((ActuatorStatus::Off, 0)),
        "on" | "setspeed" => {
            let speed = parse_speed(payload)?;
            if speed == 0 {
                Ok((ActuatorStatus::Off, 0))
            } else {
                Ok((ActuatorStatus::On, speed))
            }
        }
        other => Err(CommandError::InvalidAction(other.to_string())),
    }
}

/// Speeds must be JSON integers in `[0, MAX_SPEED]`. Strings, floats, and
/// out-of-range values are rejected rather than coerced.
fn parse_speed(payload: &Value) -> Result<i64, CommandError> {
    let v = match payload.get("speed") {
        None | Some(Value::Null) => return Ok(DEFAULT_ON_SPEED),
        Some(v) => v,
    };
    let speed = v
        .as_i64()
        .ok_or_else(|| CommandError::InvalidSpeed(format!("expected an integer, got {v}")))?;
    if !(0..=MAX_SPEED).contains(&speed) {
        return Err(CommandError::InvalidSpeed(format!(
            "{speed} out of range [0, {MAX_SPEED}]"
        )));
    }
    Ok(speed)
}

// ===========================================================================
// Tests
// ===========================================================================
