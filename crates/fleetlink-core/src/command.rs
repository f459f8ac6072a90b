//! Command validation.
//!
//! Commands arrive either as HTTP JSON bodies or as flat string field maps
//! read back from the command stream. Both paths funnel through the same
//! validation before anything reaches a device.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commands a device accepts. Matching is case-insensitive.
const ALLOWED_COMMANDS: [&str; 6] = ["forward", "backward", "left", "right", "stop", "setspeed"];

/// Inclusive motor speed bounds.
const SPEED_RANGE: std::ops::RangeInclusive<i64> = 0..=255;

/// Validation failure for a command payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// `command` is not in the allowed set.
    #[error("unsupported command '{0}'")]
    UnsupportedCommand(String),

    /// A speed field is outside `0..=255`.
    #[error("{0} must be between 0 and 255")]
    SpeedOutOfRange(&'static str),

    /// A numeric field failed to parse from its stream string form.
    #[error("{0} is not a valid integer")]
    NotAnInteger(&'static str),

    /// `deviceId` is missing or blank.
    #[error("deviceId is required")]
    MissingDeviceId,

    /// `command` is missing.
    #[error("command is required")]
    MissingCommand,
}

/// A command body sent to a device.
///
/// Optional fields are omitted from every serialized form, so devices only
/// see the knobs the sender actually set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    /// Drive command, lowercased during validation.
    pub command: String,
    /// Left motor speed, `0..=255`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_speed: Option<i64>,
    /// Right motor speed, `0..=255`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_speed: Option<i64>,
    /// Sender-assigned sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    /// Sender-assigned ISO-8601 timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl CommandPayload {
    /// Validate and normalize the payload (command lowercased, speeds
    /// range-checked).
    pub fn validated(mut self) -> Result<Self, CommandError> {
        self.command = self.command.trim().to_lowercase();
        if !ALLOWED_COMMANDS.contains(&self.command.as_str()) {
            return Err(CommandError::UnsupportedCommand(self.command));
        }
        check_speed(self.left_speed, "leftSpeed")?;
        check_speed(self.right_speed, "rightSpeed")?;
        Ok(self)
    }

    /// JSON object form with `None` fields omitted, as forwarded to the
    /// device socket.
    pub fn to_object(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let _ = map.insert("command".to_string(), Value::String(self.command.clone()));
        if let Some(v) = self.left_speed {
            let _ = map.insert("leftSpeed".to_string(), Value::from(v));
        }
        if let Some(v) = self.right_speed {
            let _ = map.insert("rightSpeed".to_string(), Value::from(v));
        }
        if let Some(v) = self.sequence {
            let _ = map.insert("sequence".to_string(), Value::from(v));
        }
        if let Some(ref v) = self.timestamp {
            let _ = map.insert("timestamp".to_string(), Value::String(v.clone()));
        }
        map
    }
}

/// A command stream entry: a validated payload plus the target device ID.
///
/// The device ID addresses the entry and is never forwarded to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommand {
    /// Target device.
    pub device_id: String,
    /// Validated command body.
    pub payload: CommandPayload,
}

impl StreamCommand {
    /// Validate a flat string field map from a stream entry.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, CommandError> {
        let device_id = fields
            .get("deviceId")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(CommandError::MissingDeviceId)?
            .to_string();
        let command = fields
            .get("command")
            .cloned()
            .ok_or(CommandError::MissingCommand)?;
        let payload = CommandPayload {
            command,
            left_speed: parse_int(fields, "leftSpeed")?,
            right_speed: parse_int(fields, "rightSpeed")?,
            sequence: parse_int(fields, "sequence")?,
            timestamp: fields.get("timestamp").cloned(),
        }
        .validated()?;
        Ok(Self { device_id, payload })
    }

    /// Flat string fields for appending to the command stream.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("deviceId".to_string(), self.device_id.clone()),
            ("command".to_string(), self.payload.command.clone()),
        ];
        if let Some(v) = self.payload.left_speed {
            fields.push(("leftSpeed".to_string(), v.to_string()));
        }
        if let Some(v) = self.payload.right_speed {
            fields.push(("rightSpeed".to_string(), v.to_string()));
        }
        if let Some(v) = self.payload.sequence {
            fields.push(("sequence".to_string(), v.to_string()));
        }
        if let Some(ref v) = self.payload.timestamp {
            fields.push(("timestamp".to_string(), v.clone()));
        }
        fields
    }
}

fn check_speed(value: Option<i64>, field: &'static str) -> Result<(), CommandError> {
    match value {
        Some(v) if !SPEED_RANGE.contains(&v) => Err(CommandError::SpeedOutOfRange(field)),
        _ => Ok(()),
    }
}

fn parse_int(
    fields: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<i64>, CommandError> {
    match fields.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| CommandError::NotAnInteger(key)),
    }
}
