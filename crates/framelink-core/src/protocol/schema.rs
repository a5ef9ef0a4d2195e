//! Argument schemas for the control command vocabulary.
//!
//! Decoding only checks that a message is well formed.  [`validate`] then
//! checks it against the command's schema: every required argument present,
//! no unexpected keys, every value of the right kind.

use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::{CommandName, ControlMessage};

/// Type of a single argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Finite `f64`.
    Float,
    /// `u32`, zero allowed.
    UInt,
    /// `u32` greater than zero.
    PositiveUInt,
    /// `true` or `false`.
    Bool,
    /// Any string, including empty.
    Text,
    /// One of a fixed set of lower-case words.
    Choice(&'static [&'static str]),
}

/// One argument accepted by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub key: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

const fn req(key: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec { key, kind, required: true }
}

const fn opt(key: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec { key, kind, required: false }
}

/// Output formats accepted by `SET_FORMAT`.
pub const FORMAT_CHOICES: &[&str] = &["color", "grayscale", "jpeg", "grayscale_jpeg", "png"];

const TRANSFORM: &[ArgSpec] = &[
    opt("target", ArgKind::Text),
    req("x", ArgKind::Float),
    req("y", ArgKind::Float),
    req("z", ArgKind::Float),
    req("pitch", ArgKind::Float),
    req("yaw", ArgKind::Float),
    req("roll", ArgKind::Float),
];
const SET_CAPTURE: &[ArgSpec] = &[req("enabled", ArgKind::Bool), opt("camera", ArgKind::Text)];
const SET_CADENCE: &[ArgSpec] = &[
    req("every", ArgKind::PositiveUInt),
    opt("interval_ms", ArgKind::UInt),
    opt("camera", ArgKind::Text),
];
const SET_FORMAT: &[ArgSpec] = &[
    req("format", ArgKind::Choice(FORMAT_CHOICES)),
    opt("camera", ArgKind::Text),
];
const SET_RESOLUTION: &[ArgSpec] = &[
    req("width", ArgKind::PositiveUInt),
    req("height", ArgKind::PositiveUInt),
    opt("camera", ArgKind::Text),
];
const NO_ARGS: &[ArgSpec] = &[];
const ERROR_REPLY: &[ArgSpec] = &[req("code", ArgKind::Text), opt("reason", ArgKind::Text)];

impl CommandName {
    /// The argument schema, or `None` for free-form replies (`OK`).
    pub fn schema(self) -> Option<&'static [ArgSpec]> {
        match self {
            CommandName::CameraTransform | CommandName::ActorTransform => Some(TRANSFORM),
            CommandName::SetCapture => Some(SET_CAPTURE),
            CommandName::SetCadence => Some(SET_CADENCE),
            CommandName::SetFormat => Some(SET_FORMAT),
            CommandName::SetResolution => Some(SET_RESOLUTION),
            CommandName::Ping | CommandName::Stats => Some(NO_ARGS),
            CommandName::Ok => None,
            CommandName::Error => Some(ERROR_REPLY),
        }
    }
}

/// Checks `msg` against the schema of its command.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidArgument`] naming the first offending key.
pub fn validate(msg: &ControlMessage) -> Result<(), ProtocolError> {
    let Some(schema) = msg.command.schema() else {
        return Ok(());
    };

    let invalid = |key: &str, reason: String| ProtocolError::InvalidArgument {
        command: msg.command,
        key: key.to_string(),
        reason,
    };

    for (key, value) in &msg.args {
        let spec = schema
            .iter()
            .find(|s| s.key == key)
            .ok_or_else(|| invalid(key, "unexpected argument".to_string()))?;
        check_kind(spec.kind, value).map_err(|reason| invalid(key, reason))?;
    }

    for spec in schema.iter().filter(|s| s.required) {
        if msg.arg(spec.key).is_none() {
            return Err(invalid(spec.key, "missing".to_string()));
        }
    }

    Ok(())
}

fn check_kind(kind: ArgKind, value: &str) -> Result<(), String> {
    match kind {
        ArgKind::Float => match value.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(()),
            _ => Err(format!("expected a finite number, got `{value}`")),
        },
        ArgKind::UInt => value
            .parse::<u32>()
            .map(|_| ())
            .map_err(|_| format!("expected an unsigned integer, got `{value}`")),
        ArgKind::PositiveUInt => match value.parse::<u32>() {
            Ok(v) if v > 0 => Ok(()),
            _ => Err(format!("expected a positive integer, got `{value}`")),
        },
        ArgKind::Bool => match value {
            "true" | "false" => Ok(()),
            _ => Err(format!("expected true or false, got `{value}`")),
        },
        ArgKind::Text => Ok(()),
        ArgKind::Choice(choices) => {
            if choices.contains(&value) {
                Ok(())
            } else {
                Err(format!("expected one of {choices:?}, got `{value}`"))
            }
        }
    }
}
