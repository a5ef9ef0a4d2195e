//! Decoder for the JSON control format used by older controllers.
//!
//! ```json
//! {"type": "camera_transform", "target_id": "cam0",
//!  "location": {"x": 0, "y": 0, "z": 200},
//!  "rotation": {"pitch": 0, "yaw": 90, "roll": 0},
//!  "message_id": "6a1f..."}
//! ```
//!
//! `target_id` takes precedence over `camera_id`.  Missing `location` or
//! `rotation` objects default to zero, as do missing fields inside them.
//! The result is the equivalent text-protocol [`ControlMessage`].

use serde::Deserialize;
use tracing::trace;

use crate::domain::transform::{Rotation, Transform, TransformKind, Vector3};
use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::ControlMessage;

#[derive(Debug, Deserialize)]
struct LegacyCommand {
    #[serde(rename = "type")]
    kind: String,
    target_id: Option<String>,
    camera_id: Option<String>,
    #[serde(default)]
    location: Vector3,
    #[serde(default)]
    rotation: Rotation,
    message_id: Option<String>,
}

/// Returns `true` if `bytes` looks like a JSON object (first non-blank byte
/// is `{`).
pub fn is_json_object(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

/// Decodes a JSON legacy command into a [`ControlMessage`].
///
/// # Errors
///
/// - [`ProtocolError::MalformedMessage`] if the JSON does not parse or lacks
///   a `type` field.
/// - [`ProtocolError::UnknownCommand`] if `type` is not `camera_transform` or
///   `actor_transform`.
pub fn decode_control_json(bytes: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let legacy: LegacyCommand = serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid JSON command: {e}")))?;

    let kind = match legacy.kind.as_str() {
        "camera_transform" => TransformKind::Camera,
        "actor_transform" => TransformKind::Actor,
        other => return Err(ProtocolError::UnknownCommand(other.to_string())),
    };

    let transform = Transform {
        kind,
        target: legacy.target_id.or(legacy.camera_id),
        location: legacy.location,
        rotation: legacy.rotation,
    };

    let mut msg = transform.to_message();
    msg.request_id = legacy.message_id;
    trace!(command = %msg.command, "decoded legacy JSON command");
    Ok(msg)
}
