//! Typed view of the `CAMERA_TRANSFORM` / `ACTOR_TRANSFORM` commands.
//!
//! A transform moves and rotates one target in the host scene.  The target is
//! addressed by id; a missing or empty id is a broadcast that applies to every
//! target of the matching kind.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::{CommandName, ControlMessage};

/// Which kind of scene object a transform addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Camera,
    Actor,
}

impl TransformKind {
    pub fn command(self) -> CommandName {
        match self {
            TransformKind::Camera => CommandName::CameraTransform,
            TransformKind::Actor => CommandName::ActorTransform,
        }
    }
}

/// World-space location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Euler rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rotation {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// A location + rotation addressed to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub kind: TransformKind,
    /// `None` or empty broadcasts to every target of `kind`.
    pub target: Option<String>,
    pub location: Vector3,
    pub rotation: Rotation,
}

impl Transform {
    /// Extracts a transform from a validated control message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidArgument`] if `msg` is not a transform
    /// command or a coordinate is missing or unparsable.
    pub fn from_message(msg: &ControlMessage) -> Result<Self, ProtocolError> {
        let kind = match msg.command {
            CommandName::CameraTransform => TransformKind::Camera,
            CommandName::ActorTransform => TransformKind::Actor,
            other => {
                return Err(ProtocolError::InvalidArgument {
                    command: other,
                    key: "command".to_string(),
                    reason: "not a transform command".to_string(),
                })
            }
        };

        Ok(Self {
            kind,
            target: msg.arg("target").map(str::to_string),
            location: Vector3 {
                x: msg.require_arg("x")?,
                y: msg.require_arg("y")?,
                z: msg.require_arg("z")?,
            },
            rotation: Rotation {
                pitch: msg.require_arg("pitch")?,
                yaw: msg.require_arg("yaw")?,
                roll: msg.require_arg("roll")?,
            },
        })
    }

    /// Builds the equivalent control message (no request id).
    pub fn to_message(&self) -> ControlMessage {
        let mut msg = ControlMessage::new(self.kind.command());
        if let Some(target) = &self.target {
            msg = msg.with_arg("target", target);
        }
        msg.with_arg("x", self.location.x)
            .with_arg("y", self.location.y)
            .with_arg("z", self.location.z)
            .with_arg("pitch", self.rotation.pitch)
            .with_arg("yaw", self.rotation.yaw)
            .with_arg("roll", self.rotation.roll)
    }

    pub fn is_broadcast(&self) -> bool {
        self.target.as_deref().map_or(true, str::is_empty)
    }

    /// Returns `true` if this transform should move the object named `id`.
    pub fn applies_to(&self, id: &str) -> bool {
        self.is_broadcast() || self.target.as_deref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(target: Option<&str>) -> Transform {
        Transform {
            kind: TransformKind::Camera,
            target: target.map(str::to_string),
            location: Vector3 { x: 100.0, y: -20.5, z: 300.0 },
            rotation: Rotation { pitch: -10.0, yaw: 90.0, roll: 0.0 },
        }
    }

    #[test]
    fn test_transform_message_round_trip() {
        let transform = sample(Some("cam0"));
        let back = Transform::from_message(&transform.to_message()).unwrap();
        assert_eq!(back, transform);
    }

    #[test]
    fn test_targeted_transform_applies_only_to_its_target() {
        let transform = sample(Some("cam0"));
        assert!(transform.applies_to("cam0"));
        assert!(!transform.applies_to("cam1"));
    }

    #[test]
    fn test_missing_or_empty_target_is_broadcast() {
        assert!(sample(None).applies_to("anything"));
        assert!(sample(Some("")).applies_to("anything"));
    }

    #[test]
    fn test_from_message_rejects_non_transform_command() {
        let msg = ControlMessage::new(CommandName::Ping);
        assert!(Transform::from_message(&msg).is_err());
    }

    #[test]
    fn test_actor_transform_keeps_its_kind() {
        let mut transform = sample(Some("door"));
        transform.kind = TransformKind::Actor;
        let msg = transform.to_message();
        assert_eq!(msg.command, CommandName::ActorTransform);
        assert_eq!(Transform::from_message(&msg).unwrap().kind, TransformKind::Actor);
    }
}
