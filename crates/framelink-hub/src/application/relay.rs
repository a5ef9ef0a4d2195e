//! Relay: moves frames downstream and commands upstream.
//!
//! ```text
//!   host frames ──► upstream_frames (SUB) ──► downstream_frames (PUB) ──► consumers
//!   host commands ◄── upstream_control (PUB) ◄── downstream_control (SUB) ◄── consumers
//! ```
//!
//! Frames are forwarded untouched, topic included, so consumers keep
//! filtering by camera id.  Commands are decoded, validated and re-encoded
//! in the text format before they go upstream, which turns legacy JSON into
//! text and gives every command a request id.  Nothing here blocks: a full
//! downstream or upstream queue drops the message and counts it.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use framelink_core::protocol::{decode_control_json, is_json_object, validate, Envelope};
use framelink_core::{
    decode_control, encode_control, ControlMessage, ProtocolError, Rotation, Transform,
    TransformKind, Vector3,
};
use framelink_session::config::ConfigError;
use framelink_session::session::{SessionError, SessionEvent, SessionManager};
use framelink_session::transport::{Endpoint, Transport, TransportError};

use crate::application::stats::{RelaySnapshot, RelayStats};
use crate::infrastructure::config::HubConfig;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("relay is stopped")]
    Stopped,

    /// The named endpoint is reconnecting or has failed.
    #[error("endpoint `{0}` is offline")]
    Offline(String),

    #[error("could not encode command: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("upstream send failed: {0}")]
    Send(#[source] TransportError),
}

// ── Poll report ───────────────────────────────────────────────────────────────

/// What one relay pass did.
#[derive(Debug, Default, PartialEq)]
pub struct PollReport {
    pub session_events: Vec<SessionEvent>,
    pub frames_forwarded: usize,
    pub commands_forwarded: usize,
    /// Camera ids seen for the first time during this pass.
    pub new_cameras: Vec<String>,
}

// ── Command normalization ─────────────────────────────────────────────────────

/// Decodes a consumer's control message and prepares it for the host.
///
/// Accepts the text format and legacy JSON.  A missing or empty request id
/// is replaced by a fresh UUID v4.
///
/// # Errors
///
/// Returns the decode or validation error, or
/// [`ProtocolError::MalformedMessage`] for `OK`/`ERROR` replies, which only
/// the host sends.
pub fn normalize_command(bytes: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let mut msg = if is_json_object(bytes) {
        decode_control_json(bytes)?
    } else {
        decode_control(bytes)?
    };
    if msg.command.is_reply() {
        return Err(ProtocolError::MalformedMessage(format!(
            "{} is a reply, not a command",
            msg.command
        )));
    }
    validate(&msg)?;
    if msg.request_id.as_deref().map_or(true, str::is_empty) {
        msg.request_id = Some(Uuid::new_v4().to_string());
    }
    Ok(msg)
}

// ── Relay ─────────────────────────────────────────────────────────────────────

/// Endpoint names, resolved once from the config.
#[derive(Debug)]
struct Names {
    upstream_frames: String,
    downstream_frames: String,
    downstream_control: String,
    upstream_control: String,
}

pub struct Relay {
    session: SessionManager,
    names: Names,
    camera_filter: HashSet<String>,
    known_cameras: BTreeSet<String>,
    stats: Arc<RelayStats>,
    running: Arc<AtomicBool>,
    max_per_poll: usize,
    drain_timeout: Duration,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("session", &self.session)
            .field("names", &self.names)
            .field("known_cameras", &self.known_cameras)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Validates `config` and opens the four endpoints.
    ///
    /// # Errors
    ///
    /// [`RelayError::Config`] if the config is inconsistent (nothing is
    /// opened), or [`RelayError::Session`] if an endpoint fails to open (the
    /// ones already opened are closed again).
    pub fn start(config: &HubConfig, transport: Arc<dyn Transport>) -> Result<Self, RelayError> {
        config.validate()?;
        let session =
            SessionManager::start(config.endpoints(), config.reconnect.policy(), transport)?;
        info!(
            upstream = %config.upstream_frames.address,
            downstream = %config.downstream_frames.address,
            cameras = ?config.hub.camera_filter,
            "relay started"
        );
        Ok(Self {
            session,
            names: Names {
                upstream_frames: config.upstream_frames.name.clone(),
                downstream_frames: config.downstream_frames.name.clone(),
                downstream_control: config.downstream_control.name.clone(),
                upstream_control: config.upstream_control.name.clone(),
            },
            camera_filter: config.hub.camera_filter.iter().cloned().collect(),
            known_cameras: BTreeSet::new(),
            stats: Arc::new(RelayStats::new()),
            running: Arc::new(AtomicBool::new(true)),
            max_per_poll: config.hub.max_messages_per_poll.max(1),
            drain_timeout: config.hub.drain_timeout(),
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn stats(&self) -> RelaySnapshot {
        self.stats.snapshot()
    }

    /// Camera ids seen so far, sorted.
    pub fn known_cameras(&self) -> Vec<String> {
        self.known_cameras.iter().cloned().collect()
    }

    /// Flag polled by [`Relay::run`]; clear it to stop the relay.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// One relay pass: supervise endpoints, then move up to
    /// `max_messages_per_poll` frames and as many commands.
    pub fn poll(&mut self, now: Instant) -> PollReport {
        let mut report = PollReport {
            session_events: self.session.supervise(now),
            ..PollReport::default()
        };
        if self.session.is_stopped() {
            return report;
        }
        self.forward_frames(&mut report);
        self.forward_commands(&mut report);
        report
    }

    fn forward_frames(&mut self, report: &mut PollReport) {
        let Some(source) = self.session.endpoint(&self.names.upstream_frames) else {
            return;
        };
        let sink = self.session.endpoint(&self.names.downstream_frames);

        for _ in 0..self.max_per_poll {
            let envelope = match source.try_receive() {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) => {
                    debug!(endpoint = %self.names.upstream_frames, "receive failed: {e}");
                    break;
                }
            };

            let camera = String::from_utf8_lossy(&envelope.topic).into_owned();
            // Topic subscriptions match by prefix; the filter is exact.
            if !self.camera_filter.is_empty() && !self.camera_filter.contains(&camera) {
                trace!(%camera, "frame outside camera filter");
                continue;
            }
            if !camera.is_empty() && self.known_cameras.insert(camera.clone()) {
                info!(%camera, "new camera");
                report.new_cameras.push(camera.clone());
            }

            if self.publish(sink.as_deref(), envelope) {
                self.stats.record_frame_forwarded();
                report.frames_forwarded += 1;
            } else {
                self.stats.record_frame_dropped();
                trace!(%camera, "frame dropped");
            }
        }
    }

    fn forward_commands(&mut self, report: &mut PollReport) {
        let Some(source) = self.session.endpoint(&self.names.downstream_control) else {
            return;
        };
        let sink = self.session.endpoint(&self.names.upstream_control);

        for _ in 0..self.max_per_poll {
            let envelope = match source.try_receive() {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) => {
                    debug!(endpoint = %self.names.downstream_control, "receive failed: {e}");
                    break;
                }
            };

            let encoded = normalize_command(&envelope.body)
                .and_then(|msg| encode_control(&msg).map(|bytes| (msg, bytes)));
            let (msg, bytes) = match encoded {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("rejected control message: {e}");
                    self.stats.record_command_rejected();
                    continue;
                }
            };

            if self.publish(sink.as_deref(), Envelope::untagged(bytes)) {
                debug!(command = %msg.command, request_id = ?msg.request_id, "command forwarded");
                self.stats.record_command_forwarded();
                report.commands_forwarded += 1;
            } else {
                warn!(command = %msg.command, request_id = ?msg.request_id, "command dropped");
                self.stats.record_command_dropped();
            }
        }
    }

    /// Sends without blocking; `false` if the message was not queued.
    fn publish(&self, sink: Option<&dyn Endpoint>, envelope: Envelope) -> bool {
        let Some(sink) = sink else {
            return false;
        };
        match sink.send(envelope) {
            Ok(()) => true,
            Err(TransportError::WouldBlock) => false,
            Err(e) => {
                debug!(endpoint = sink.name(), "send failed: {e}");
                false
            }
        }
    }

    /// Sends a `CAMERA_TRANSFORM` to the host and returns its request id.
    ///
    /// `None` or an empty `target` moves every camera.
    ///
    /// # Errors
    ///
    /// [`RelayError::Stopped`] after stop, [`RelayError::Offline`] while the
    /// upstream publisher is reconnecting, [`RelayError::Send`] if the
    /// message could not be queued.
    pub fn send_camera_command(
        &self,
        target: Option<&str>,
        location: Vector3,
        rotation: Rotation,
    ) -> Result<String, RelayError> {
        if self.session.is_stopped() {
            return Err(RelayError::Stopped);
        }
        let sink = self
            .session
            .endpoint(&self.names.upstream_control)
            .ok_or_else(|| RelayError::Offline(self.names.upstream_control.clone()))?;

        let request_id = Uuid::new_v4().to_string();
        let transform = Transform {
            kind: TransformKind::Camera,
            target: target.map(str::to_string),
            location,
            rotation,
        };
        let bytes = encode_control(&transform.to_message().with_request_id(request_id.as_str()))?;
        sink.send(Envelope::untagged(bytes)).map_err(RelayError::Send)?;

        self.stats.record_command_forwarded();
        info!(%request_id, target = target.unwrap_or("*"), "camera command sent");
        Ok(request_id)
    }

    /// Polls every `interval` until the running flag is cleared, then stops.
    /// Returns the number of messages abandoned at shutdown.
    pub async fn run(&mut self, interval: Duration) -> usize {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            let report = self.poll(Instant::now());
            for event in &report.session_events {
                debug!(?event, "session event");
            }
        }
        self.stop().await
    }

    /// Clears the running flag, drains for at most the configured timeout and
    /// closes all four endpoints.  A second call returns 0.
    pub async fn stop(&mut self) -> usize {
        self.running.store(false, Ordering::Release);
        let abandoned = self.session.stop(self.drain_timeout).await;
        info!(abandoned, cameras = self.known_cameras.len(), "relay stopped");
        abandoned
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use framelink_core::CommandName;

    #[test]
    fn test_normalize_keeps_existing_request_id() {
        let msg = normalize_command(b"PING request_id=abc").unwrap();
        assert_eq!(msg.command, CommandName::Ping);
        assert_eq!(msg.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_normalize_assigns_uuid_when_missing() {
        // Act
        let msg = normalize_command(b"SET_CAPTURE enabled=false").unwrap();

        // Assert
        let id = msg.request_id.unwrap();
        assert_eq!(Uuid::parse_str(&id).unwrap().get_version_num(), 4);
    }

    #[test]
    fn test_normalize_converts_legacy_json() {
        // Arrange
        let json = br#"{"type":"camera_transform","camera_id":"cam1",
            "location":{"x":1.0,"y":2.0,"z":3.0},
            "rotation":{"pitch":0.0,"yaw":45.0,"roll":0.0},
            "message_id":"m-1"}"#;

        // Act
        let msg = normalize_command(json).unwrap();

        // Assert
        assert_eq!(msg.command, CommandName::CameraTransform);
        assert_eq!(msg.request_id.as_deref(), Some("m-1"));
        let text = encode_control(&msg).unwrap();
        assert!(text.starts_with(b"CAMERA_TRANSFORM request_id=m-1"));
    }

    #[test]
    fn test_normalize_rejects_replies_and_bad_arguments() {
        assert!(matches!(
            normalize_command(b"OK request_id=1"),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            normalize_command(b"SET_CADENCE every=0"),
            Err(ProtocolError::InvalidArgument { .. })
        ));
        assert!(matches!(
            normalize_command(b"LAUNCH"),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }
}
