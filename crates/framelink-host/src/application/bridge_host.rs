//! BridgeHost: one running bridge session driven by the host's tick.
//!
//! Each [`BridgeHost::tick`] does, in order:
//!
//! 1. supervise endpoints (detect broken ones, reopen on backoff);
//! 2. run the capture adapter for every camera;
//! 3. drain inbound commands, at most `max_commands_per_tick` per endpoint;
//! 4. dispatch each and route its reply.
//!
//! # Reply routing
//!
//! | request arrived on | reply goes to                                     |
//! |--------------------|---------------------------------------------------|
//! | replier            | the same replier (back to the requesting peer)    |
//! | subscriber         | the ack publisher, only if the request had an id  |
//!
//! Subscriber requests without an id get no reply.  A reply that cannot be
//! delivered (no ack publisher, full queue) is dropped and counted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framelink_core::encode_control;
use framelink_core::protocol::Envelope;
use framelink_session::session::{SessionError, SessionEvent, SessionManager};
use framelink_session::transport::{Endpoint, SocketRole, Transport};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::capture_frames::{CameraCapture, FrameCaptureAdapter, TickOutcome};
use crate::application::command_handlers::{register_builtin_handlers, SceneRig};
use crate::application::dispatch_commands::{CommandDispatcher, Dispatched};
use crate::application::stats::{SessionStats, StatsSnapshot};
use crate::infrastructure::frame_source::{CaptureError, FrameSource};
use crate::infrastructure::image_encoding::ImageEncoder;
use crate::infrastructure::storage::config::{CameraConfig, ConfigError, HostConfig};

/// Error type for starting a bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("camera `{camera}`: {source}")]
    Capture {
        camera: String,
        #[source]
        source: CaptureError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub session_events: Vec<SessionEvent>,
    pub captures: Vec<(String, TickOutcome)>,
    pub commands: Vec<Dispatched>,
}

/// Collaborators the host is built from.
pub struct BridgeParts {
    pub transport: Arc<dyn Transport>,
    pub encoder: Arc<dyn ImageEncoder>,
    pub rig: Arc<dyn SceneRig>,
    /// One frame source per camera id.
    pub sources: HashMap<String, Box<dyn FrameSource>>,
}

pub struct BridgeHost {
    session: SessionManager,
    capture: FrameCaptureAdapter,
    dispatcher: CommandDispatcher,
    stats: Arc<SessionStats>,
    max_commands_per_tick: usize,
    ack_endpoint: Option<String>,
    drain_timeout: Duration,
    running: Arc<AtomicBool>,
}

impl fmt::Debug for BridgeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cameras: Vec<&str> = self.capture.cameras().iter().map(CameraCapture::id).collect();
        f.debug_struct("BridgeHost")
            .field("session", &self.session)
            .field("cameras", &cameras)
            .field("ack_endpoint", &self.ack_endpoint)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl BridgeHost {
    /// Validates `config`, opens every enabled endpoint, and wires cameras and
    /// handlers.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Config`] if the configuration is inconsistent or asks
    ///   for an output format the encoder cannot produce.
    /// - [`BridgeError::Capture`] if a camera has no frame source.
    /// - [`BridgeError::Session`] if an endpoint cannot be opened; nothing
    ///   stays open in that case.
    pub fn start(config: &HostConfig, mut parts: BridgeParts) -> Result<Self, BridgeError> {
        config.validate()?;
        if let Some(camera) = config.cameras.iter().find(|c| !parts.encoder.supports(c.format)) {
            return Err(ConfigError::Invalid(format!(
                "camera `{}`: the encoder cannot produce {} frames",
                camera.id, camera.format
            ))
            .into());
        }
        let stats = Arc::new(SessionStats::new());

        let mut capture = FrameCaptureAdapter::new();
        for camera in &config.cameras {
            let source = take_source(&mut parts.sources, camera)?;
            capture.add_camera(CameraCapture::new(
                camera,
                source,
                Arc::clone(&parts.encoder),
                Arc::clone(&stats),
            ));
        }

        let mut dispatcher = CommandDispatcher::new(Arc::clone(&stats))
            .with_handler_timeout(config.host.handler_timeout());
        register_builtin_handlers(
            &mut dispatcher,
            Arc::new(capture.registry()),
            Arc::clone(&stats),
            parts.rig,
        );

        let session = SessionManager::start(
            config.enabled_endpoints(),
            config.reconnect.policy(),
            parts.transport,
        )?;

        let ack_endpoint = config
            .host
            .ack_endpoint
            .clone()
            .filter(|name| session.endpoint(name).is_some());

        info!(
            cameras = config.cameras.len(),
            ack = ack_endpoint.as_deref().unwrap_or("none"),
            "bridge started"
        );

        Ok(Self {
            session,
            capture,
            dispatcher,
            stats,
            max_commands_per_tick: config.host.max_commands_per_tick.max(1),
            ack_endpoint,
            drain_timeout: config.host.drain_timeout(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Clearing this flag makes [`run`](Self::run) return after the current
    /// tick.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let session_events = self.session.supervise(now);
        let captures = self.capture.tick(now, &self.session);

        let mut commands = Vec::new();
        for endpoint in self.session.command_endpoints() {
            for _ in 0..self.max_commands_per_tick {
                let envelope = match endpoint.try_receive() {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(endpoint = endpoint.name(), "receive failed: {e}");
                        break;
                    }
                };
                let dispatched = self.dispatcher.dispatch(&envelope.body).await;
                self.route_reply(endpoint.as_ref(), &dispatched);
                commands.push(dispatched);
            }
        }

        TickReport {
            session_events,
            captures,
            commands,
        }
    }

    fn route_reply(&self, source: &dyn Endpoint, dispatched: &Dispatched) {
        let target: Option<Arc<dyn Endpoint>> = match source.role() {
            SocketRole::Replier => None,
            _ if dispatched.reply.request_id.is_none() => return,
            _ => match self.ack_endpoint.as_deref().and_then(|n| self.session.endpoint(n)) {
                Some(ack) => Some(ack),
                None => {
                    self.stats.record_reply_dropped();
                    return;
                }
            },
        };
        let body = match encode_control(&dispatched.reply) {
            Ok(body) => body,
            Err(e) => {
                warn!("reply could not be encoded: {e}");
                self.stats.record_reply_dropped();
                return;
            }
        };
        let sent = match &target {
            Some(ack) => ack.send(Envelope::untagged(body)),
            None => source.send(Envelope::untagged(body)),
        };
        match sent {
            Ok(()) => self.stats.record_reply_sent(),
            Err(e) => {
                debug!(endpoint = source.name(), "reply dropped: {e}");
                self.stats.record_reply_dropped();
            }
        }
    }

    /// Ticks every `interval` until the running flag is cleared, then stops.
    ///
    /// Returns the number of outbound messages abandoned at stop.
    pub async fn run(&mut self, interval: Duration) -> usize {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            let report = self.tick(Instant::now()).await;
            for event in &report.session_events {
                debug!(?event, "session event");
            }
        }
        self.stop().await
    }

    /// Stops accepting work, drains within the configured timeout, and
    /// closes every endpoint.  Returns how many messages were abandoned.
    pub async fn stop(&mut self) -> usize {
        self.running.store(false, Ordering::Release);
        self.session.stop(self.drain_timeout).await
    }
}

fn take_source(
    sources: &mut HashMap<String, Box<dyn FrameSource>>,
    camera: &CameraConfig,
) -> Result<Box<dyn FrameSource>, BridgeError> {
    sources.remove(&camera.id).ok_or_else(|| BridgeError::Capture {
        camera: camera.id.clone(),
        source: CaptureError::Unavailable("no frame source provided".to_string()),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
