//! Built-in command handlers.
//!
//! Capture settings go through the shared [`CameraRegistry`]; they take effect
//! on the next tick.  Transforms go to a [`SceneRig`], which stands for
//! whatever scene graph the host renders.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use framelink_core::{CommandName, ControlMessage, Rotation, Transform, TransformKind, Vector3};
use tracing::{debug, info};

use crate::application::capture_frames::{CameraRegistry, CaptureControl};
use crate::application::dispatch_commands::{CommandDispatcher, CommandHandler, HandlerError};
use crate::application::stats::SessionStats;
use crate::infrastructure::image_encoding::OutputFormat;

type Reply = Result<Vec<(String, String)>, HandlerError>;

fn pair(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

// ── Capture settings ──────────────────────────────────────────────────────────

/// Resolves the optional `camera` argument to the controls it names.
fn select<'a>(
    cameras: &'a CameraRegistry,
    msg: &ControlMessage,
) -> Result<Vec<(&'a str, &'a Arc<CaptureControl>)>, HandlerError> {
    let camera = msg.arg("camera");
    let selected = cameras.select(camera);
    match camera {
        Some(id) if !id.is_empty() && selected.is_empty() => {
            Err(HandlerError::UnknownTarget(id.to_string()))
        }
        _ => Ok(selected),
    }
}

pub struct SetCaptureHandler {
    cameras: Arc<CameraRegistry>,
}

#[async_trait]
impl CommandHandler for SetCaptureHandler {
    async fn handle(&self, msg: &ControlMessage) -> Reply {
        let enabled: bool = msg.require_arg("enabled")?;
        let selected = select(&self.cameras, msg)?;
        for (id, control) in &selected {
            control.set_enabled(enabled);
            info!(camera = %id, enabled, "capture toggled");
        }
        Ok(vec![pair("enabled", enabled), pair("cameras", selected.len())])
    }
}

pub struct SetCadenceHandler {
    cameras: Arc<CameraRegistry>,
}

#[async_trait]
impl CommandHandler for SetCadenceHandler {
    async fn handle(&self, msg: &ControlMessage) -> Reply {
        let every: u32 = msg.require_arg("every")?;
        let interval_ms: Option<u64> = msg.parse_arg("interval_ms")?;
        let selected = select(&self.cameras, msg)?;
        for (id, control) in &selected {
            control.set_every_n_ticks(every);
            if let Some(ms) = interval_ms {
                control.set_min_interval(Duration::from_millis(ms));
            }
            debug!(camera = %id, every, ?interval_ms, "cadence changed");
        }
        Ok(vec![pair("every", every), pair("cameras", selected.len())])
    }
}

pub struct SetFormatHandler {
    cameras: Arc<CameraRegistry>,
}

#[async_trait]
impl CommandHandler for SetFormatHandler {
    async fn handle(&self, msg: &ControlMessage) -> Reply {
        let raw: String = msg.require_arg("format")?;
        let format: OutputFormat = raw.parse().map_err(|reason| HandlerError::InvalidArgument {
            key: "format".to_string(),
            reason,
        })?;
        let selected = select(&self.cameras, msg)?;
        for (id, control) in &selected {
            control.set_format(format);
            debug!(camera = %id, %format, "output format changed");
        }
        Ok(vec![pair("format", format), pair("cameras", selected.len())])
    }
}

pub struct SetResolutionHandler {
    cameras: Arc<CameraRegistry>,
}

#[async_trait]
impl CommandHandler for SetResolutionHandler {
    async fn handle(&self, msg: &ControlMessage) -> Reply {
        let width: u32 = msg.require_arg("width")?;
        let height: u32 = msg.require_arg("height")?;
        for (key, value) in [("width", width), ("height", height)] {
            if value == 0 {
                return Err(HandlerError::InvalidArgument {
                    key: key.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        let selected = select(&self.cameras, msg)?;
        for (id, control) in &selected {
            control.set_resolution(width, height);
            debug!(camera = %id, width, height, "resolution requested");
        }
        Ok(vec![
            pair("width", width),
            pair("height", height),
            pair("cameras", selected.len()),
        ])
    }
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, _msg: &ControlMessage) -> Reply {
        Ok(vec![pair("pong", true)])
    }
}

pub struct StatsHandler {
    stats: Arc<SessionStats>,
}

#[async_trait]
impl CommandHandler for StatsHandler {
    async fn handle(&self, _msg: &ControlMessage) -> Reply {
        Ok(self.stats.snapshot().to_args())
    }
}

// ── Transforms ────────────────────────────────────────────────────────────────

/// The host's movable scene objects.
#[cfg_attr(test, mockall::automock)]
pub trait SceneRig: Send + Sync {
    /// Ids of every object of `kind`.
    fn ids(&self, kind: TransformKind) -> Vec<String>;

    /// Moves one object.
    fn set_pose(
        &self,
        kind: TransformKind,
        id: &str,
        location: Vector3,
        rotation: Rotation,
    ) -> Result<(), String>;
}

/// Applies `CAMERA_TRANSFORM` or `ACTOR_TRANSFORM` to one target, or to
/// every object of that kind when no target is given.
pub struct TransformHandler {
    rig: Arc<dyn SceneRig>,
}

impl TransformHandler {
    pub fn new(rig: Arc<dyn SceneRig>) -> Self {
        Self { rig }
    }
}

#[async_trait]
impl CommandHandler for TransformHandler {
    async fn handle(&self, msg: &ControlMessage) -> Reply {
        let transform = Transform::from_message(msg)?;
        let targets: Vec<String> = self
            .rig
            .ids(transform.kind)
            .into_iter()
            .filter(|id| transform.applies_to(id))
            .collect();

        if targets.is_empty() {
            if let Some(target) = transform.target.as_deref().filter(|t| !t.is_empty()) {
                return Err(HandlerError::UnknownTarget(target.to_string()));
            }
        }
        for id in &targets {
            self.rig
                .set_pose(transform.kind, id, transform.location, transform.rotation)
                .map_err(HandlerError::Failed)?;
        }
        debug!(command = %msg.command, moved = targets.len(), "transform applied");
        Ok(vec![pair("moved", targets.len())])
    }
}

// ── Registration ──────────────────────────────────────────────────────────────

/// Registers every built-in handler on `dispatcher`.
pub fn register_builtin_handlers(
    dispatcher: &mut CommandDispatcher,
    cameras: Arc<CameraRegistry>,
    stats: Arc<SessionStats>,
    rig: Arc<dyn SceneRig>,
) {
    dispatcher.register(
        CommandName::SetCapture,
        Arc::new(SetCaptureHandler { cameras: Arc::clone(&cameras) }),
    );
    dispatcher.register(
        CommandName::SetCadence,
        Arc::new(SetCadenceHandler { cameras: Arc::clone(&cameras) }),
    );
    dispatcher.register(
        CommandName::SetFormat,
        Arc::new(SetFormatHandler { cameras: Arc::clone(&cameras) }),
    );
    dispatcher.register(CommandName::SetResolution, Arc::new(SetResolutionHandler { cameras }));
    dispatcher.register(CommandName::Ping, Arc::new(PingHandler));
    dispatcher.register(CommandName::Stats, Arc::new(StatsHandler { stats }));

    let transforms: Arc<dyn CommandHandler> = Arc::new(TransformHandler::new(rig));
    dispatcher.register(CommandName::CameraTransform, Arc::clone(&transforms));
    dispatcher.register(CommandName::ActorTransform, transforms);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
