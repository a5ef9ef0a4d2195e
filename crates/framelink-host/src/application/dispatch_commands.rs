//! Command Dispatcher: decodes inbound control messages and runs handlers.
//!
//! # State machine
//!
//! ```text
//!            bytes in               decoded + valid + registered
//!  Awaiting ──────────► Decoding ───────────────────────────────► Applying
//!     ▲                    │                                         │
//!     │                    │ malformed / unknown / invalid /         │
//!     │                    │ no handler                              │
//!     │                    ▼                                         │
//!     └─────────────── Rejected                                      │
//!     └──────────────────────────────────────────────────────────────┘
//!                      handler finished, failed, panicked or timed out
//! ```
//!
//! Every message that enters `Decoding` produces exactly one reply: `OK`
//! (with whatever the handler returned) or `ERROR code=<code> reason=<text>`.
//! The reply carries the request's `request_id` when one could be decoded.
//!
//! Handlers are registered per [`CommandName`].  A handler failure never
//! escapes the dispatcher: errors, panics and timeouts all become `ERROR`
//! replies and the dispatcher returns to `Awaiting`.
//!
//! The timeout bounds handlers that yield to the runtime; a handler that
//! blocks its thread cannot be interrupted.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use framelink_core::protocol::{decode_control_json, is_json_object, validate};
use framelink_core::{decode_control, CommandName, ControlMessage, ProtocolError};
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::application::stats::SessionStats;

/// Default bound on a single handler run.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_millis(250);

// ── States and outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Awaiting,
    Decoding,
    Applying,
    Rejected,
}

/// `code` value of an `ERROR` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Malformed,
    UnknownCommand,
    InvalidArgument,
    /// A known command with no handler registered.
    Unregistered,
    UnknownTarget,
    HandlerFailed,
    HandlerPanicked,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Malformed => "malformed",
            ErrorCode::UnknownCommand => "unknown_command",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Unregistered => "unregistered",
            ErrorCode::UnknownTarget => "unknown_target",
            ErrorCode::HandlerFailed => "handler_failed",
            ErrorCode::HandlerPanicked => "handler_panicked",
            ErrorCode::Timeout => "timeout",
        }
    }

    fn for_protocol_error(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            ProtocolError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            _ => ErrorCode::Malformed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and succeeded.
    Applied(CommandName),
    /// The message never reached a handler.
    Rejected(ErrorCode),
    /// The handler ran but did not succeed.
    Failed(CommandName, ErrorCode),
}

/// A finished dispatch: the reply to send back and what happened.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub reply: ControlMessage,
    pub outcome: DispatchOutcome,
}

// ── Handler seam ──────────────────────────────────────────────────────────────

/// Error type for command handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid argument `{key}`: {reason}")]
    InvalidArgument { key: String, reason: String },

    #[error("no such target `{0}`")]
    UnknownTarget(String),

    #[error("{0}")]
    Failed(String),
}

impl From<ProtocolError> for HandlerError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::InvalidArgument { key, reason, .. } => {
                HandlerError::InvalidArgument { key, reason }
            }
            other => HandlerError::Failed(other.to_string()),
        }
    }
}

impl HandlerError {
    fn code(&self) -> ErrorCode {
        match self {
            HandlerError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            HandlerError::UnknownTarget(_) => ErrorCode::UnknownTarget,
            HandlerError::Failed(_) => ErrorCode::HandlerFailed,
        }
    }
}

/// Applies one validated command.
///
/// The returned pairs become the arguments of the `OK` reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, msg: &ControlMessage) -> Result<Vec<(String, String)>, HandlerError>;
}

/// Sees every state transition; used for tracing and tests.
#[cfg_attr(test, mockall::automock)]
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, from: DispatchState, to: DispatchState);
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct CommandDispatcher {
    handlers: HashMap<CommandName, Arc<dyn CommandHandler>>,
    state: DispatchState,
    handler_timeout: Duration,
    stats: Arc<SessionStats>,
    observer: Option<Arc<dyn TransitionObserver>>,
}

impl CommandDispatcher {
    pub fn new(stats: Arc<SessionStats>) -> Self {
        Self {
            handlers: HashMap::new(),
            state: DispatchState::Awaiting,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            stats,
            observer: None,
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Registers `handler` for `command`, replacing any earlier one.
    pub fn register(&mut self, command: CommandName, handler: Arc<dyn CommandHandler>) {
        if self.handlers.insert(command, handler).is_some() {
            debug!(%command, "command handler replaced");
        }
    }

    pub fn is_registered(&self, command: CommandName) -> bool {
        self.handlers.contains_key(&command)
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    fn transition(&mut self, to: DispatchState) {
        let from = self.state;
        self.state = to;
        trace!(?from, ?to, "dispatcher transition");
        if let Some(observer) = &self.observer {
            observer.on_transition(from, to);
        }
    }

    fn reject(&mut self, request_id: Option<String>, code: ErrorCode, reason: String) -> Dispatched {
        self.transition(DispatchState::Rejected);
        warn!(code = code.as_str(), "command rejected: {reason}");
        self.stats.record_rejected();
        self.transition(DispatchState::Awaiting);
        Dispatched {
            reply: error_reply(request_id, code, reason),
            outcome: DispatchOutcome::Rejected(code),
        }
    }

    /// Decodes one inbound body, text or JSON, and runs its handler.
    pub async fn dispatch(&mut self, bytes: &[u8]) -> Dispatched {
        self.transition(DispatchState::Decoding);

        let decoded = if is_json_object(bytes) {
            decode_control_json(bytes)
        } else {
            decode_control(bytes)
        };
        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => return self.reject(None, ErrorCode::for_protocol_error(&e), e.to_string()),
        };
        if let Err(e) = validate(&msg) {
            return self.reject(msg.request_id, ErrorCode::for_protocol_error(&e), e.to_string());
        }
        let Some(handler) = self.handlers.get(&msg.command).cloned() else {
            let reason = format!("no handler registered for {}", msg.command);
            return self.reject(msg.request_id, ErrorCode::Unregistered, reason);
        };

        self.transition(DispatchState::Applying);
        let command = msg.command;
        let run = AssertUnwindSafe(handler.handle(&msg)).catch_unwind();
        let result = tokio::time::timeout(self.handler_timeout, run).await;

        let dispatched = match result {
            Ok(Ok(Ok(args))) => {
                debug!(%command, "command applied");
                self.stats.record_applied();
                Dispatched {
                    reply: msg.ok_reply(args),
                    outcome: DispatchOutcome::Applied(command),
                }
            }
            Ok(Ok(Err(e))) => {
                warn!(%command, "command failed: {e}");
                let code = e.code();
                Dispatched {
                    reply: error_reply(msg.request_id, code, e.to_string()),
                    outcome: DispatchOutcome::Failed(command, code),
                }
            }
            Ok(Err(panic)) => {
                let reason = panic_message(panic.as_ref());
                warn!(%command, "command handler panicked: {reason}");
                Dispatched {
                    reply: error_reply(msg.request_id, ErrorCode::HandlerPanicked, reason),
                    outcome: DispatchOutcome::Failed(command, ErrorCode::HandlerPanicked),
                }
            }
            Err(_) => {
                warn!(%command, timeout_ms = self.handler_timeout.as_millis() as u64, "command handler timed out");
                let reason = format!("handler exceeded {} ms", self.handler_timeout.as_millis());
                Dispatched {
                    reply: error_reply(msg.request_id, ErrorCode::Timeout, reason),
                    outcome: DispatchOutcome::Failed(command, ErrorCode::Timeout),
                }
            }
        };
        self.transition(DispatchState::Awaiting);
        dispatched
    }
}

fn error_reply(request_id: Option<String>, code: ErrorCode, reason: String) -> ControlMessage {
    let mut reply = ControlMessage::new(CommandName::Error)
        .with_arg("code", code.as_str())
        .with_arg("reason", reason);
    reply.request_id = request_id;
    reply
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
