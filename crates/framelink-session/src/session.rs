//! Session/Connection Manager: owns every endpoint of one bridge session.
//!
//! The session opens all configured endpoints up front (all or nothing),
//! watches their status on every tick, and reopens broken ones on a capped
//! exponential backoff.  Stopping drains what is still queued within a
//! deadline and then closes everything.
//!
//! # Endpoint lifecycle
//!
//! ```text
//!            start()                     status() == Broken
//!   config ──────────►  Live  ─────────────────────────────►  Backoff
//!                        ▲                                      │
//!                        │  reopen succeeded    reopen failed   │
//!                        └──────────────────────────────────────┤
//!                                                               │ max_attempts
//!                                                               ▼
//!                                                             Failed
//! ```
//!
//! The transport itself never retries; all reconnection policy lives here.
//! A consecutive-failure counter is carried across reopen cycles and only
//! reset once the endpoint is seen `Ready`, so a peer that accepts and then
//! immediately drops every connection still exhausts `max_attempts`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::transport::{
    Endpoint, EndpointConfig, EndpointStatus, SocketRole, Transport, TransportError,
};

// ── Reconnect policy ──────────────────────────────────────────────────────────

/// Capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    /// Growth factor per consecutive failure; at least 1.0.
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Consecutive failures before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use framelink_session::session::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy::default();
    /// assert_eq!(policy.delay_for(0), Duration::from_millis(500));
    /// assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    /// assert_eq!(policy.delay_for(50), Duration::from_secs(30));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).round();
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }

    /// Whether `failures` consecutive failures means giving up.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

// ── Errors and events ─────────────────────────────────────────────────────────

/// Error type for starting a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// One endpoint failed to open; every endpoint opened before it was
    /// closed again.
    #[error("failed to open endpoint `{name}`: {source}")]
    Open {
        name: String,
        #[source]
        source: TransportError,
    },
}

/// Connectivity changes reported by [`SessionManager::supervise`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The endpoint was found broken and closed; a reopen is scheduled.
    EndpointBroken { name: String },
    /// A reopen succeeded after `attempts` consecutive failures.
    EndpointRestored { name: String, attempts: u32 },
    /// Reconnection gave up; the endpoint stays down for this session.
    EndpointFailed { name: String, attempts: u32 },
}

// ── Session manager ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Live,
    Backoff { retry_at: Instant },
    Failed,
}

struct Slot {
    config: EndpointConfig,
    endpoint: Option<Arc<dyn Endpoint>>,
    state: SlotState,
    failures: u32,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    slots: Vec<Slot>,
    stopped: bool,
}

impl SessionManager {
    /// Opens every endpoint in `configs`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Open`] for the first endpoint that fails; the
    /// endpoints already opened are closed before returning, so a failed start
    /// leaves no address reserved.
    pub fn start(
        configs: Vec<EndpointConfig>,
        policy: ReconnectPolicy,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SessionError> {
        let mut slots: Vec<Slot> = Vec::with_capacity(configs.len());
        for config in configs {
            match transport.open(&config) {
                Ok(endpoint) => {
                    debug!(endpoint = %config.name, role = %config.role, address = %config.address, "endpoint opened");
                    slots.push(Slot {
                        config,
                        endpoint: Some(endpoint),
                        state: SlotState::Live,
                        failures: 0,
                    });
                }
                Err(source) => {
                    warn!(endpoint = %config.name, "session start aborted: {source}");
                    for slot in &slots {
                        if let Some(endpoint) = &slot.endpoint {
                            endpoint.close();
                        }
                    }
                    return Err(SessionError::Open {
                        name: config.name,
                        source,
                    });
                }
            }
        }
        info!(endpoints = slots.len(), "session started");
        Ok(Self {
            transport,
            policy,
            slots,
            stopped: false,
        })
    }

    /// The live endpoint named `name`.
    ///
    /// `None` while it is reconnecting, after it failed, or after stop.
    pub fn endpoint(&self, name: &str) -> Option<Arc<dyn Endpoint>> {
        self.slots
            .iter()
            .find(|s| s.config.name == name)
            .and_then(|s| s.endpoint.clone())
    }

    /// Live endpoints that receive commands (subscribers and repliers).
    pub fn command_endpoints(&self) -> Vec<Arc<dyn Endpoint>> {
        self.slots
            .iter()
            .filter(|s| matches!(s.config.role, SocketRole::Subscriber | SocketRole::Replier))
            .filter_map(|s| s.endpoint.clone())
            .collect()
    }

    /// `(name, status)` of every endpoint; reconnecting and failed endpoints
    /// report `Broken`.
    pub fn statuses(&self) -> Vec<(String, EndpointStatus)> {
        self.slots
            .iter()
            .map(|s| {
                let status = match &s.endpoint {
                    Some(ep) => ep.status(),
                    None if self.stopped => EndpointStatus::Closed,
                    None => EndpointStatus::Broken,
                };
                (s.config.name.clone(), status)
            })
            .collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Checks every endpoint and advances reconnection.
    ///
    /// Call once per tick; `now` decides which backoffs have elapsed.
    pub fn supervise(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.stopped {
            return events;
        }
        for slot in &mut self.slots {
            match slot.state {
                SlotState::Live => {
                    let Some(endpoint) = &slot.endpoint else {
                        continue;
                    };
                    match endpoint.status() {
                        EndpointStatus::Ready => slot.failures = 0,
                        EndpointStatus::Broken | EndpointStatus::Closed => {
                            endpoint.close();
                            slot.endpoint = None;
                            slot.failures += 1;
                            warn!(endpoint = %slot.config.name, failures = slot.failures, "endpoint broken");
                            events.push(SessionEvent::EndpointBroken {
                                name: slot.config.name.clone(),
                            });
                            Self::schedule(&self.policy, slot, now, &mut events);
                        }
                        EndpointStatus::Connecting => {}
                    }
                }
                SlotState::Backoff { retry_at } if now >= retry_at => {
                    match self.transport.open(&slot.config) {
                        Ok(endpoint) => {
                            info!(endpoint = %slot.config.name, attempts = slot.failures, "endpoint reopened");
                            slot.endpoint = Some(endpoint);
                            slot.state = SlotState::Live;
                            events.push(SessionEvent::EndpointRestored {
                                name: slot.config.name.clone(),
                                attempts: slot.failures,
                            });
                        }
                        Err(e) => {
                            slot.failures += 1;
                            debug!(endpoint = %slot.config.name, failures = slot.failures, "reopen failed: {e}");
                            Self::schedule(&self.policy, slot, now, &mut events);
                        }
                    }
                }
                SlotState::Backoff { .. } | SlotState::Failed => {}
            }
        }
        events
    }

    fn schedule(policy: &ReconnectPolicy, slot: &mut Slot, now: Instant, events: &mut Vec<SessionEvent>) {
        if policy.exhausted(slot.failures) {
            warn!(endpoint = %slot.config.name, attempts = slot.failures, "giving up on endpoint");
            slot.state = SlotState::Failed;
            events.push(SessionEvent::EndpointFailed {
                name: slot.config.name.clone(),
                attempts: slot.failures,
            });
            return;
        }
        let delay = policy.delay_for(slot.failures.saturating_sub(1));
        slot.state = SlotState::Backoff { retry_at: now + delay };
    }

    /// Drains queued outbound messages for at most `drain_timeout`, then
    /// closes every endpoint.
    ///
    /// Returns how many messages were abandoned.  Calling `stop` again is a
    /// no-op returning 0.
    pub async fn stop(&mut self, drain_timeout: Duration) -> usize {
        if self.stopped {
            return 0;
        }
        self.stopped = true;

        let live: Vec<Arc<dyn Endpoint>> = self.slots.iter().filter_map(|s| s.endpoint.clone()).collect();
        let abandoned: usize = join_all(live.iter().map(|ep| ep.drain(drain_timeout)))
            .await
            .into_iter()
            .sum();

        for slot in &mut self.slots {
            if let Some(endpoint) = slot.endpoint.take() {
                endpoint.close();
            }
        }
        if abandoned > 0 {
            warn!(abandoned, "session stopped with undelivered messages");
        } else {
            info!("session stopped");
        }
        abandoned
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoints", &self.statuses())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Some(endpoint) = &slot.endpoint {
                endpoint.close();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
