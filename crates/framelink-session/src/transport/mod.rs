//! Message-queue style transport over TCP.
//!
//! An [`Endpoint`] is one socket with a fixed [`SocketRole`]:
//!
//! | Role         | Sends                          | Receives                        |
//! |--------------|--------------------------------|---------------------------------|
//! | `Publisher`  | fan-out to every peer          | nothing                         |
//! | `Subscriber` | nothing                        | messages matching its topics    |
//! | `Requester`  | one request, then must receive | the reply                       |
//! | `Replier`    | the reply to the last request  | one request, then must send     |
//!
//! Every message is an [`Envelope`] (`[topic, body]`).  All operations called
//! from the tick path are non-blocking: `send` enqueues or fails with
//! [`TransportError::WouldBlock`], `try_receive` returns `None` when nothing is
//! pending.  Socket I/O runs in background tasks on the Tokio runtime.
//!
//! The transport never retries.  A connect-mode endpoint whose connection
//! fails or drops reports [`EndpointStatus::Broken`]; re-opening it is the
//! session manager's job.
//!
//! # Testability
//!
//! The [`Transport`] trait lets tests swap in [`mock::MockTransport`], which
//! records sends and lets tests inject receives, `WouldBlock`, open failures,
//! and broken connections.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use framelink_core::protocol::{Envelope, ProtocolError, DEFAULT_MAX_BODY_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mock;
pub mod tcp;

pub use tcp::TcpTransport;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The address string is not a usable `tcp://host:port` address.
    #[error("invalid endpoint address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: &'static str },

    /// This process already holds a live endpoint on the address.
    #[error("address {0} is already in use by this process")]
    AddressInUse(String),

    /// The operating system refused the bind.
    #[error("bind failed on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The send queue is full; the message was not enqueued.
    #[error("send queue full")]
    WouldBlock,

    /// The endpoint has been closed.
    #[error("endpoint is closed")]
    Closed,

    /// The operation is not allowed in the endpoint's current state.
    #[error("invalid endpoint state: {0}")]
    InvalidState(&'static str),

    /// The envelope could not be framed for the wire.
    #[error("framing error: {0}")]
    Framing(#[from] ProtocolError),
}

// ── Endpoint configuration ────────────────────────────────────────────────────

/// The messaging pattern an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketRole {
    Publisher,
    Subscriber,
    Requester,
    Replier,
}

impl SocketRole {
    /// Publishers and repliers bind, subscribers and requesters connect.
    pub fn default_mode(self) -> EndpointMode {
        match self {
            SocketRole::Publisher | SocketRole::Replier => EndpointMode::Bind,
            SocketRole::Subscriber | SocketRole::Requester => EndpointMode::Connect,
        }
    }

    pub fn can_send(self) -> bool {
        !matches!(self, SocketRole::Subscriber)
    }

    pub fn can_receive(self) -> bool {
        !matches!(self, SocketRole::Publisher)
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SocketRole::Publisher => "publisher",
            SocketRole::Subscriber => "subscriber",
            SocketRole::Requester => "requester",
            SocketRole::Replier => "replier",
        };
        f.write_str(s)
    }
}

/// Whether an endpoint listens for peers or dials out to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    Bind,
    Connect,
}

/// Static description of one endpoint, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique name used by cameras, the dispatcher and log lines.
    pub name: String,
    pub role: SocketRole,
    /// `tcp://host:port`; `tcp://*:port` binds every interface.
    pub address: String,
    /// Overrides the role's default bind/connect mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<EndpointMode>,
    /// Subscriber topic prefixes.  Empty subscribes to everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    /// Capacity of each bounded queue (outbound, inbound, per peer).
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    /// Largest accepted envelope body in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// How long a connect-mode endpoint waits for its peer before it is
    /// marked broken.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_high_water_mark() -> usize {
    64
}
fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}

impl EndpointConfig {
    /// Creates an enabled endpoint with default queue sizes and the role's
    /// default mode.
    pub fn new(name: impl Into<String>, role: SocketRole, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            address: address.into(),
            mode: None,
            topics: Vec::new(),
            high_water_mark: default_high_water_mark(),
            max_body_size: default_max_body_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            enabled: true,
        }
    }

    pub fn with_mode(mut self, mode: EndpointMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_high_water_mark(mut self, hwm: usize) -> Self {
        self.high_water_mark = hwm;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The configured mode, falling back to the role default.
    pub fn effective_mode(&self) -> EndpointMode {
        self.mode.unwrap_or_else(|| self.role.default_mode())
    }
}

// ── Addresses ─────────────────────────────────────────────────────────────────

/// A parsed `tcp://host:port` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpAddress {
    pub host: String,
    pub port: u16,
}

impl TcpAddress {
    /// Parses `address` for the given mode.
    ///
    /// `*` is accepted as the host only for bind and means every interface.
    /// Port 0 is accepted only for bind (an ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] describing the first problem.
    pub fn parse(address: &str, mode: EndpointMode) -> Result<Self, TransportError> {
        let invalid = |reason| TransportError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let rest = address
            .strip_prefix("tcp://")
            .ok_or_else(|| invalid("only the tcp:// scheme is supported"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing `:port`"))?;
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 0-65535"))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        match mode {
            EndpointMode::Bind => {
                let host = if host == "*" { "0.0.0.0" } else { host };
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            EndpointMode::Connect => {
                if host == "*" {
                    return Err(invalid("`*` can only be bound, not connected to"));
                }
                if port == 0 {
                    return Err(invalid("cannot connect to port 0"));
                }
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
        }
    }

    /// `host:port` form accepted by the socket APIs.
    pub fn socket_string(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for TcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.socket_string())
    }
}

// ── Endpoint status ───────────────────────────────────────────────────────────

/// Health of an endpoint, readable without locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndpointStatus {
    /// Connect-mode endpoint still dialling.
    Connecting = 0,
    /// Bound, or connected to its peer.
    Ready = 1,
    /// The connection failed or dropped.  The endpoint will not recover.
    Broken = 2,
    /// `close` was called.
    Closed = 3,
}

impl From<u8> for EndpointStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => EndpointStatus::Connecting,
            1 => EndpointStatus::Ready,
            2 => EndpointStatus::Broken,
            _ => EndpointStatus::Closed,
        }
    }
}

/// Atomic cell holding an [`EndpointStatus`].
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: EndpointStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> EndpointStatus {
        EndpointStatus::from(self.0.load(Ordering::Acquire))
    }

    /// Stores `status` unless the endpoint is already closed.
    pub fn set(&self, status: EndpointStatus) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != EndpointStatus::Closed as u8).then_some(status as u8)
            });
    }

    pub fn close(&self) {
        self.0.store(EndpointStatus::Closed as u8, Ordering::Release);
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// One open socket.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The configured endpoint name.
    fn name(&self) -> &str;

    fn role(&self) -> SocketRole;

    /// Enqueues `envelope` without blocking.
    ///
    /// # Errors
    ///
    /// - [`TransportError::WouldBlock`] if the outbound queue is full.
    /// - [`TransportError::InvalidState`] for subscribers, for a requester
    ///   still awaiting its reply, and for a replier with no request to
    ///   answer.
    /// - [`TransportError::Closed`] after `close`.
    fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Returns the next pending message, or `None` if nothing is queued.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidState`] for publishers and for a replier
    ///   that has not answered the previous request.
    /// - [`TransportError::Closed`] after `close`.
    fn try_receive(&self) -> Result<Option<Envelope>, TransportError>;

    fn status(&self) -> EndpointStatus;

    /// The bound address for bind-mode endpoints.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Releases the socket and every task serving it.  Idempotent.
    fn close(&self);

    /// Waits until every queued outbound message has been written or
    /// `timeout` elapses.  Returns the number of messages still unsent.
    async fn drain(&self, timeout: Duration) -> usize;
}

/// Factory for endpoints.
pub trait Transport: Send + Sync {
    /// Opens an endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the address is malformed, already held by this process, or
    /// cannot be bound.  Connect failures are not reported here: the
    /// endpoint opens in [`EndpointStatus::Connecting`] and later turns
    /// [`EndpointStatus::Broken`] if the peer is unreachable.
    fn open(&self, config: &EndpointConfig) -> Result<Arc<dyn Endpoint>, TransportError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_default_modes() {
        assert_eq!(SocketRole::Publisher.default_mode(), EndpointMode::Bind);
        assert_eq!(SocketRole::Replier.default_mode(), EndpointMode::Bind);
        assert_eq!(SocketRole::Subscriber.default_mode(), EndpointMode::Connect);
        assert_eq!(SocketRole::Requester.default_mode(), EndpointMode::Connect);
    }

    #[test]
    fn test_explicit_mode_overrides_role_default() {
        let cfg = EndpointConfig::new("frames", SocketRole::Publisher, "tcp://10.0.0.2:5555")
            .with_mode(EndpointMode::Connect);
        assert_eq!(cfg.effective_mode(), EndpointMode::Connect);
    }

    #[test]
    fn test_parse_wildcard_bind_address() {
        // Act
        let addr = TcpAddress::parse("tcp://*:5555", EndpointMode::Bind).unwrap();

        // Assert
        assert_eq!(addr.host, "0.0.0.0");
        assert_eq!(addr.port, 5555);
        assert_eq!(addr.socket_string(), "0.0.0.0:5555");
    }

    #[test]
    fn test_parse_bracketed_ipv6_address() {
        let addr = TcpAddress::parse("tcp://[::1]:7000", EndpointMode::Connect).unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.socket_string(), "[::1]:7000");
    }

    #[test]
    fn test_parse_accepts_ephemeral_port_for_bind_only() {
        assert!(TcpAddress::parse("tcp://127.0.0.1:0", EndpointMode::Bind).is_ok());
        assert!(matches!(
            TcpAddress::parse("tcp://127.0.0.1:0", EndpointMode::Connect),
            Err(TransportError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_addresses() {
        for bad in [
            "127.0.0.1:5555",
            "udp://127.0.0.1:5555",
            "tcp://127.0.0.1",
            "tcp://:5555",
            "tcp://host:99999",
            "tcp://host:port",
        ] {
            assert!(
                matches!(
                    TcpAddress::parse(bad, EndpointMode::Bind),
                    Err(TransportError::InvalidAddress { .. })
                ),
                "`{bad}` must be rejected"
            );
        }
    }

    #[test]
    fn test_cannot_connect_to_wildcard() {
        assert!(TcpAddress::parse("tcp://*:5556", EndpointMode::Connect).is_err());
    }

    #[test]
    fn test_status_cell_stays_closed() {
        // Arrange
        let cell = StatusCell::new(EndpointStatus::Connecting);
        cell.set(EndpointStatus::Ready);
        assert_eq!(cell.get(), EndpointStatus::Ready);

        // Act
        cell.close();
        cell.set(EndpointStatus::Broken);

        // Assert
        assert_eq!(cell.get(), EndpointStatus::Closed);
    }

    #[test]
    fn test_endpoint_config_toml_defaults() {
        // Arrange
        let toml_str = r#"
            name = "commands"
            role = "subscriber"
            address = "tcp://127.0.0.1:5556"
        "#;

        // Act
        let cfg: EndpointConfig = toml::from_str(toml_str).unwrap();

        // Assert
        assert!(cfg.enabled);
        assert!(cfg.topics.is_empty());
        assert_eq!(cfg.high_water_mark, 64);
        assert_eq!(cfg.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.effective_mode(), EndpointMode::Connect);
    }
}
