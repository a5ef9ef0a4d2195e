//! Endpoint transport and session supervision shared by the Framelink host
//! and hub.
//!
//! - [`transport`]: message-queue style endpoints over TCP, plus an
//!   in-memory double for tests.
//! - [`session`]: opens a set of endpoints atomically, reopens broken ones on
//!   a backoff, and drains them on stop.
//! - [`config`]: the platform config directory, TOML load/save helpers, and
//!   the `[reconnect]` section both config files embed.

pub mod config;
pub mod session;
pub mod transport;
