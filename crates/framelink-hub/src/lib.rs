//! Framelink relay hub library.
//!
//! The hub sits between one render host and any number of consumers.  It
//! subscribes to the host's frame publisher and republishes every frame on
//! its own publisher, and it collects control messages from consumers and
//! forwards them to the host's command subscriber.
//!
//! # Architecture
//!
//! - [`application`]: the relay use case (frame fan-out, command forwarding,
//!   counters, shutdown).
//! - [`infrastructure`]: the hub's TOML config file.
//!
//! Sockets, reconnection, draining and the shared config helpers come from
//! `framelink_session`.

pub mod application;
pub mod infrastructure;
