//! Application layer for the relay hub.
//!
//! - [`relay`]: opens the four hub endpoints and moves messages between them.
//! - [`stats`]: relay counters.

pub mod relay;
pub mod stats;
