//! Infrastructure for the relay hub.
//!
//! The `config` module reads and writes `hub.toml` in the same platform
//! directory the host uses.

pub mod config;
