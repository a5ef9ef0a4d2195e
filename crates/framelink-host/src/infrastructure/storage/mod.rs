//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML config file from the platform
//! config directory (or a path given on the command line), supplies defaults
//! on first run, and writes the file back when asked to.

pub mod config;
