//! Application layer use cases for the host bridge.
//!
//! # Where this sits
//!
//! The host is a real-time renderer (a game engine, a simulator) that calls
//! the bridge once per frame.  Nothing here may block that call: sends are
//! non-blocking, inbound commands are drained in bounded batches, and
//! handler runs are time-limited.
//!
//! # Sub-modules
//!
//! - **`capture_frames`** – Frame Capture Adapter.  Per camera: cadence
//!   decisions, pulling and encoding frames, numbering, non-blocking publish.
//!
//! - **`dispatch_commands`** – Command Dispatcher.  Decodes control
//!   messages, runs the registered handler, and produces exactly one reply.
//!
//! - **`command_handlers`** – The built-in handlers: capture settings,
//!   `PING`, `STATS`, and camera/actor transforms.
//!
//! - **`bridge_host`** – Ties capture and dispatch to a
//!   `framelink_session` session in one tick.
//!
//! - **`stats`** – Session counters reported by `STATS` and at shutdown.

pub mod bridge_host;
pub mod capture_frames;
pub mod command_handlers;
pub mod dispatch_commands;
pub mod stats;
