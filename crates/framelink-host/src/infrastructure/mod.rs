//! Infrastructure layer for the host bridge.
//!
//! Contains the adapters at the edges: frame sources, image encoding, the
//! scene rig, and file-system configuration.  Sockets live in
//! `framelink_session::transport`.

pub mod frame_source;
pub mod image_encoding;
pub mod scene;
pub mod storage;
