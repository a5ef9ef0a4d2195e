//! # framelink-core
//!
//! Shared library for Framelink containing the frame and control message
//! codecs, sequence numbering, pixel conversions, and typed command views.
//!
//! This crate is used by both the host bridge and the relay hub.
//! It has no dependencies on sockets, async runtimes, or OS APIs.
//!
//! # Architecture overview (for beginners)
//!
//! Framelink streams rendered frames out of a real-time host (a game engine,
//! a simulator) to external consumers, and carries control commands back in
//! the other direction.  Everything that crosses the network is defined here:
//!
//! - **`protocol`** – How bytes travel over the network.  Frames are encoded
//!   into a 29-byte big-endian header plus payload; control commands are
//!   short UTF-8 lines such as `SET_CAPTURE enabled=false`; both ride inside
//!   a topic-tagged transport envelope.
//!
//! - **`domain`** – Pure logic with no I/O: pixel format conversions
//!   (including RGB → grayscale) and the typed `Transform` command view.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `framelink_core::FramePacket` instead of the full module path.
pub use domain::transform::{Rotation, Transform, TransformKind, Vector3};
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::control::{decode_control, encode_control};
pub use protocol::messages::{CommandName, ControlMessage, FramePacket, PixelFormat};
