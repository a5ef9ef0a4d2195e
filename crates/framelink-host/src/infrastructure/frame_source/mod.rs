//! Frame sources: where captured pixels come from.
//!
//! The render host exposes its render target through [`FrameSource`].  The
//! capture adapter pulls one frame per publishing tick; a source that has
//! nothing new returns `Ok(None)` and the tick is skipped.
//!
//! # Testability
//!
//! [`synthetic::SyntheticFrameSource`] draws a moving test pattern for the
//! stand-alone host binary; [`mock::MockFrameSource`] replays injected frames.

use framelink_core::PixelFormat;
use thiserror::Error;

pub mod mock;
pub mod synthetic;

/// One uncompressed frame as read from a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Always a raw format.
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Error type for frame capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The render target cannot be read right now.
    #[error("render target unavailable: {0}")]
    Unavailable(String),

    /// The source cannot render at the requested size.
    #[error("resolution {width}x{height} rejected: {reason}")]
    InvalidResolution {
        width: u32,
        height: u32,
        reason: String,
    },
}

/// Pull interface to the render host's current frame.
pub trait FrameSource: Send {
    /// Snapshots the current frame, or `None` if no frame is ready.
    fn current_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;

    /// Changes the capture resolution for later frames.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), CaptureError>;
}
