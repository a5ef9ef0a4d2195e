//! All Framelink protocol message types.
//!
//! Two message families travel over the transport:
//!
//! - [`FramePacket`] – one captured frame, binary, 29-byte header + payload.
//! - [`ControlMessage`] – one command or reply, UTF-8 `NAME key=value ...`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Total size of the frame header in bytes.
///
/// `sequence (8) + timestamp_ms (8) + width (4) + height (4) +
/// pixel_format (1) + payload_len (4)`.
pub const FRAME_HEADER_SIZE: usize = 29;

/// Argument key reserved for the optional request id of a control message.
pub const REQUEST_ID_KEY: &str = "request_id";

// ── Pixel formats ─────────────────────────────────────────────────────────────

/// Pixel layout of a frame payload.
///
/// Raw formats carry exactly `width * height * bytes_per_pixel` bytes.
/// Compressed formats carry whatever the image encoder produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PixelFormat {
    Rgb8 = 0x01,
    Rgba8 = 0x02,
    Bgra8 = 0x03,
    Gray8 = 0x04,
    Jpeg = 0x05,
    Png = 0x06,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for compressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb8 => Some(3),
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => Some(4),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Jpeg | PixelFormat::Png => None,
        }
    }

    /// Returns `true` for encoder-produced formats (JPEG, PNG).
    pub fn is_compressed(self) -> bool {
        self.bytes_per_pixel().is_none()
    }

    /// Exact payload size for a raw frame of the given dimensions.
    ///
    /// Returns `None` for compressed formats or when the size overflows `usize`.
    pub fn raw_payload_len(self, width: u32, height: u32) -> Option<usize> {
        let bpp = self.bytes_per_pixel()?;
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(bpp)
    }
}

impl TryFrom<u8> for PixelFormat {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PixelFormat::Rgb8),
            0x02 => Ok(PixelFormat::Rgba8),
            0x03 => Ok(PixelFormat::Bgra8),
            0x04 => Ok(PixelFormat::Gray8),
            0x05 => Ok(PixelFormat::Jpeg),
            0x06 => Ok(PixelFormat::Png),
            _ => Err(()),
        }
    }
}

// ── Frame packets ─────────────────────────────────────────────────────────────

/// Fixed header prepended to every frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Per-publisher counter; strictly increasing, gaps allowed.
    pub sequence: u64,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Length of the payload in bytes (not including this header).
    pub payload_length: u32,
}

/// One captured frame plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub payload: Vec<u8>,
}

impl FramePacket {
    /// Builds the wire header describing this packet.
    ///
    /// The payload length saturates at `u32::MAX`; [`crate::encode_frame`]
    /// rejects such packets before they reach the wire.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            sequence: self.sequence,
            timestamp_ms: self.timestamp_ms,
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            payload_length: u32::try_from(self.payload.len()).unwrap_or(u32::MAX),
        }
    }
}

// ── Control commands ──────────────────────────────────────────────────────────

/// The fixed command vocabulary.
///
/// Anything outside this list is rejected with
/// [`ProtocolError::UnknownCommand`] at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    /// Move/rotate a camera (`target` selects one, empty broadcasts).
    CameraTransform,
    /// Move/rotate a controlled actor.
    ActorTransform,
    /// Enable or disable frame capture.
    SetCapture,
    /// Change the capture cadence.
    SetCadence,
    /// Switch between color and grayscale output.
    SetFormat,
    /// Change the capture resolution.
    SetResolution,
    /// Liveness probe.
    Ping,
    /// Request a statistics snapshot.
    Stats,
    /// Successful reply.
    Ok,
    /// Error reply.
    Error,
}

impl CommandName {
    /// Every known command, in wire-name order.
    pub const ALL: [CommandName; 10] = [
        CommandName::CameraTransform,
        CommandName::ActorTransform,
        CommandName::SetCapture,
        CommandName::SetCadence,
        CommandName::SetFormat,
        CommandName::SetResolution,
        CommandName::Ping,
        CommandName::Stats,
        CommandName::Ok,
        CommandName::Error,
    ];

    /// The upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::CameraTransform => "CAMERA_TRANSFORM",
            CommandName::ActorTransform => "ACTOR_TRANSFORM",
            CommandName::SetCapture => "SET_CAPTURE",
            CommandName::SetCadence => "SET_CADENCE",
            CommandName::SetFormat => "SET_FORMAT",
            CommandName::SetResolution => "SET_RESOLUTION",
            CommandName::Ping => "PING",
            CommandName::Stats => "STATS",
            CommandName::Ok => "OK",
            CommandName::Error => "ERROR",
        }
    }

    /// Returns `true` for `OK` / `ERROR`.
    pub fn is_reply(self) -> bool {
        matches!(self, CommandName::Ok | CommandName::Error)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = ProtocolError;

    /// Parses a wire name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

/// One structured command or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub command: CommandName,
    /// Ordered `key=value` arguments, excluding the request id.
    pub args: Vec<(String, String)>,
    /// Correlates a request with its reply.
    pub request_id: Option<String>,
}

impl ControlMessage {
    /// Creates a message with no arguments and no request id.
    pub fn new(command: CommandName) -> Self {
        Self {
            command,
            args: Vec::new(),
            request_id: None,
        }
    }

    /// Appends an argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.push((key.into(), value.to_string()));
        self
    }

    /// Sets the request id.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Returns the raw value of the first argument named `key`.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses an optional argument.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidArgument`] if the argument is present
    /// but does not parse as `T`.
    pub fn parse_arg<T: FromStr>(&self, key: &str) -> Result<Option<T>, ProtocolError> {
        match self.arg(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                ProtocolError::InvalidArgument {
                    command: self.command,
                    key: key.to_string(),
                    reason: format!("cannot parse `{raw}`"),
                }
            }),
        }
    }

    /// Parses a required argument.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidArgument`] if the argument is missing
    /// or does not parse as `T`.
    pub fn require_arg<T: FromStr>(&self, key: &str) -> Result<T, ProtocolError> {
        self.parse_arg(key)?
            .ok_or_else(|| ProtocolError::InvalidArgument {
                command: self.command,
                key: key.to_string(),
                reason: "missing".to_string(),
            })
    }

    /// Builds an `OK` reply correlated with this message.
    pub fn ok_reply(&self, args: Vec<(String, String)>) -> ControlMessage {
        ControlMessage {
            command: CommandName::Ok,
            args,
            request_id: self.request_id.clone(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
