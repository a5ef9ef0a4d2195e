//! Binary codec for encoding and decoding Framelink frame packets.
//!
//! Wire format:
//! ```text
//! [sequence:8][timestamp_ms:8][width:4][height:4][pixel_format:1][payload_len:4][payload:N]
//! ```
//! Total header size: 29 bytes. All multi-byte integers are big-endian, here
//! and in every other Framelink binary structure.
//!
//! The frame is the whole transport message: there is no trailing data, so a
//! buffer whose length differs from `29 + payload_len` in either direction is
//! malformed.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::protocol::messages::{CommandName, FrameHeader, FramePacket, PixelFormat, FRAME_HEADER_SIZE};

/// Errors that can occur while encoding or decoding any Framelink message.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The bytes could not be parsed: truncated or trailing data, bad UTF-8,
    /// zero dimensions, unknown pixel format, unterminated quote, etc.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The control command name is not part of the vocabulary.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A control argument is missing, unexpected, or has the wrong type.
    #[error("invalid argument `{key}` for {command}: {reason}")]
    InvalidArgument {
        command: CommandName,
        key: String,
        reason: String,
    },

    /// The value handed to an encoder cannot be represented on the wire.
    #[error("cannot encode: {0}")]
    InvalidPacket(String),

    /// A transport frame declares a body larger than the configured limit.
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`FramePacket`] into header + payload bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPacket`] if the width or height is zero,
/// the payload exceeds `u32::MAX` bytes, a raw payload does not match
/// `width * height * bytes_per_pixel`, or a compressed payload is empty.
///
/// # Examples
///
/// ```rust
/// use framelink_core::{decode_frame, encode_frame, FramePacket, PixelFormat};
///
/// let packet = FramePacket {
///     sequence: 42,
///     timestamp_ms: 1000,
///     width: 2,
///     height: 1,
///     pixel_format: PixelFormat::Gray8,
///     payload: vec![0x10, 0x20],
/// };
/// let bytes = encode_frame(&packet).unwrap();
/// assert_eq!(decode_frame(&bytes).unwrap(), packet);
/// ```
pub fn encode_frame(packet: &FramePacket) -> Result<Vec<u8>, ProtocolError> {
    if packet.width == 0 || packet.height == 0 {
        return Err(ProtocolError::InvalidPacket(format!(
            "frame dimensions must be non-zero, got {}x{}",
            packet.width, packet.height
        )));
    }
    let payload_len = u32::try_from(packet.payload.len()).map_err(|_| {
        ProtocolError::InvalidPacket(format!(
            "payload of {} bytes does not fit a u32 length",
            packet.payload.len()
        ))
    })?;
    check_payload_size(packet.pixel_format, packet.width, packet.height, packet.payload.len())
        .map_err(ProtocolError::InvalidPacket)?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + packet.payload.len());

    // Header: sequence (8) + timestamp (8) + width (4) + height (4) +
    //         pixel_format (1) + payload_len (4) = 29 bytes
    buf.extend_from_slice(&packet.sequence.to_be_bytes());
    buf.extend_from_slice(&packet.timestamp_ms.to_be_bytes());
    buf.extend_from_slice(&packet.width.to_be_bytes());
    buf.extend_from_slice(&packet.height.to_be_bytes());
    buf.push(packet.pixel_format as u8);
    buf.extend_from_slice(&payload_len.to_be_bytes());

    buf.extend_from_slice(&packet.payload);
    Ok(buf)
}

/// Decodes and validates only the 29-byte header at the start of `bytes`.
///
/// Useful for relays that forward frames without copying the payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] if fewer than 29 bytes are
/// available, a dimension is zero, or the pixel format byte is unknown.
pub fn decode_frame_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::MalformedMessage(format!(
            "frame header needs {FRAME_HEADER_SIZE} bytes, got {}",
            bytes.len()
        )));
    }

    let sequence = read_u64(bytes, 0);
    let timestamp_ms = read_u64(bytes, 8);
    let width = read_u32(bytes, 16);
    let height = read_u32(bytes, 20);
    if width == 0 || height == 0 {
        return Err(ProtocolError::MalformedMessage(format!(
            "frame dimensions must be non-zero, got {width}x{height}"
        )));
    }

    let format_byte = bytes[24];
    let pixel_format = PixelFormat::try_from(format_byte).map_err(|_| {
        ProtocolError::MalformedMessage(format!("unknown pixel format: 0x{format_byte:02X}"))
    })?;

    let payload_length = read_u32(bytes, 25);

    Ok(FrameHeader {
        sequence,
        timestamp_ms,
        width,
        height,
        pixel_format,
        payload_length,
    })
}

/// Decodes one [`FramePacket`] occupying the whole of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] when the header is invalid
/// (see [`decode_frame_header`]), when the declared payload length disagrees
/// with the bytes actually present, or when a raw payload does not match the
/// frame dimensions.  Never reads out of bounds.
pub fn decode_frame(bytes: &[u8]) -> Result<FramePacket, ProtocolError> {
    let header = decode_frame_header(bytes)?;

    let declared = header.payload_length as usize;
    let available = bytes.len() - FRAME_HEADER_SIZE;
    if declared != available {
        return Err(ProtocolError::MalformedMessage(format!(
            "payload length mismatch: header says {declared}, available is {available}"
        )));
    }

    check_payload_size(header.pixel_format, header.width, header.height, declared)
        .map_err(ProtocolError::MalformedMessage)?;

    Ok(FramePacket {
        sequence: header.sequence,
        timestamp_ms: header.timestamp_ms,
        width: header.width,
        height: header.height,
        pixel_format: header.pixel_format,
        payload: bytes[FRAME_HEADER_SIZE..].to_vec(),
    })
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before 1970.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Checks the payload size against the pixel format and dimensions.
fn check_payload_size(
    format: PixelFormat,
    width: u32,
    height: u32,
    actual: usize,
) -> Result<(), String> {
    match format.raw_payload_len(width, height) {
        Some(expected) if expected != actual => Err(format!(
            "{format:?} frame of {width}x{height} needs {expected} payload bytes, got {actual}"
        )),
        None if format.is_compressed() && actual == 0 => {
            Err(format!("{format:?} frame has an empty payload"))
        }
        None if !format.is_compressed() => {
            Err(format!("{format:?} frame of {width}x{height} is too large"))
        }
        _ => Ok(()),
    }
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(raw)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
