//! Transport envelope: a topic-tagged, length-delimited message.
//!
//! Every message on a Framelink stream connection is one envelope:
//!
//! ```text
//! [topic_len:2][body_len:4][topic:topic_len][body:body_len]
//! ```
//!
//! The topic is what subscribers filter on (frame publishers use the camera
//! id).  The body is an encoded frame or control message.

use crate::protocol::codec::ProtocolError;

/// Size of the fixed envelope prefix.
pub const ENVELOPE_HEADER_SIZE: usize = 6;

/// Default upper bound on an envelope body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// A topic plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub topic: Vec<u8>,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(topic: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }

    /// An envelope with an empty topic.
    pub fn untagged(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Vec::new(), body)
    }

    /// Returns `true` if the topic starts with `prefix` (an empty prefix
    /// matches everything).
    pub fn matches_prefix(&self, prefix: &[u8]) -> bool {
        self.topic.starts_with(prefix)
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_HEADER_SIZE + self.topic.len() + self.body.len()
    }
}

/// Encodes an envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPacket`] if the topic exceeds `u16::MAX`
/// bytes or [`ProtocolError::TooLarge`] if the body exceeds `max_body`.
pub fn encode_envelope(envelope: &Envelope, max_body: usize) -> Result<Vec<u8>, ProtocolError> {
    let topic_len = u16::try_from(envelope.topic.len()).map_err(|_| {
        ProtocolError::InvalidPacket(format!("topic of {} bytes is too long", envelope.topic.len()))
    })?;
    if envelope.body.len() > max_body || u32::try_from(envelope.body.len()).is_err() {
        return Err(ProtocolError::TooLarge {
            size: envelope.body.len(),
            limit: max_body,
        });
    }

    let mut buf = Vec::with_capacity(envelope.encoded_len());
    buf.extend_from_slice(&topic_len.to_be_bytes());
    buf.extend_from_slice(&(envelope.body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&envelope.topic);
    buf.extend_from_slice(&envelope.body);
    Ok(buf)
}

/// Parses the 6-byte prefix, returning `(topic_len, body_len)`.
///
/// Stream readers call this first, then read exactly `topic_len + body_len`
/// more bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::TooLarge`] if the declared body exceeds
/// `max_body`, so no buffer is allocated for it.
pub fn decode_envelope_header(
    header: &[u8; ENVELOPE_HEADER_SIZE],
    max_body: usize,
) -> Result<(usize, usize), ProtocolError> {
    let topic_len = u16::from_be_bytes([header[0], header[1]]) as usize;
    let body_len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if body_len > max_body {
        return Err(ProtocolError::TooLarge {
            size: body_len,
            limit: max_body,
        });
    }
    Ok((topic_len, body_len))
}

/// Decodes one envelope from the start of `bytes`, returning it and the
/// number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] when `bytes` is shorter than
/// the declared sizes, or [`ProtocolError::TooLarge`] as for
/// [`decode_envelope_header`].
pub fn decode_envelope(bytes: &[u8], max_body: usize) -> Result<(Envelope, usize), ProtocolError> {
    let Some(prefix) = bytes.get(..ENVELOPE_HEADER_SIZE) else {
        return Err(ProtocolError::MalformedMessage(format!(
            "envelope header needs {ENVELOPE_HEADER_SIZE} bytes, got {}",
            bytes.len()
        )));
    };
    let mut header = [0u8; ENVELOPE_HEADER_SIZE];
    header.copy_from_slice(prefix);
    let (topic_len, body_len) = decode_envelope_header(&header, max_body)?;

    let total = ENVELOPE_HEADER_SIZE + topic_len + body_len;
    if bytes.len() < total {
        return Err(ProtocolError::MalformedMessage(format!(
            "envelope declares {total} bytes, got {}",
            bytes.len()
        )));
    }

    let topic_end = ENVELOPE_HEADER_SIZE + topic_len;
    Ok((
        Envelope {
            topic: bytes[ENVELOPE_HEADER_SIZE..topic_end].to_vec(),
            body: bytes[topic_end..total].to_vec(),
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip_with_topic() {
        let env = Envelope::new("cam0", vec![1, 2, 3]);
        let bytes = encode_envelope(&env, DEFAULT_MAX_BODY_SIZE).unwrap();
        let (decoded, used) = decode_envelope(&bytes, DEFAULT_MAX_BODY_SIZE).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_decode_consumes_only_the_first_envelope() {
        // Arrange – two envelopes back to back
        let mut bytes = encode_envelope(&Envelope::untagged(b"a".to_vec()), 64).unwrap();
        let first_len = bytes.len();
        bytes.extend(encode_envelope(&Envelope::untagged(b"bb".to_vec()), 64).unwrap());

        // Act
        let (first, used) = decode_envelope(&bytes, 64).unwrap();

        // Assert
        assert_eq!(first.body, b"a");
        assert_eq!(used, first_len);
    }

    #[test]
    fn test_encode_rejects_body_over_limit() {
        let env = Envelope::untagged(vec![0u8; 10]);
        assert_eq!(
            encode_envelope(&env, 9),
            Err(ProtocolError::TooLarge { size: 10, limit: 9 })
        );
    }

    #[test]
    fn test_decode_header_rejects_declared_body_over_limit() {
        let mut header = [0u8; ENVELOPE_HEADER_SIZE];
        header[2..6].copy_from_slice(&1_000_000u32.to_be_bytes());
        assert!(matches!(
            decode_envelope_header(&header, 1024),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_envelope_is_malformed() {
        let bytes = encode_envelope(&Envelope::new("t", vec![9; 4]), 64).unwrap();
        assert!(matches!(
            decode_envelope(&bytes[..bytes.len() - 1], 64),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_empty_prefix_matches_every_topic() {
        let env = Envelope::new("cam7", Vec::new());
        assert!(env.matches_prefix(b""));
        assert!(env.matches_prefix(b"cam"));
        assert!(!env.matches_prefix(b"cam8"));
    }
}
