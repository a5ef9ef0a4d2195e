//! Text codec for control messages.
//!
//! ```text
//! CAMERA_TRANSFORM request_id=7f2c target=cam0 x=1.5 y=0 z=120 pitch=0 yaw=90 roll=0
//! ERROR request_id=7f2c code=unknown_command reason="no such command: EXPLODE"
//! ```
//!
//! One message per transport message; there is no terminator.  Keys are
//! `[A-Za-z0-9_.-]+`.  A value is written bare unless it is empty or contains
//! whitespace, `"`, `=` or `\`, in which case it is double-quoted with `\"`
//! and `\\` escapes.  The key `request_id` is reserved and maps to
//! [`ControlMessage::request_id`].

use std::collections::HashSet;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::{CommandName, ControlMessage, REQUEST_ID_KEY};

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ControlMessage`] as UTF-8 text.
///
/// The request id, when present, is written first after the command name.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPacket`] if an argument key is empty,
/// contains characters outside `[A-Za-z0-9_.-]`, or uses the reserved
/// `request_id` key.
///
/// # Examples
///
/// ```rust
/// use framelink_core::{decode_control, encode_control, CommandName, ControlMessage};
///
/// let msg = ControlMessage::new(CommandName::SetCapture).with_arg("enabled", false);
/// let bytes = encode_control(&msg).unwrap();
/// assert_eq!(bytes, b"SET_CAPTURE enabled=false");
/// assert_eq!(decode_control(&bytes).unwrap(), msg);
/// ```
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut out = String::from(msg.command.as_str());

    if let Some(id) = &msg.request_id {
        out.push(' ');
        out.push_str(REQUEST_ID_KEY);
        out.push('=');
        write_value(&mut out, id);
    }

    for (key, value) in &msg.args {
        if key == REQUEST_ID_KEY {
            return Err(ProtocolError::InvalidPacket(format!(
                "`{REQUEST_ID_KEY}` is reserved; set ControlMessage::request_id instead"
            )));
        }
        if !is_valid_key(key) {
            return Err(ProtocolError::InvalidPacket(format!("invalid argument key `{key}`")));
        }
        out.push(' ');
        out.push_str(key);
        out.push('=');
        write_value(&mut out, value);
    }

    Ok(out.into_bytes())
}

/// Decodes one [`ControlMessage`] from UTF-8 text.
///
/// Surrounding whitespace is ignored and the command name is matched without
/// regard to ASCII case.  Argument order is preserved.
///
/// # Errors
///
/// - [`ProtocolError::MalformedMessage`] for invalid UTF-8, empty input, a
///   badly formed token, an unterminated quote, or a duplicate key.
/// - [`ProtocolError::UnknownCommand`] when the command name is well formed
///   but not part of the vocabulary.
pub fn decode_control(bytes: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid UTF-8: {e}")))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::MalformedMessage("empty control message".to_string()));
    }

    let (name, rest) = match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], &text[idx..]),
        None => (text, ""),
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ProtocolError::MalformedMessage(format!(
            "invalid command token `{name}`"
        )));
    }
    let command: CommandName = name.parse()?;

    let mut msg = ControlMessage::new(command);
    let mut seen = HashSet::new();
    let mut chars = rest.char_indices().peekable();

    loop {
        skip_whitespace(&mut chars);
        let Some(&(key_start, _)) = chars.peek() else {
            break;
        };

        let key_end = read_key(rest, &mut chars)?;
        let key = &rest[key_start..key_end];
        let value = read_value(rest, key, &mut chars)?;

        if !seen.insert(key.to_string()) {
            return Err(ProtocolError::MalformedMessage(format!("duplicate key `{key}`")));
        }
        if key == REQUEST_ID_KEY {
            msg.request_id = Some(value);
        } else {
            msg.args.push((key.to_string(), value));
        }
    }

    Ok(msg)
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

type Cursor<'a> = Peekable<CharIndices<'a>>;

fn skip_whitespace(chars: &mut Cursor<'_>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

/// Consumes `key=` and returns the byte offset where the key ends.
fn read_key(src: &str, chars: &mut Cursor<'_>) -> Result<usize, ProtocolError> {
    let start = chars.peek().map(|(i, _)| *i).unwrap_or(src.len());
    loop {
        match chars.next() {
            Some((i, '=')) => {
                if i == start {
                    return Err(ProtocolError::MalformedMessage(
                        "argument with empty key".to_string(),
                    ));
                }
                return Ok(i);
            }
            Some((_, c)) if is_key_char(c) => {}
            Some((i, c)) if c.is_whitespace() => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "argument `{}` is missing `=`",
                    &src[start..i]
                )));
            }
            Some((_, c)) => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "invalid character `{c}` in argument key"
                )));
            }
            None => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "argument `{}` is missing `=`",
                    &src[start..]
                )));
            }
        }
    }
}

/// Reads a bare or quoted value following `key=`.
fn read_value(src: &str, key: &str, chars: &mut Cursor<'_>) -> Result<String, ProtocolError> {
    if chars.next_if(|(_, c)| *c == '"').is_some() {
        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, c @ ('"' | '\\'))) => value.push(c),
                    Some((_, c)) => {
                        return Err(ProtocolError::MalformedMessage(format!(
                            "invalid escape `\\{c}` in value of `{key}`"
                        )));
                    }
                    None => return Err(unterminated(key)),
                },
                Some((_, c)) => value.push(c),
                None => return Err(unterminated(key)),
            }
        }
        if chars.peek().is_some_and(|(_, c)| !c.is_whitespace()) {
            return Err(ProtocolError::MalformedMessage(format!(
                "unexpected text after quoted value of `{key}`"
            )));
        }
        return Ok(value);
    }

    let start = chars.peek().map(|(i, _)| *i).unwrap_or(src.len());
    let mut end = start;
    while let Some((i, c)) = chars.next_if(|(_, c)| !c.is_whitespace()) {
        if c == '"' || c == '=' {
            return Err(ProtocolError::MalformedMessage(format!(
                "unquoted value of `{key}` contains `{c}`"
            )));
        }
        end = i + c.len_utf8();
    }
    Ok(src[start..end].to_string())
}

fn unterminated(key: &str) -> ProtocolError {
    ProtocolError::MalformedMessage(format!("unterminated quote in value of `{key}`"))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(is_key_char)
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '=' | '\\'))
}

fn write_value(out: &mut String, value: &str) {
    if !needs_quotes(value) {
        out.push_str(value);
        return;
    }
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &ControlMessage) -> ControlMessage {
        let encoded = encode_control(msg).expect("encode failed");
        decode_control(&encoded).expect("decode failed")
    }

    #[test]
    fn test_command_without_arguments_round_trip() {
        let msg = ControlMessage::new(CommandName::Ping);
        assert_eq!(encode_control(&msg).unwrap(), b"PING");
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_transform_round_trip_preserves_argument_order() {
        let msg = ControlMessage::new(CommandName::CameraTransform)
            .with_request_id("abc-1")
            .with_arg("target", "cam0")
            .with_arg("x", 1.5)
            .with_arg("y", -2)
            .with_arg("z", 120)
            .with_arg("pitch", 0)
            .with_arg("yaw", 90)
            .with_arg("roll", 0);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_values_with_spaces_and_quotes_are_quoted() {
        // Arrange
        let msg = ControlMessage::new(CommandName::Error)
            .with_arg("code", "malformed")
            .with_arg("reason", r#"bad "token" at a\b"#);

        // Act
        let text = String::from_utf8(encode_control(&msg).unwrap()).unwrap();

        // Assert
        assert_eq!(text, r#"ERROR code=malformed reason="bad \"token\" at a\\b""#);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_empty_value_round_trips_as_empty_quotes() {
        let msg = ControlMessage::new(CommandName::CameraTransform).with_arg("target", "");
        assert_eq!(
            encode_control(&msg).unwrap(),
            br#"CAMERA_TRANSFORM target="""#.to_vec()
        );
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_decode_tolerates_extra_whitespace_and_lowercase_name() {
        let msg = decode_control(b"  set_cadence   every=3  \n").unwrap();
        assert_eq!(msg.command, CommandName::SetCadence);
        assert_eq!(msg.arg("every"), Some("3"));
    }

    #[test]
    fn test_decode_extracts_request_id_from_any_position() {
        let msg = decode_control(b"STATS verbose=true request_id=r9").unwrap();
        assert_eq!(msg.request_id.as_deref(), Some("r9"));
        assert_eq!(msg.args, vec![("verbose".to_string(), "true".to_string())]);
    }

    #[test]
    fn test_decode_unknown_command_is_rejected() {
        let result = decode_control(b"EXPLODE now=true");
        assert_eq!(result, Err(ProtocolError::UnknownCommand("EXPLODE".to_string())));
    }

    #[test]
    fn test_decode_empty_text_is_malformed() {
        assert!(matches!(decode_control(b"   "), Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_is_malformed() {
        assert!(matches!(
            decode_control(&[0x50, 0xFF, 0xFE]),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_argument_without_equals_is_malformed() {
        assert!(matches!(
            decode_control(b"SET_CAPTURE enabled"),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_unterminated_quote_is_malformed() {
        assert!(matches!(
            decode_control(br#"ERROR reason="never closed"#),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_duplicate_key_is_malformed() {
        assert!(matches!(
            decode_control(b"SET_CADENCE every=1 every=2"),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_json_looking_text_is_malformed_not_unknown() {
        assert!(matches!(
            decode_control(br#"{"type":"camera_transform"}"#),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_encode_rejects_reserved_key_in_args() {
        let msg = ControlMessage::new(CommandName::Ping).with_arg(REQUEST_ID_KEY, "x");
        assert!(matches!(encode_control(&msg), Err(ProtocolError::InvalidPacket(_))));
    }

    #[test]
    fn test_encode_rejects_key_with_space() {
        let msg = ControlMessage::new(CommandName::Ok).with_arg("bad key", "x");
        assert!(matches!(encode_control(&msg), Err(ProtocolError::InvalidPacket(_))));
    }
}
