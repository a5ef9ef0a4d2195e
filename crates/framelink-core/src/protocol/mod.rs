//! Protocol module containing message types, the frame and control codecs,
//! the transport envelope, and sequence numbering.

pub mod codec;
pub mod control;
pub mod envelope;
pub mod legacy;
pub mod messages;
pub mod schema;
pub mod sequence;

pub use codec::{decode_frame, decode_frame_header, encode_frame, now_ms, ProtocolError};
pub use control::{decode_control, encode_control};
pub use envelope::{
    decode_envelope, decode_envelope_header, encode_envelope, Envelope, DEFAULT_MAX_BODY_SIZE,
    ENVELOPE_HEADER_SIZE,
};
pub use legacy::{decode_control_json, is_json_object};
pub use messages::*;
pub use schema::{validate, ArgKind, ArgSpec};
pub use sequence::SequenceCounter;
