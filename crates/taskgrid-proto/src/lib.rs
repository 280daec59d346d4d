//! taskgrid-proto — the orchestrator ↔ worker wire protocol.
//!
//! Every message is a 4-byte big-endian length prefix followed by a
//! msgpack payload. The payload's outer shape is a single-key map whose
//! key is the variant name; the value is either a field-name map or a
//! positional array of the variant's fields. Both shapes are legal on
//! the wire (workers in other languages emit maps while serde-based
//! senders emit arrays) and both decode to the same [`Message`].
//!
//! Frame reads are blocking-exact: the receiver reads precisely the
//! prefixed number of bytes before decoding, and a connection closed
//! mid-frame is [`ProtoError::ConnectionClosed`], not a decode error.

pub mod error;
pub mod framing;
pub mod message;
pub mod value;

pub use error::ProtoError;
pub use framing::{MAX_FRAME_LEN, read_frame, write_frame};
pub use message::Message;
pub use value::{json_to_msgpack, msgpack_to_json};
