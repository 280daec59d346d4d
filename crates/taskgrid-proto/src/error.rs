//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding, decoding, or framing messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The peer closed the connection before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("i/o error: {0}")]
    Io(std::io::Error),

    #[error("frame of {0} bytes exceeds maximum")]
    FrameTooLarge(usize),

    #[error("unknown message variant: {0}")]
    UnknownVariant(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] rmpv::encode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("unsupported value: {0}")]
    Value(String),
}

impl From<std::io::Error> for ProtoError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtoError::ConnectionClosed
        } else {
            ProtoError::Io(err)
        }
    }
}
