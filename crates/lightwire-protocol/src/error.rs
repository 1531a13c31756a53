//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding or classifying a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame carried no bytes between two delimiters.
    #[error("empty frame")]
    EmptyFrame,

    /// Frame text is not valid standard base64.
    #[error("invalid base64 encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// Packet too short to carry the header field being read.
    #[error("packet too short: {len} bytes, need at least {needed}")]
    TooShort { len: usize, needed: usize },

    /// Payload implied by the packet type exceeds the bytes present.
    #[error("truncated {kind} payload: need {needed} bytes, {available} available")]
    Truncated {
        kind: &'static str,
        needed: usize,
        available: usize,
    },

    /// Discriminator byte does not name a known packet type.
    #[error("unknown packet type: {0}")]
    UnknownDiscriminator(u8),

    /// IO error while reading or writing frames.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true for malformed frames: bad encoding, empty, short or truncated.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::EmptyFrame
                | Self::InvalidEncoding(_)
                | Self::TooShort { .. }
                | Self::Truncated { .. }
        )
    }

    /// Returns true for well-formed packets of an unrecognized type.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::UnknownDiscriminator(_))
    }
}
