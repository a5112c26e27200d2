//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Opcode byte does not map to a known frame kind
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Input ended before a length-prefixed field was complete
    #[error("unexpected end of input: need {needed} bytes, have {available}")]
    UnexpectedEof {
        /// Bytes required to finish the field
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Frame payload exceeds the configured limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Packet does not start with a known magic prefix
    #[error("invalid magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    /// Packet kind was valid but not the one the caller asked for
    #[error("unexpected packet kind: expected {expected}")]
    UnexpectedPacket {
        /// Kind that was expected
        expected: &'static str,
    },

    /// Length-prefixed string is not valid UTF-8
    #[error("invalid utf-8 string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Field is too long to fit its length prefix
    #[error("field too long: {len} bytes (max {max})")]
    FieldTooLong {
        /// Actual field length
        len: usize,
        /// Maximum the prefix can express
        max: usize,
    },

    /// Input was empty where content is required
    #[error("empty input: {0}")]
    Empty(&'static str),

    /// CBOR serialization failed
    #[error("cbor encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("cbor decode error: {0}")]
    CborDecode(String),
}

impl ProtocolError {
    pub(crate) fn eof(needed: usize, available: usize) -> Self {
        Self::UnexpectedEof { needed, available }
    }
}
