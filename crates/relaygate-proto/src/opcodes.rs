//! Frame opcodes.
//!
//! Values match the WebSocket opcode space so the same enum describes frames
//! on both transports.

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::errors::{ProtocolError, Result};

/// Frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// UTF-8 text payload
    Text = 0x1,
    /// Binary payload, carries packets
    Binary = 0x2,
    /// Connection close, payload is an optional reason
    Close = 0x8,
    /// Heartbeat request
    Ping = 0x9,
    /// Heartbeat reply
    Pong = 0xa,
}

impl OpCode {
    /// Parse an opcode byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xa => Ok(Self::Pong),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }

    /// Wire byte for this opcode.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is a control frame (close, ping, pong).
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_u8(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_opcodes_parse() {
        for op in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::from_u8(op.to_u8()).unwrap(), op);
        }
    }

    #[test]
    fn reserved_opcode_rejected() {
        assert!(matches!(OpCode::from_u8(0x3), Err(ProtocolError::InvalidOpcode(0x3))));
        assert!(matches!(OpCode::from_u8(0xff), Err(ProtocolError::InvalidOpcode(0xff))));
    }

    #[test]
    fn control_frames() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Binary.is_control());
    }
}
