//! Packet envelope and heartbeat packets.
//!
//! Every application payload starts with a 4-byte magic that selects the
//! packet kind:
//!
//! | magic         | kind         |
//! |---------------|--------------|
//! | `c3 11 a3 65` | [`LogicPkt`] |
//! | `c3 15 a7 65` | [`BasicPkt`] |

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    codec,
    errors::{ProtocolError, Result},
    packet::LogicPkt,
};

/// Magic prefix of a logic packet.
pub const LOGIC_MAGIC: [u8; 4] = [0xc3, 0x11, 0xa3, 0x65];

/// Magic prefix of a basic packet.
pub const BASIC_MAGIC: [u8; 4] = [0xc3, 0x15, 0xa7, 0x65];

/// Basic packet code: application-level ping.
pub const CODE_PING: u16 = 1;

/// Basic packet code: application-level pong.
pub const CODE_PONG: u16 = 2;

/// Lightweight control packet, `[u16 code][u16 len][body]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicPkt {
    /// Packet code
    pub code: u16,
    /// Optional body
    pub body: Bytes,
}

impl BasicPkt {
    /// Ping packet.
    pub fn ping() -> Self {
        Self { code: CODE_PING, body: Bytes::new() }
    }

    /// Pong packet.
    pub fn pong() -> Self {
        Self { code: CODE_PONG, body: Bytes::new() }
    }

    /// Append the encoded packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u16_le(self.code);
        codec::put_short_bytes(dst, &self.body)
    }

    /// Decode a packet, advancing `src` past it.
    pub fn decode(src: &mut &[u8]) -> Result<Self> {
        let code = codec::get_u16(src)?;
        let body = codec::get_short_bytes(src)?;
        Ok(Self { code, body })
    }
}

/// Either kind of application packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Routed command
    Logic(LogicPkt),
    /// Heartbeat or other control packet
    Basic(BasicPkt),
}

impl Packet {
    /// Decode a magic-prefixed payload.
    pub fn read(payload: &[u8]) -> Result<Self> {
        let (magic, mut rest) = split_magic(payload)?;
        match magic {
            LOGIC_MAGIC => Ok(Self::Logic(LogicPkt::decode(&mut rest)?)),
            BASIC_MAGIC => Ok(Self::Basic(BasicPkt::decode(&mut rest)?)),
            other => Err(ProtocolError::InvalidMagic(other)),
        }
    }

    /// Encode with the matching magic prefix.
    pub fn marshal(&self) -> Result<Bytes> {
        match self {
            Self::Logic(pkt) => marshal_logic(pkt),
            Self::Basic(pkt) => marshal_basic(pkt),
        }
    }
}

fn split_magic(payload: &[u8]) -> Result<([u8; 4], &[u8])> {
    match payload.split_first_chunk::<4>() {
        Some((magic, rest)) => Ok((*magic, rest)),
        None => Err(ProtocolError::eof(4, payload.len())),
    }
}

/// Encode a logic packet with its magic prefix.
pub fn marshal_logic(pkt: &LogicPkt) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64 + pkt.body.len());
    buf.put_slice(&LOGIC_MAGIC);
    pkt.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Encode a basic packet with its magic prefix.
pub fn marshal_basic(pkt: &BasicPkt) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(8 + pkt.body.len());
    buf.put_slice(&BASIC_MAGIC);
    pkt.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode a payload that must be a logic packet.
pub fn read_logic_pkt(payload: &[u8]) -> Result<LogicPkt> {
    match Packet::read(payload)? {
        Packet::Logic(pkt) => Ok(pkt),
        Packet::Basic(_) => Err(ProtocolError::UnexpectedPacket { expected: "logic" }),
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn ping_wire_bytes() {
        let bytes = marshal_basic(&BasicPkt::ping()).unwrap();
        assert_eq!(bytes.as_ref(), hex!("c3 15 a7 65 01 00 00 00"));
    }

    #[test]
    fn read_dispatches_on_magic() {
        let logic = LogicPkt::new("login.signin").with_channel("c1");
        let bytes = marshal_logic(&logic).unwrap();
        assert_eq!(&bytes[..4], &LOGIC_MAGIC);
        assert_eq!(Packet::read(&bytes).unwrap(), Packet::Logic(logic));

        let bytes = marshal_basic(&BasicPkt::pong()).unwrap();
        assert_eq!(Packet::read(&bytes).unwrap(), Packet::Basic(BasicPkt::pong()));
    }

    #[test]
    fn unknown_magic_rejected() {
        let err = Packet::read(&hex!("de ad be ef 00 00")).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMagic(m) if m == hex!("de ad be ef")));
    }

    #[test]
    fn short_payload_rejected() {
        assert!(matches!(Packet::read(&[0xc3, 0x11]), Err(ProtocolError::UnexpectedEof { .. })));
    }

    #[test]
    fn read_logic_rejects_basic() {
        let bytes = marshal_basic(&BasicPkt::ping()).unwrap();
        assert!(matches!(read_logic_pkt(&bytes), Err(ProtocolError::UnexpectedPacket { .. })));
    }
}
