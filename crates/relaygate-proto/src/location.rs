//! Where an online account is attached.

use bytes::{Bytes, BytesMut};

use crate::{
    codec,
    errors::{ProtocolError, Result},
};

/// Channel and gateway an account's connection lives on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    /// Client channel id
    pub channel_id: String,
    /// Service id of the gateway holding the channel
    pub gate_id: String,
}

impl Location {
    /// New location.
    pub fn new(channel_id: impl Into<String>, gate_id: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), gate_id: gate_id.into() }
    }

    /// Encode as two u16-prefixed strings: channel id, then gate id.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(4 + self.channel_id.len() + self.gate_id.len());
        codec::put_short_bytes(&mut buf, self.channel_id.as_bytes())?;
        codec::put_short_bytes(&mut buf, self.gate_id.as_bytes())?;
        Ok(buf.freeze())
    }

    /// Decode from [`Location::to_bytes`] output.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtocolError::Empty("location"));
        }
        let mut src = data;
        let channel_id = codec::get_short_string(&mut src)?;
        let gate_id = codec::get_short_string(&mut src)?;
        Ok(Self { channel_id, gate_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout() {
        let loc = Location::new("c1", "g");
        assert_eq!(loc.to_bytes().unwrap().as_ref(), &[2, 0, b'c', b'1', 1, 0, b'g']);
        assert_eq!(Location::from_bytes(&loc.to_bytes().unwrap()).unwrap(), loc);
    }

    #[test]
    fn empty_input_rejected() {
        assert!(matches!(Location::from_bytes(&[]), Err(ProtocolError::Empty(_))));
    }

    #[test]
    fn missing_gate_rejected() {
        assert!(Location::from_bytes(&[1, 0, b'c']).is_err());
    }
}
