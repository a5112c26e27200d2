//! Transport frames.
//!
//! A [`Frame`] is an opcode plus a plaintext payload. WebSocket client
//! masking is removed by the WebSocket layer before a frame is built, so
//! every binding hands the core the same unmasked bytes.
//!
//! # TCP layout
//!
//! ```text
//! +--------+----------------+-------------------+
//! | opcode | length (u32 LE)| payload           |
//! | 1 byte | 4 bytes        | length bytes      |
//! +--------+----------------+-------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, little_endian::U32};

use crate::{
    errors::{ProtocolError, Result},
    opcodes::OpCode,
};

/// Maximum payload accepted in a single frame (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Fixed 5-byte head of a TCP frame.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHead {
    opcode: u8,
    length: U32,
}

impl FrameHead {
    /// Size of the head on the wire.
    pub const SIZE: usize = 5;

    /// Build a head for the given opcode and payload length.
    pub fn new(opcode: OpCode, length: u32) -> Self {
        Self { opcode: opcode.to_u8(), length: U32::new(length) }
    }

    /// Parse a head from the start of `bytes`.
    ///
    /// The opcode is not validated here; see [`FrameHead::opcode`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::read_from_prefix(bytes)
            .map(|(head, _)| head)
            .map_err(|_| ProtocolError::eof(Self::SIZE, bytes.len()))
    }

    /// Frame opcode.
    pub fn opcode(&self) -> Result<OpCode> {
        OpCode::from_u8(self.opcode)
    }

    /// Declared payload length.
    pub fn payload_len(&self) -> usize {
        self.length.get() as usize
    }

    /// Reject heads whose declared length exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn validate(&self) -> Result<OpCode> {
        let len = self.payload_len();
        if len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: len, max: MAX_PAYLOAD_SIZE });
        }
        self.opcode()
    }

    /// Raw head bytes.
    pub fn as_wire(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self { opcode, payload: payload.into() }
    }

    /// Frame opcode.
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Change the opcode.
    pub fn set_opcode(&mut self, opcode: OpCode) {
        self.opcode = opcode;
    }

    /// Frame payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Consume the frame, returning the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Append the TCP encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(self.opcode, &self.payload, dst)
    }

    /// Decode one TCP frame from the start of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
    /// the number of bytes consumed.
    pub fn decode(src: &[u8]) -> Result<Option<(Self, usize)>> {
        if src.len() < FrameHead::SIZE {
            return Ok(None);
        }
        let head = FrameHead::parse(src)?;
        let opcode = head.validate()?;
        let total = FrameHead::SIZE + head.payload_len();
        if src.len() < total {
            return Ok(None);
        }
        let payload = Bytes::copy_from_slice(&src[FrameHead::SIZE..total]);
        Ok(Some((Self::new(opcode, payload), total)))
    }
}

/// Append a TCP frame built from borrowed parts to `dst`.
pub fn encode_frame(opcode: OpCode, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: payload.len(), max: MAX_PAYLOAD_SIZE });
    }
    let head = FrameHead::new(opcode, payload.len() as u32);
    dst.reserve(FrameHead::SIZE + payload.len());
    dst.put_slice(head.as_wire());
    dst.put_slice(payload);
    Ok(())
}
