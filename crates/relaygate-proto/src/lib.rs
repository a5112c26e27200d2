//! Wire format for the relaygate protocol.
//!
//! Two layers travel over every connection:
//!
//! - **Frames**: the transport unit. Over TCP a frame is a 1-byte opcode, a
//!   4-byte little-endian length and the payload. Over WebSocket the native
//!   framing is used and only the opcode/payload pair is surfaced.
//! - **Packets**: the application unit carried in the payload of a binary
//!   frame. A 4-byte magic tells a [`LogicPkt`] (routed command with a CBOR
//!   header and opaque body) from a [`BasicPkt`] (heartbeat).
//!
//! Routing decisions only need the packet header, so the body stays opaque
//! bytes until a handler asks for it with [`LogicPkt::read_body`].
//!
//! # Security
//!
//! All length prefixes are bounds-checked before any allocation and frame
//! payloads are capped at [`frame::MAX_PAYLOAD_SIZE`].
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod basic;
pub mod codec;
pub mod commands;
pub mod errors;
pub mod frame;
pub mod location;
pub mod messages;
pub mod opcodes;
pub mod packet;
pub mod sequence;

pub use basic::{BasicPkt, Packet};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameHead};
pub use location::Location;
pub use opcodes::OpCode;
pub use packet::{Flag, Header, LogicPkt, Meta, MetaType, MetaValue, Status};
