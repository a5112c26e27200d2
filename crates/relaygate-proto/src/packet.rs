//! Logic packets: routed application commands.
//!
//! # Layout
//!
//! ```text
//! [u32 LE len][CBOR header][u32 LE len][body]
//! ```
//!
//! The header carries everything routing needs (command, channel id,
//! destination, metadata). The body is opaque to routing and only decoded by
//! the handler that owns the command.
//!
//! # Metadata
//!
//! Metadata entries are an ordered list, not a map. Duplicate keys are
//! allowed and lookups return the first match, so a value added by a
//! downstream hop never shadows one stamped earlier unless the earlier one is
//! deleted first.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{
    codec,
    errors::{ProtocolError, Result},
    sequence::next_sequence,
};

/// Response status carried in the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum Status {
    /// Request handled
    #[default]
    Success = 0,
    /// No destination given for a message
    NoDestination = 100,
    /// Body could not be decoded
    InvalidPacketBody = 101,
    /// Command not valid in this context
    InvalidCommand = 103,
    /// Login token rejected
    Unauthorized = 105,
    /// Internal failure
    SystemException = 300,
    /// No handler registered for the command
    NotImplemented = 301,
    /// Session missing for the channel
    SessionNotFound = 404,
}

/// Direction of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Flag {
    /// Client or service request
    #[default]
    Request = 0,
    /// Reply to a request
    Response = 1,
    /// Server-initiated push
    Push = 2,
}

/// How a metadata value should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MetaType {
    /// Raw string
    #[default]
    String = 0,
    /// Decimal integer
    Int = 1,
    /// Floating point number
    Float = 2,
}

/// One metadata entry. Values travel as strings and are typed on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Entry key
    pub key: String,
    /// String form of the value
    pub value: String,
    /// Interpretation of `value`
    pub kind: MetaType,
}

impl Meta {
    /// String-typed entry.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into(), kind: MetaType::String }
    }

    /// Parse the value according to its type.
    pub fn typed_value(&self) -> Option<MetaValue> {
        match self.kind {
            MetaType::String => Some(MetaValue::Str(self.value.clone())),
            MetaType::Int => self.value.parse().ok().map(MetaValue::Int),
            MetaType::Float => self.value.parse().ok().map(MetaValue::Float),
        }
    }
}

/// Typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// String value
    Str(String),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
}

impl MetaValue {
    /// String value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float value, if this is a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Consume into a string, if this is a string.
    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Find the first entry with `key` and return its typed value.
pub fn find_meta(meta: &[Meta], key: &str) -> Option<MetaValue> {
    meta.iter().find(|m| m.key == key).and_then(Meta::typed_value)
}

/// Routing header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Dotted command, e.g. `chat.user.talk`
    pub command: String,
    /// Id of the client connection the packet belongs to
    pub channel_id: String,
    /// Request/response correlation number
    pub sequence: u32,
    /// Packet direction
    pub flag: Flag,
    /// Response status
    pub status: Status,
    /// Destination account or group
    pub dest: String,
    /// Ordered metadata entries
    pub meta: Vec<Meta>,
}

/// A routed application packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicPkt {
    /// Routing header
    pub header: Header,
    /// Opaque body
    pub body: Bytes,
}

impl LogicPkt {
    /// New request packet for `command` with a fresh sequence number.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            header: Header { command: command.into(), sequence: next_sequence(), ..Header::default() },
            body: Bytes::new(),
        }
    }

    /// Packet carrying the identity fields of `header`: command, channel id,
    /// sequence, status and destination. Flag, metadata and body are left
    /// empty.
    pub fn from_header(header: &Header) -> Self {
        Self {
            header: Header {
                command: header.command.clone(),
                channel_id: header.channel_id.clone(),
                sequence: header.sequence,
                status: header.status,
                dest: header.dest.clone(),
                ..Header::default()
            },
            body: Bytes::new(),
        }
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.header.status = status;
        self
    }

    /// Set the sequence. Zero keeps the generated one.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        if sequence != 0 {
            self.header.sequence = sequence;
        }
        self
    }

    /// Set the channel id.
    #[must_use]
    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.header.channel_id = channel_id.into();
        self
    }

    /// Set the destination.
    #[must_use]
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.header.dest = dest.into();
        self
    }

    /// Set the flag.
    #[must_use]
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.header.flag = flag;
        self
    }

    /// Command string.
    pub fn command(&self) -> &str {
        &self.header.command
    }

    /// Channel id.
    pub fn channel_id(&self) -> &str {
        &self.header.channel_id
    }

    /// Service owning the command: the segment before the first `.`, or
    /// `"default"` when the command has no `.`.
    pub fn service_name(&self) -> &str {
        match self.header.command.split_once('.') {
            Some((service, _)) => service,
            None => "default",
        }
    }

    /// Append metadata entries.
    pub fn add_meta(&mut self, meta: impl IntoIterator<Item = Meta>) {
        self.header.meta.extend(meta);
    }

    /// Append a string entry.
    pub fn add_string_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.header.meta.push(Meta::string(key, value));
    }

    /// Append an integer entry.
    pub fn add_int_meta(&mut self, key: impl Into<String>, value: i64) {
        self.header.meta.push(Meta { key: key.into(), value: value.to_string(), kind: MetaType::Int });
    }

    /// Append a float entry.
    pub fn add_float_meta(&mut self, key: impl Into<String>, value: f64) {
        self.header.meta.push(Meta { key: key.into(), value: value.to_string(), kind: MetaType::Float });
    }

    /// First value stored under `key`, typed per its [`MetaType`]. A value
    /// that fails to parse yields `None`.
    pub fn get_meta(&self, key: &str) -> Option<MetaValue> {
        find_meta(&self.header.meta, key)
    }

    /// First string value stored under `key`.
    pub fn get_string_meta(&self, key: &str) -> Option<String> {
        self.get_meta(key).and_then(MetaValue::into_string)
    }

    /// Remove every entry with `key`, keeping the order of the rest.
    pub fn del_meta(&mut self, key: &str) {
        self.header.meta.retain(|m| m.key != key);
    }

    /// Decode the body as CBOR.
    pub fn read_body<T: DeserializeOwned>(&self) -> Result<T> {
        ciborium::from_reader(self.body.as_ref()).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }

    /// Replace the body with the CBOR encoding of `value`.
    pub fn write_body<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.body = Bytes::from(to_cbor(value)?);
        Ok(())
    }

    /// Builder form of [`LogicPkt::write_body`].
    pub fn with_body<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.write_body(value)?;
        Ok(self)
    }

    /// Append the encoded packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let header = to_cbor(&self.header)?;
        codec::put_bytes(dst, &header)?;
        codec::put_bytes(dst, &self.body)
    }

    /// Decode a packet, advancing `src` past it.
    pub fn decode(src: &mut &[u8]) -> Result<Self> {
        let header_bytes = codec::get_bytes(src)?;
        let header: Header = ciborium::from_reader(header_bytes.as_ref())
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;
        let body = codec::get_bytes(src)?;
        Ok(Self { header, body })
    }
}

impl fmt::Display for LogicPkt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command={} channel={} seq={} status={:?} body={}B",
            self.header.command,
            self.header.channel_id,
            self.header.sequence,
            self.header.status,
            self.body.len()
        )
    }
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(out)
}
