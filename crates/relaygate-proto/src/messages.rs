//! Packet body types.
//!
//! Bodies are CBOR-encoded into [`LogicPkt::body`](crate::LogicPkt) and only
//! decoded by the handler that owns the command.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    packet::to_cbor,
};

/// Body of `login.signin`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Signed login token
    pub token: String,
    /// Whether this is a resumed connection
    pub is_after_reconnect: bool,
    /// Optional channel tags
    pub tags: Vec<String>,
}

/// Reply to `login.signin`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Channel id assigned by the gateway
    pub channel_id: String,
}

/// Login session, created by the gateway and stored by the login service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Client channel id
    pub channel_id: String,
    /// Service id of the gateway holding the channel
    pub gate_id: String,
    /// Account
    pub account: String,
    /// Application
    pub app: String,
    /// Remote address of the client
    pub remote_ip: String,
    /// Tags from the login request
    pub tags: Vec<String>,
    /// Device, empty when unknown
    pub device: String,
}

/// Body of `chat.user.talk` and `chat.group.talk`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    /// Message type (text, image, ...)
    #[serde(rename = "type")]
    pub kind: i32,
    /// Message content
    pub body: String,
    /// Free-form extra data
    pub extra: String,
}

/// Reply to a talk command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Id assigned by the message store
    pub message_id: i64,
    /// Send time in unix nanoseconds
    pub send_time: i64,
}

/// Message pushed to an online receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePush {
    /// Id assigned by the message store
    pub message_id: i64,
    /// Message type
    #[serde(rename = "type")]
    pub kind: i32,
    /// Message content
    pub body: String,
    /// Free-form extra data
    pub extra: String,
    /// Sending account
    pub sender: String,
    /// Send time in unix nanoseconds
    pub send_time: i64,
}

/// Body of `chat.talk.ack`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAckRequest {
    /// Last read message
    pub message_id: i64,
}

/// Error detail attached to a failed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable reason
    pub message: String,
}

/// Pushed to a channel that is being replaced by a newer login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickoutNotify {
    /// Channel being kicked
    pub channel_id: String,
}

/// Body of `chat.group.create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreateRequest {
    /// Display name
    pub name: String,
    /// Avatar url
    pub avatar: String,
    /// Free text introduction
    pub introduction: String,
    /// Owning account
    pub owner: String,
    /// Initial members, owner included if it should be one
    pub members: Vec<String>,
}

/// Reply to `chat.group.create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreateResponse {
    /// Id of the new group
    pub group_id: String,
}

/// Pushed to online members of a new group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreateNotify {
    /// Id of the new group
    pub group_id: String,
    /// Initial members
    pub members: Vec<String>,
}

/// Body of `chat.group.join` and `chat.group.quit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMemberRequest {
    /// Account joining or leaving
    pub account: String,
    /// Target group
    pub group_id: String,
}

/// Body of `chat.group.detail` and `chat.group.members`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGetRequest {
    /// Target group
    pub group_id: String,
}

/// One group member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member account
    pub account: String,
    /// Alias inside the group
    pub alias: String,
    /// Avatar url
    pub avatar: String,
    /// Join time in unix seconds
    pub join_time: i64,
}

/// Reply to `chat.group.detail`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGetResponse {
    /// Group id
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar url
    pub avatar: String,
    /// Free text introduction
    pub introduction: String,
    /// Owning account
    pub owner: String,
    /// Members, most recently joined first
    pub members: Vec<Member>,
}

/// Reply to `chat.group.members`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembersResponse {
    /// Members, most recently joined first
    pub members: Vec<Member>,
}

/// Body of `chat.offline.index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIndexRequest {
    /// Last message the client already has. Zero resumes from the last ack.
    pub message_id: i64,
}

/// One entry of an account's message index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIndex {
    /// Message id, fetch the content with `chat.offline.content`
    pub message_id: i64,
    /// 0 when received, 1 when sent
    pub direction: i32,
    /// Send time in unix nanoseconds
    pub send_time: i64,
    /// The other party
    pub account_b: String,
    /// Group id for group messages, empty otherwise
    pub group: String,
}

/// Reply to `chat.offline.index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIndexResponse {
    /// Index entries in message id order
    pub indexes: Vec<MessageIndex>,
}

/// Body of `chat.offline.content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContentRequest {
    /// Messages to fetch
    pub message_ids: Vec<i64>,
}

/// One stored message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Message id
    pub message_id: i64,
    /// Message type
    #[serde(rename = "type")]
    pub kind: i32,
    /// Message content
    pub body: String,
    /// Free-form extra data
    pub extra: String,
}

/// Reply to `chat.offline.content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContentResponse {
    /// Contents of the requested messages that exist
    pub contents: Vec<MessageContent>,
}

/// First frame a service sends on an inter-service connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerHandshakeRequest {
    /// Service id of the dialing instance
    pub service_id: String,
}

impl InnerHandshakeRequest {
    /// CBOR encoding sent as the raw payload of the first frame.
    pub fn encode(&self) -> Result<Bytes> {
        to_cbor(self).map(Bytes::from)
    }

    /// Decode the first frame's payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        ciborium::from_reader(payload).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogicPkt;

    #[test]
    fn body_roundtrip_through_packet() {
        let req = MessageRequest { kind: 1, body: "hi".into(), extra: String::new() };
        let pkt = LogicPkt::new("chat.user.talk").with_body(&req).unwrap();
        assert_eq!(pkt.read_body::<MessageRequest>().unwrap(), req);
    }

    #[test]
    fn handshake_request_roundtrip() {
        let req = InnerHandshakeRequest { service_id: "gate-1".into() };
        assert_eq!(InnerHandshakeRequest::decode(&req.encode().unwrap()).unwrap(), req);
        assert!(InnerHandshakeRequest::decode(b"\xff").is_err());
    }

    #[test]
    fn wrong_body_type_fails() {
        let pkt = LogicPkt::new("chat.user.talk").with_body(&"not a struct").unwrap();
        assert!(pkt.read_body::<MessageRequest>().is_err());
    }
}
