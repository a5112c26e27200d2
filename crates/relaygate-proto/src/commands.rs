//! Well-known commands, metadata keys, service names and protocols.

use std::{fmt, str::FromStr};

/// Client sign-in, handled by the login service.
pub const LOGIN_SIGN_IN: &str = "login.signin";
/// Client sign-out, raised by the gateway on disconnect.
pub const LOGIN_SIGN_OUT: &str = "login.signout";
/// Pushed to a previous location when the account signs in elsewhere.
pub const LOGIN_KICKOUT: &str = "login.kickout";

/// One-to-one message.
pub const CHAT_USER_TALK: &str = "chat.user.talk";
/// Group message.
pub const CHAT_GROUP_TALK: &str = "chat.group.talk";
/// Read acknowledgement.
pub const CHAT_TALK_ACK: &str = "chat.talk.ack";

/// Offline message index sync.
pub const OFFLINE_INDEX: &str = "chat.offline.index";
/// Offline message content sync.
pub const OFFLINE_CONTENT: &str = "chat.offline.content";

/// Create a group.
pub const GROUP_CREATE: &str = "chat.group.create";
/// Join a group.
pub const GROUP_JOIN: &str = "chat.group.join";
/// Leave a group.
pub const GROUP_QUIT: &str = "chat.group.quit";
/// List group members.
pub const GROUP_MEMBERS: &str = "chat.group.members";
/// Group details.
pub const GROUP_DETAIL: &str = "chat.group.detail";

/// Service id of the instance that originated a packet, or that must
/// deliver it.
pub const META_DEST_SERVER: &str = "dest.server";
/// Comma-joined channel ids a pushed packet fans out to.
pub const META_DEST_CHANNELS: &str = "dest.channels";
/// Application the client belongs to.
pub const META_APP: &str = "app";
/// Account of the client.
pub const META_ACCOUNT: &str = "account";

/// WebSocket gateway service name.
pub const SN_WGATEWAY: &str = "wgateway";
/// TCP gateway service name.
pub const SN_TGATEWAY: &str = "tgateway";
/// Login service name. Login and chat run in the same service.
pub const SN_LOGIN: &str = "chat";
/// Chat service name.
pub const SN_CHAT: &str = "chat";
/// Internal RPC service name.
pub const SN_SERVICE: &str = "service";

/// Transport protocol advertised in a service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Custom-framed TCP
    Tcp,
    /// UDP, advertised only
    Udp,
    /// WebSocket
    WebSocket,
}

impl Protocol {
    /// Registry string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "websocket" | "ws" => Ok(Self::WebSocket),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}
