//! Capabilities the server hands to the application layer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{conn::Conn, error::{ChannelError, HandshakeError}};

/// Key/value metadata attached to a channel at handshake time.
pub type ChannelMeta = HashMap<String, String>;

/// Something a message can be pushed back to.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Channel id.
    fn id(&self) -> &str;

    /// Queue a payload for delivery.
    async fn push(&self, payload: Bytes) -> Result<(), ChannelError>;

    /// Handshake metadata.
    fn meta(&self) -> &ChannelMeta;
}

/// Result of a successful handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accepted {
    /// Id the channel is registered under
    pub channel_id: String,
    /// Metadata exposed through [`Agent::meta`]
    pub meta: ChannelMeta,
}

impl Accepted {
    /// Accepted handshake without metadata.
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), meta: ChannelMeta::new() }
    }
}

/// Runs the handshake on a freshly upgraded connection.
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// Authenticate the peer and pick its channel id. Errors reject the
    /// connection; the error text becomes the close reason.
    async fn accept(&self, conn: &mut Conn, login_wait: Duration) -> Result<Accepted, HandshakeError>;
}

/// Receives every non-empty payload read from a channel.
#[async_trait]
pub trait MessageListener: Send + Sync + 'static {
    /// Handle one payload. Runs on the dispatch pool, not the read loop.
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes);
}

/// Notified when a channel's read loop ends.
#[async_trait]
pub trait StateListener: Send + Sync + 'static {
    /// Channel `id` has been deregistered.
    async fn disconnect(&self, id: &str);
}

/// Acceptor that performs no handshake and assigns a random id.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAcceptor;

#[async_trait]
impl Acceptor for DefaultAcceptor {
    async fn accept(&self, _conn: &mut Conn, _login_wait: Duration) -> Result<Accepted, HandshakeError> {
        Ok(Accepted::new(format!("{:032x}", rand::random::<u128>())))
    }
}
