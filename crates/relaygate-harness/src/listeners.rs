//! Recording listener implementations.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_core::{Accepted, Acceptor, Agent, Conn, HandshakeError, MessageListener, StateListener};
use relaygate_proto::{OpCode, messages::InnerHandshakeRequest};
use tracing::debug;

/// Records every inbound payload, optionally echoing it back.
#[derive(Debug, Default)]
pub struct RecordingListener {
    received: Mutex<Vec<(String, Bytes)>>,
    echo: bool,
}

impl RecordingListener {
    /// Listener that only records.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Listener that records and pushes each payload back to its sender.
    pub fn echo() -> Arc<Self> {
        Arc::new(Self { received: Mutex::default(), echo: true })
    }

    /// `(channel id, payload)` pairs in arrival order.
    pub fn received(&self) -> Vec<(String, Bytes)> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of payloads received.
    pub fn count(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageListener for RecordingListener {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        if let Ok(mut received) = self.received.lock() {
            received.push((agent.id().to_owned(), payload.clone()));
        }
        if self.echo {
            if let Err(e) = agent.push(payload).await {
                debug!(channel_id = agent.id(), error = %e, "echo failed");
            }
        }
    }
}

/// Records disconnect notifications.
#[derive(Debug, Default)]
pub struct RecordingStateListener {
    disconnected: Mutex<Vec<String>>,
}

impl RecordingStateListener {
    /// Empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channel ids reported disconnected, in order.
    pub fn disconnected(&self) -> Vec<String> {
        self.disconnected.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StateListener for RecordingStateListener {
    async fn disconnect(&self, id: &str) {
        if let Ok(mut disconnected) = self.disconnected.lock() {
            disconnected.push(id.to_owned());
        }
    }
}

/// Handshake that takes the channel id from the first frame's payload.
///
/// An empty payload or a non-binary first frame is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticAcceptor;

#[async_trait]
impl Acceptor for StaticAcceptor {
    async fn accept(&self, conn: &mut Conn, _login_wait: Duration) -> Result<Accepted, HandshakeError> {
        let frame = conn.read_frame().await?;
        if frame.opcode() != OpCode::Binary {
            return Err(HandshakeError::Rejected("expected a binary frame".into()));
        }
        let payload = frame.into_payload();
        if payload.is_empty() {
            return Err(HandshakeError::Rejected("empty channel id".into()));
        }
        let id = String::from_utf8_lossy(&payload).into_owned();
        Ok(Accepted::new(id))
    }
}

/// Handshake for service-to-service links: the first frame must carry an
/// `InnerHandshakeRequest`, whose service id becomes the channel id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerAcceptor;

#[async_trait]
impl Acceptor for PeerAcceptor {
    async fn accept(&self, conn: &mut Conn, _login_wait: Duration) -> Result<Accepted, HandshakeError> {
        let frame = conn.read_frame().await?;
        let req = InnerHandshakeRequest::decode(&frame.into_payload())?;
        if req.service_id.is_empty() {
            return Err(HandshakeError::Rejected("empty service id".into()));
        }
        Ok(Accepted::new(req.service_id))
    }
}
