//! Inter-service dialer.

use async_trait::async_trait;
use relaygate_core::{Conn, DialError, Dialer, DialerContext};
use relaygate_proto::{OpCode, messages::InnerHandshakeRequest};
use tracing::info;

use crate::tcp;

/// Dials a peer service over TCP and announces the local service id.
///
/// The announcement is a single binary frame carrying a CBOR
/// `InnerHandshakeRequest`, sent before any packet. The peer's acceptor uses
/// it as the channel id, which is what lets that peer push packets back.
#[derive(Debug, Clone)]
pub struct ServiceDialer {
    service_id: String,
}

impl ServiceDialer {
    /// Dialer announcing `service_id`.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self { service_id: service_id.into() }
    }
}

#[async_trait]
impl Dialer for ServiceDialer {
    async fn dial_and_handshake(&self, ctx: &DialerContext) -> Result<Conn, DialError> {
        let deadline = tokio::time::Instant::now() + ctx.timeout;
        let mut conn = tcp::connect(&ctx.address, ctx.timeout).await?;

        let req = InnerHandshakeRequest { service_id: self.service_id.clone() };
        let payload = req.encode().map_err(|e| DialError::Handshake(e.to_string()))?;
        info!(local = %self.service_id, peer = %ctx.id, addr = %ctx.address, "send handshake");

        tokio::time::timeout_at(deadline, async {
            conn.write_frame(OpCode::Binary, &payload).await?;
            conn.flush().await
        })
        .await
        .map_err(|_| DialError::Timeout(ctx.address.clone()))??;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn sends_handshake_first() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = tcp::wrap(stream);
            conn.read_frame().await.unwrap()
        });

        let ctx = DialerContext {
            id: "chat-1".into(),
            name: "chat".into(),
            address: addr.to_string(),
            timeout: Duration::from_secs(5),
        };
        let _conn = ServiceDialer::new("gate-1").dial_and_handshake(&ctx).await.unwrap();

        let frame = accept.await.unwrap();
        assert_eq!(frame.opcode(), OpCode::Binary);
        let req = InnerHandshakeRequest::decode(&frame.into_payload()).unwrap();
        assert_eq!(req.service_id, "gate-1");
    }

    #[tokio::test]
    async fn unreachable_address_fails() {
        let ctx = DialerContext {
            id: "x".into(),
            name: "chat".into(),
            address: "127.0.0.1:1".into(),
            timeout: Duration::from_secs(2),
        };
        assert!(ServiceDialer::new("gate-1").dial_and_handshake(&ctx).await.is_err());
    }
}
