//! Inbound side of a backend service.
//!
//! Gateways dial in with an `InnerHandshakeRequest`, so each channel here is
//! one gateway and its id is the gateway's service id. Packets arriving on it
//! are resolved to a sender session and handed to the [`Router`].

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_container::Container;
use relaygate_core::{
    Accepted, Acceptor, Agent, Conn, HandshakeError, MessageListener, SessionStorage, StateListener, StorageError,
};
use relaygate_proto::{
    Flag, LogicPkt, Status,
    basic::{marshal_logic, read_logic_pkt},
    commands::{LOGIN_SIGN_IN, META_DEST_CHANNELS, META_DEST_SERVER},
    messages::{InnerHandshakeRequest, Session},
};
use tracing::{debug, info, warn};

use crate::{context::Dispatcher, error::ServiceError, router::Router};

/// Tag on the provisional session built for a sign-in.
pub const TAG_AUTH_GENERATED: &str = "AuthGenerated";

/// Pushes to gateways through the container.
#[derive(Debug, Clone)]
pub struct ServerDispatcher {
    container: Weak<Container>,
}

impl ServerDispatcher {
    /// Dispatcher routing through `container`.
    pub fn new(container: Weak<Container>) -> Self {
        Self { container }
    }
}

#[async_trait]
impl Dispatcher for ServerDispatcher {
    async fn push(&self, gateway: &str, channels: &[String], mut pkt: LogicPkt) -> Result<(), ServiceError> {
        let container = self.container.upgrade().ok_or(ServiceError::ContainerGone)?;
        pkt.add_string_meta(META_DEST_CHANNELS, channels.join(","));
        container.push(gateway, pkt).await?;
        Ok(())
    }
}

/// Acceptor and listeners of a backend service.
pub struct ServiceHandler {
    router: Arc<Router>,
    storage: Arc<dyn SessionStorage>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ServiceHandler {
    /// Handler serving `router` with sessions from `storage`.
    pub fn new(router: Arc<Router>, storage: Arc<dyn SessionStorage>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { router, storage, dispatcher }
    }

    async fn session(&self, pkt: &LogicPkt) -> Result<Session, ServiceError> {
        if pkt.command() == LOGIN_SIGN_IN {
            return Ok(Session {
                channel_id: pkt.header.channel_id.clone(),
                gate_id: pkt.get_string_meta(META_DEST_SERVER).unwrap_or_default(),
                tags: vec![TAG_AUTH_GENERATED.to_owned()],
                ..Session::default()
            });
        }
        match self.storage.get(&pkt.header.channel_id).await {
            Ok(session) => Ok(session),
            Err(StorageError::NotFound) => Err(ServiceError::SessionNotFound(pkt.header.channel_id.clone())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Answer `pkt` with `status` straight over the gateway link it came from.
async fn respond_error(agent: &dyn Agent, pkt: &LogicPkt, status: Status) {
    let mut resp = LogicPkt::from_header(&pkt.header).with_status(status).with_flag(Flag::Response);
    resp.add_string_meta(META_DEST_SERVER, agent.id());
    resp.add_string_meta(META_DEST_CHANNELS, pkt.header.channel_id.clone());
    let sent = match marshal_logic(&resp) {
        Ok(payload) => agent.push(payload).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = sent {
        warn!(gateway = agent.id(), error = %e, "error response failed");
    }
}

#[async_trait]
impl Acceptor for ServiceHandler {
    async fn accept(&self, conn: &mut Conn, _login_wait: Duration) -> Result<Accepted, HandshakeError> {
        let frame = conn.read_frame().await?;
        let req = InnerHandshakeRequest::decode(&frame.into_payload())?;
        if req.service_id.is_empty() {
            return Err(HandshakeError::Rejected("empty service id".into()));
        }
        info!(peer = %req.service_id, "peer accepted");
        Ok(Accepted::new(req.service_id))
    }
}

#[async_trait]
impl MessageListener for ServiceHandler {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let pkt = match read_logic_pkt(&payload) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!(gateway = agent.id(), error = %e, "invalid packet");
                return;
            },
        };

        let session = match self.session(&pkt).await {
            Ok(session) => session,
            Err(e) => {
                debug!(channel_id = %pkt.header.channel_id, error = %e, "no session");
                return respond_error(agent.as_ref(), &pkt, e.status()).await;
            },
        };

        debug!(channel_id = %session.channel_id, account = %session.account, %pkt, "serve");
        self.router.serve(pkt, session, Arc::clone(&self.dispatcher), Arc::clone(&self.storage)).await;
    }
}

#[async_trait]
impl StateListener for ServiceHandler {
    async fn disconnect(&self, id: &str) {
        warn!(gateway = id, "gateway link closed");
    }
}

impl std::fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandler").field("router", &self.router).finish_non_exhaustive()
    }
}
