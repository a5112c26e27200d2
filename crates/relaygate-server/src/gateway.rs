//! Client-facing gateway.
//!
//! # Flow
//!
//! ```text
//! client ──login.signin──> GatewayHandler::accept ──forward──> login service
//!    │                          │
//!    │                    channel id = {gateway}_{account}_{seq}
//!    │
//!    └──chat.*────────> GatewayHandler::receive ──forward──> chat service
//! ```
//!
//! The handshake authenticates the token, mints the channel id and forwards
//! the sign-in with a [`Session`] body so the login service can record where
//! the account lives. After that every logic packet is stamped with the
//! channel id and the account metadata and forwarded by its service name.
//! Any `app` or `account` metadata the client sent is dropped first.
//!
//! Inbound logic packets are counted in `relaygate_message_in_total` and
//! `relaygate_message_in_bytes`, labelled by gateway id and command.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_container::Container;
use metrics::counter;
use relaygate_core::{
    Accepted, Acceptor, Agent, ChannelMeta, Conn, HandshakeError, MessageListener, StateListener,
};
use relaygate_proto::{
    BasicPkt, Flag, LogicPkt, OpCode, Packet, Status,
    basic::{CODE_PING, marshal_basic, marshal_logic, read_logic_pkt},
    commands::{LOGIN_SIGN_IN, LOGIN_SIGN_OUT, META_ACCOUNT, META_APP, SN_LOGIN},
    messages::{LoginRequest, Session},
    sequence::next_sequence,
};
use tracing::{debug, info, warn};

use crate::{error::ServiceError, token};

/// Acceptor and listeners of a gateway server.
pub struct GatewayHandler {
    service_id: String,
    app_secret: String,
    container: Weak<Container>,
}

impl GatewayHandler {
    /// Handler for gateway `service_id` that verifies tokens with
    /// `app_secret` and routes through `container`.
    pub fn new(service_id: impl Into<String>, app_secret: impl Into<String>, container: Weak<Container>) -> Self {
        Self { service_id: service_id.into(), app_secret: app_secret.into(), container }
    }

    fn container(&self) -> Result<Arc<Container>, ServiceError> {
        self.container.upgrade().ok_or(ServiceError::ContainerGone)
    }

    async fn forward(&self, service: &str, pkt: LogicPkt) -> Result<(), ServiceError> {
        self.container()?.forward(service, pkt).await?;
        Ok(())
    }

    fn channel_id(&self, account: &str) -> String {
        format!("{}_{}_{}", self.service_id, account, next_sequence())
    }
}

/// Overwrite the identity of an inbound packet with what the handshake
/// established.
fn stamp_identity(pkt: &mut LogicPkt, channel_id: &str, meta: &ChannelMeta) {
    channel_id.clone_into(&mut pkt.header.channel_id);
    for key in [META_APP, META_ACCOUNT] {
        pkt.del_meta(key);
        if let Some(value) = meta.get(key) {
            pkt.add_string_meta(key, value.clone());
        }
    }
}

async fn refuse(conn: &mut Conn, req: &LogicPkt, status: Status) {
    let resp = LogicPkt::from_header(&req.header).with_status(status).with_flag(Flag::Response);
    let sent = match marshal_logic(&resp) {
        Ok(payload) => match conn.write_frame(OpCode::Binary, &payload).await {
            Ok(()) => conn.flush().await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        warn!(error = %e, ?status, "handshake response failed");
    }
}

#[async_trait]
impl Acceptor for GatewayHandler {
    async fn accept(&self, conn: &mut Conn, _login_wait: Duration) -> Result<Accepted, HandshakeError> {
        let frame = conn.read_frame().await?;
        let mut req = read_logic_pkt(&frame.into_payload())?;

        if req.command() != LOGIN_SIGN_IN {
            refuse(conn, &req, Status::InvalidCommand).await;
            return Err(HandshakeError::Rejected(format!("expected {LOGIN_SIGN_IN}, got {}", req.command())));
        }

        let login: LoginRequest = req.read_body()?;
        let tk = match token::parse(&self.app_secret, &login.token) {
            Ok(tk) => tk,
            Err(e) => {
                refuse(conn, &req, Status::Unauthorized).await;
                return Err(HandshakeError::Rejected(e.to_string()));
            },
        };

        let channel_id = self.channel_id(&tk.account);
        let session = Session {
            channel_id: channel_id.clone(),
            gate_id: self.service_id.clone(),
            account: tk.account.clone(),
            app: tk.app.clone(),
            remote_ip: conn.remote_addr().map(|a| a.ip().to_string()).unwrap_or_default(),
            tags: login.tags,
            device: String::new(),
        };
        req.header.channel_id.clone_from(&channel_id);
        req.write_body(&session)?;

        self.forward(SN_LOGIN, req).await.map_err(|e| HandshakeError::Rejected(e.to_string()))?;
        info!(%channel_id, account = %tk.account, app = %tk.app, "login forwarded");

        let mut accepted = Accepted::new(channel_id);
        accepted.meta.insert(META_APP.to_owned(), tk.app);
        accepted.meta.insert(META_ACCOUNT.to_owned(), tk.account);
        Ok(accepted)
    }
}

#[async_trait]
impl MessageListener for GatewayHandler {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let packet = match Packet::read(&payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(channel_id = agent.id(), error = %e, "invalid packet");
                return;
            },
        };

        match packet {
            Packet::Basic(basic) => {
                if basic.code != CODE_PING {
                    return;
                }
                match marshal_basic(&BasicPkt::pong()) {
                    Ok(pong) => {
                        if let Err(e) = agent.push(pong).await {
                            debug!(channel_id = agent.id(), error = %e, "pong failed");
                        }
                    },
                    Err(e) => warn!(error = %e, "encode pong"),
                }
            },
            Packet::Logic(mut pkt) => {
                stamp_identity(&mut pkt, agent.id(), agent.meta());
                let service = pkt.service_name().to_owned();
                let command = pkt.header.command.clone();
                let dest = pkt.header.dest.clone();
                counter!("relaygate_message_in_total", "service_id" => self.service_id.clone(), "command" => command.clone())
                    .increment(1);
                counter!("relaygate_message_in_bytes", "service_id" => self.service_id.clone(), "command" => command.clone())
                    .increment(payload.len() as u64);
                if let Err(e) = self.forward(&service, pkt).await {
                    warn!(channel_id = agent.id(), %command, %dest, error = %e, "forward failed");
                }
            },
        }
    }
}

#[async_trait]
impl StateListener for GatewayHandler {
    async fn disconnect(&self, id: &str) {
        info!(channel_id = id, "disconnect");
        let logout = LogicPkt::new(LOGIN_SIGN_OUT).with_channel(id);
        if let Err(e) = self.forward(SN_LOGIN, logout).await {
            warn!(channel_id = id, error = %e, "sign out forward failed");
        }
    }
}

impl std::fmt::Debug for GatewayHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandler").field("service_id", &self.service_id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use relaygate_core::ChannelError;
    use relaygate_proto::packet::find_meta;

    use super::*;

    struct StubAgent {
        meta: ChannelMeta,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn id(&self) -> &str {
            "gw01_alice_1"
        }

        async fn push(&self, _payload: Bytes) -> Result<(), ChannelError> {
            Ok(())
        }

        fn meta(&self) -> &ChannelMeta {
            &self.meta
        }
    }

    fn meta_values(pkt: &LogicPkt, key: &str) -> Vec<String> {
        pkt.header.meta.iter().filter(|m| m.key == key).map(|m| m.value.clone()).collect()
    }

    #[test]
    fn client_supplied_identity_is_replaced() {
        let meta = ChannelMeta::from([
            (META_APP.to_owned(), "demo".to_owned()),
            (META_ACCOUNT.to_owned(), "alice".to_owned()),
        ]);
        let mut pkt = LogicPkt::new("chat.user.talk").with_channel("forged");
        pkt.add_string_meta(META_ACCOUNT, "victim");
        pkt.add_string_meta("trace", "t1");
        pkt.add_string_meta(META_APP, "other");

        stamp_identity(&mut pkt, "gw01_alice_1", &meta);

        assert_eq!(pkt.header.channel_id, "gw01_alice_1");
        assert_eq!(meta_values(&pkt, META_ACCOUNT), ["alice"]);
        assert_eq!(meta_values(&pkt, META_APP), ["demo"]);
        assert_eq!(meta_values(&pkt, "trace"), ["t1"]);
        assert_eq!(find_meta(&pkt.header.meta, META_ACCOUNT).and_then(|v| v.into_string()).as_deref(), Some("alice"));
    }

    #[test]
    fn identity_without_handshake_meta_is_stripped() {
        let mut pkt = LogicPkt::new("chat.user.talk");
        pkt.add_string_meta(META_ACCOUNT, "victim");

        stamp_identity(&mut pkt, "gw01_anon_2", &ChannelMeta::new());

        assert!(meta_values(&pkt, META_ACCOUNT).is_empty());
        assert!(meta_values(&pkt, META_APP).is_empty());
    }

    #[test]
    fn inbound_logic_packets_are_counted() {
        let handler = GatewayHandler::new("gw01", "secret", Weak::new());
        let agent: Arc<dyn Agent> = Arc::new(StubAgent { meta: ChannelMeta::new() });
        let talk = marshal_logic(&LogicPkt::new("chat.user.talk")).unwrap();
        let ping = marshal_basic(&BasicPkt::ping()).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                handler.receive(Arc::clone(&agent), talk.clone()).await;
                handler.receive(Arc::clone(&agent), talk.clone()).await;
                handler.receive(Arc::clone(&agent), ping).await;
            });
        });

        let counters: HashMap<String, u64> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| {
                let labels: Vec<_> = key.key().labels().map(|l| (l.key().to_owned(), l.value().to_owned())).collect();
                assert!(labels.contains(&("service_id".to_owned(), "gw01".to_owned())));
                assert!(labels.contains(&("command".to_owned(), "chat.user.talk".to_owned())));
                match value {
                    DebugValue::Counter(n) => Some((key.key().name().to_owned(), n)),
                    _ => None,
                }
            })
            .collect();
        assert_eq!(counters.get("relaygate_message_in_total"), Some(&2));
        assert_eq!(counters.get("relaygate_message_in_bytes"), Some(&(2 * talk.len() as u64)));
    }
}
