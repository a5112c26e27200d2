//! Accept loop and channel lifecycle over loopback TCP.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_core::{
    Agent, ChannelConfig, Conn, MessageListener, Server, ServerConfig, ServerError, ServiceRegistration,
    StateListener,
};
use tokio::sync::oneshot;
use relaygate_harness::{RecordingListener, RecordingStateListener, StaticAcceptor, spawn_server, wait_until};
use relaygate_proto::OpCode;
use relaygate_transport::tcp;

const WAIT: Duration = Duration::from_secs(2);

fn service() -> ServiceRegistration {
    ServiceRegistration::new("gate01", "tgateway", "tcp", "127.0.0.1", 0)
}

async fn login(addr: &str, id: &str) -> Conn {
    let mut conn = tcp::connect(addr, WAIT).await.unwrap();
    conn.write_frame(OpCode::Binary, id.as_bytes()).await.unwrap();
    conn.flush().await.unwrap();
    conn
}

#[tokio::test]
async fn accepted_channel_echoes() {
    let listener = RecordingListener::echo();
    let (server, addr) = spawn_server(service(), ServerConfig::default(), Arc::new(StaticAcceptor), listener.clone(), None)
        .await
        .unwrap();
    let addr = addr.to_string();

    let mut conn = login(&addr, "alice").await;
    conn.write_frame(OpCode::Binary, b"hello").await.unwrap();
    conn.flush().await.unwrap();

    let frame = conn.read_frame().await.unwrap();
    assert_eq!(frame.opcode(), OpCode::Binary);
    assert_eq!(frame.into_payload(), Bytes::from_static(b"hello"));
    assert!(server.channels().contains("alice"));
    assert_eq!(listener.received()[0].0, "alice");

    server.push("alice", Bytes::from_static(b"pushed")).await.unwrap();
    assert_eq!(conn.read_frame().await.unwrap().into_payload(), Bytes::from_static(b"pushed"));
}

#[tokio::test]
async fn duplicate_channel_id_is_rejected() {
    let (server, addr) =
        spawn_server(service(), ServerConfig::default(), Arc::new(StaticAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();
    let addr = addr.to_string();

    let _first = login(&addr, "bob").await;
    assert!(wait_until(WAIT, || server.channels().contains("bob")).await);

    let mut second = login(&addr, "bob").await;
    let frame = second.read_frame().await.unwrap();
    assert_eq!(frame.opcode(), OpCode::Close);
    let reason = String::from_utf8(frame.into_payload().to_vec()).unwrap();
    assert!(reason.contains("exists"), "{reason}");
    assert_eq!(server.channels().len(), 1);
}

#[tokio::test]
async fn empty_id_is_rejected_with_reason() {
    let (_server, addr) =
        spawn_server(service(), ServerConfig::default(), Arc::new(StaticAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();

    let mut conn = login(&addr.to_string(), "").await;
    let frame = conn.read_frame().await.unwrap();
    assert_eq!(frame.opcode(), OpCode::Close);
    assert_eq!(frame.into_payload(), Bytes::from_static(b"empty channel id"));
}

#[tokio::test]
async fn silent_client_hits_login_window() {
    let config = ServerConfig { login_wait: Duration::from_millis(100), ..ServerConfig::default() };
    let (_server, addr) = spawn_server(service(), config, Arc::new(StaticAcceptor), RecordingListener::new(), None)
        .await
        .unwrap();

    let mut conn = tcp::connect(&addr.to_string(), WAIT).await.unwrap();
    let frame = conn.read_frame().await.unwrap();
    assert_eq!(frame.opcode(), OpCode::Close);
    assert_eq!(frame.into_payload(), Bytes::from_static(b"handshake timeout"));
}

#[tokio::test]
async fn idle_channel_is_removed_once() {
    let config = ServerConfig {
        channel: ChannelConfig { read_wait: Duration::from_millis(100), ..ChannelConfig::default() },
        ..ServerConfig::default()
    };
    let state = RecordingStateListener::new();
    let (server, addr) = spawn_server(
        service(),
        config,
        Arc::new(StaticAcceptor),
        RecordingListener::new(),
        Some(state.clone() as Arc<dyn StateListener>),
    )
    .await
    .unwrap();

    let _conn = login(&addr.to_string(), "carol").await;
    assert!(wait_until(WAIT, || server.channels().contains("carol")).await);
    assert!(wait_until(WAIT, || !state.disconnected().is_empty()).await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.disconnected(), ["carol"]);
    assert!(server.channels().is_empty());
    assert!(matches!(
        server.push("carol", Bytes::from_static(b"x")).await,
        Err(ServerError::ChannelNotFound(id)) if id == "carol"
    ));
}

#[tokio::test]
async fn shutdown_closes_every_channel() {
    let (server, addr) =
        spawn_server(service(), ServerConfig::default(), Arc::new(StaticAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();
    let addr = addr.to_string();

    let mut a = login(&addr, "a").await;
    let mut b = login(&addr, "b").await;
    assert!(wait_until(WAIT, || server.channels().len() == 2).await);

    server.shutdown(WAIT).await.unwrap();
    assert!(server.channels().is_empty());
    assert!(a.read_frame().await.is_err());
    assert!(b.read_frame().await.is_err());
}

/// Never finishes handling a message; drops `held` only when cancelled.
struct StuckListener {
    held: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl MessageListener for StuckListener {
    async fn receive(&self, _agent: Arc<dyn Agent>, _payload: Bytes) {
        let held = self.held.lock().unwrap().take();
        let _held = held;
        std::future::pending::<()>().await;
    }
}

#[tokio::test]
async fn shutdown_timeout_aborts_dispatch() {
    let (held_tx, held_rx) = oneshot::channel();
    let listener = Arc::new(StuckListener { held: Mutex::new(Some(held_tx)) });
    let (server, addr) = spawn_server(service(), ServerConfig::default(), Arc::new(StaticAcceptor), listener.clone(), None)
        .await
        .unwrap();

    let mut conn = login(&addr.to_string(), "stuck").await;
    conn.write_frame(OpCode::Binary, b"hang").await.unwrap();
    conn.flush().await.unwrap();
    assert!(wait_until(WAIT, || listener.held.lock().unwrap().is_none()).await);

    assert!(matches!(server.shutdown(Duration::from_millis(100)).await, Err(ServerError::ShutdownTimeout)));
    assert!(tokio::time::timeout(WAIT, held_rx).await.unwrap().is_err());
}
