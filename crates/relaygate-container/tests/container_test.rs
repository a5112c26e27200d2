//! Container lifecycle, forwarding and push fan-out over loopback.

use std::{sync::Arc, time::Duration};

use relaygate_container::{
    Container, ContainerConfig, ContainerError, ContainerState, KEY_SERVICE_STATE, STATE_ADULT, STATE_YOUNG,
};
use relaygate_core::{
    Conn, DefaultServer, MemoryNaming, Naming, Server, ServerConfig, ServiceRegistration,
};
use relaygate_harness::{PeerAcceptor, RecordingListener, StaticAcceptor, free_addr, spawn_server, wait_until};
use relaygate_proto::{
    LogicPkt, OpCode,
    basic::{marshal_logic, read_logic_pkt},
    commands::{CHAT_USER_TALK, META_DEST_CHANNELS, META_DEST_SERVER},
};
use relaygate_transport::{ServiceDialer, TcpUpgrader, tcp};

const WAIT: Duration = Duration::from_secs(3);

fn gateway_service(port: u16) -> ServiceRegistration {
    ServiceRegistration::new("gate01", "tgateway", "tcp", "127.0.0.1", port)
}

async fn login(addr: &str, id: &str) -> Conn {
    let mut conn = tcp::connect(addr, WAIT).await.unwrap();
    conn.write_frame(OpCode::Binary, id.as_bytes()).await.unwrap();
    conn.flush().await.unwrap();
    conn
}

fn talk(channel_id: &str) -> LogicPkt {
    LogicPkt::new(CHAT_USER_TALK).with_channel(channel_id)
}

#[tokio::test]
async fn lifecycle_transitions_are_checked() {
    let container = Arc::new(Container::default());
    assert_eq!(container.state(), ContainerState::Uninitialized);
    assert!(matches!(
        container.shutdown().await,
        Err(ContainerError::State { state: ContainerState::Uninitialized, .. })
    ));

    let (server, _) =
        spawn_server(gateway_service(0), ServerConfig::default(), Arc::new(StaticAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();
    container.init(server.clone() as Arc<dyn Server>, ["chat"]).unwrap();
    assert_eq!(container.state(), ContainerState::Initialized);
    assert!(matches!(
        container.init(server as Arc<dyn Server>, ["chat"]),
        Err(ContainerError::State { state: ContainerState::Initialized, .. })
    ));

    assert!(matches!(container.launch().await, Err(ContainerError::NamingRequired)));
    assert_eq!(container.state(), ContainerState::Initialized);
}

#[tokio::test]
async fn forward_rejects_incomplete_packets_and_unknown_services() {
    let container = Container::default();
    assert!(matches!(
        container.forward("chat", LogicPkt::new("").with_channel("c1")).await,
        Err(ContainerError::InvalidPacket(_))
    ));
    assert!(matches!(
        container.forward("chat", LogicPkt::new(CHAT_USER_TALK)).await,
        Err(ContainerError::InvalidPacket(_))
    ));
    assert!(matches!(
        container.forward("chat", talk("c1")).await,
        Err(ContainerError::ServiceNotFound(name)) if name == "chat"
    ));
}

#[tokio::test]
async fn push_message_fans_out_to_listed_channels() {
    let (server, addr) =
        spawn_server(gateway_service(0), ServerConfig::default(), Arc::new(StaticAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();
    let addr = addr.to_string();
    let mut c1 = login(&addr, "c1").await;
    let mut c2 = login(&addr, "c2").await;
    assert!(wait_until(WAIT, || server.channels().len() == 2).await);

    let container = Container::default();
    container.init(server as Arc<dyn Server>, Vec::<String>::new()).unwrap();

    let mut pkt = talk("sender");
    pkt.add_string_meta(META_DEST_SERVER, "gate01");
    pkt.add_string_meta(META_DEST_CHANNELS, "c1,missing,c2");
    container.push_message(pkt).await.unwrap();

    for conn in [&mut c1, &mut c2] {
        let frame = conn.read_frame().await.unwrap();
        let got = read_logic_pkt(&frame.into_payload()).unwrap();
        assert_eq!(got.command(), CHAT_USER_TALK);
        assert!(got.get_meta(META_DEST_SERVER).is_none());
        assert!(got.get_meta(META_DEST_CHANNELS).is_none());
    }
}

#[tokio::test]
async fn push_message_checks_routing_meta() {
    let (server, _) =
        spawn_server(gateway_service(0), ServerConfig::default(), Arc::new(StaticAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();
    let container = Container::default();
    container.init(server as Arc<dyn Server>, Vec::<String>::new()).unwrap();

    let mut wrong = talk("c1");
    wrong.add_string_meta(META_DEST_SERVER, "gate02");
    wrong.add_string_meta(META_DEST_CHANNELS, "c1");
    assert!(matches!(
        container.push_message(wrong).await,
        Err(ContainerError::DestServerMismatch { actual: Some(actual), .. }) if actual == "gate02"
    ));

    let mut no_channels = talk("c1");
    no_channels.add_string_meta(META_DEST_SERVER, "gate01");
    assert!(matches!(container.push_message(no_channels).await, Err(ContainerError::MissingDestChannels)));
}

struct Deployment {
    naming: Arc<MemoryNaming>,
    container: Arc<Container>,
    chat: Arc<DefaultServer<TcpUpgrader>>,
    chat_listener: Arc<RecordingListener>,
    gateway_addr: String,
}

async fn deploy(warmup: Duration) -> Deployment {
    let naming = Arc::new(MemoryNaming::new());

    let chat_listener = RecordingListener::new();
    let (chat, chat_addr) =
        spawn_server(ServiceRegistration::default(), ServerConfig::default(), Arc::new(PeerAcceptor), chat_listener.clone(), None)
            .await
            .unwrap();
    let chat_reg = ServiceRegistration::new("chat01", "chat", "tcp", "127.0.0.1", chat_addr.port());
    naming.register(&chat_reg).await.unwrap();

    let gateway_addr = free_addr().await.unwrap();
    let mut gateway =
        DefaultServer::new(gateway_addr.to_string(), gateway_service(gateway_addr.port()), TcpUpgrader, ServerConfig::default());
    gateway.set_acceptor(Arc::new(StaticAcceptor));
    gateway.set_message_listener(RecordingListener::new());

    let container = Arc::new(Container::new(ContainerConfig { warmup, ..ContainerConfig::default() }));
    container.set_naming(naming.clone());
    container.set_dialer(Arc::new(ServiceDialer::new("gate01")));
    container.init(Arc::new(gateway), ["chat"]).unwrap();
    container.launch().await.unwrap();

    Deployment { naming, container, chat, chat_listener, gateway_addr: gateway_addr.to_string() }
}

#[tokio::test]
async fn young_instances_are_not_routed() {
    let d = deploy(Duration::from_secs(60)).await;
    let clients = d.container.clients("chat").unwrap();
    assert!(wait_until(WAIT, || clients.len() == 1).await);
    assert_eq!(clients.get("chat01").unwrap().meta_value(KEY_SERVICE_STATE).as_deref(), Some(STATE_YOUNG));

    assert!(matches!(
        d.container.forward("chat", talk("c1")).await,
        Err(ContainerError::NoServiceFound(name)) if name == "chat"
    ));
    d.container.shutdown().await.unwrap();
}

#[tokio::test]
async fn forward_and_push_back_round_trip() {
    let d = deploy(Duration::from_millis(20)).await;
    let clients = d.container.clients("chat").unwrap();
    assert!(
        wait_until(WAIT, || {
            clients.get("chat01").and_then(|c| c.meta_value(KEY_SERVICE_STATE)).as_deref() == Some(STATE_ADULT)
        })
        .await
    );
    assert!(wait_until(WAIT, || d.chat.channels().contains("gate01")).await);

    let mut user = login(&d.gateway_addr, "c1").await;
    d.container.forward("chat", talk("c1")).await.unwrap();

    assert!(wait_until(WAIT, || d.chat_listener.count() == 1).await);
    let (from, payload) = d.chat_listener.received().remove(0);
    assert_eq!(from, "gate01");
    let forwarded = read_logic_pkt(&payload).unwrap();
    assert_eq!(forwarded.get_string_meta(META_DEST_SERVER).as_deref(), Some("gate01"));
    assert_eq!(forwarded.channel_id(), "c1");

    let mut reply = LogicPkt::from_header(&forwarded.header);
    reply.add_string_meta(META_DEST_SERVER, "gate01");
    reply.add_string_meta(META_DEST_CHANNELS, "c1");
    d.chat.push("gate01", marshal_logic(&reply).unwrap()).await.unwrap();

    let frame = user.read_frame().await.unwrap();
    let got = read_logic_pkt(&frame.into_payload()).unwrap();
    assert_eq!(got.command(), CHAT_USER_TALK);
    assert!(got.get_meta(META_DEST_CHANNELS).is_none());

    d.container.shutdown().await.unwrap();
    assert_eq!(d.container.state(), ContainerState::Closed);
    assert!(d.container.shutdown().await.is_err());
    assert!(d.naming.find("tgateway", &[]).await.unwrap().is_empty());
    assert!(!d.naming.is_watched("chat"));
}

#[tokio::test]
async fn new_instances_are_discovered_after_start() {
    let d = deploy(Duration::from_secs(60)).await;
    let clients = d.container.clients("chat").unwrap();
    assert!(wait_until(WAIT, || clients.len() == 1).await);
    assert!(d.naming.find("tgateway", &[]).await.unwrap().iter().any(|s| s.id == "gate01"));

    let (_chat2, addr2) =
        spawn_server(ServiceRegistration::default(), ServerConfig::default(), Arc::new(PeerAcceptor), RecordingListener::new(), None)
            .await
            .unwrap();
    d.naming
        .register(&ServiceRegistration::new("chat02", "chat", "tcp", "127.0.0.1", addr2.port()))
        .await
        .unwrap();

    assert!(wait_until(WAIT, || clients.contains("chat02")).await);
    assert_eq!(clients.len(), 2);
    d.container.shutdown().await.unwrap();
}

#[tokio::test]
async fn link_dropped_by_peer_is_unregistered() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let naming = Arc::new(MemoryNaming::new());
    naming.register(&ServiceRegistration::new("chat09", "chat", "tcp", "127.0.0.1", port)).await.unwrap();

    let gateway_addr = free_addr().await.unwrap();
    let mut gateway =
        DefaultServer::new(gateway_addr.to_string(), gateway_service(gateway_addr.port()), TcpUpgrader, ServerConfig::default());
    gateway.set_acceptor(Arc::new(StaticAcceptor));
    gateway.set_message_listener(RecordingListener::new());

    let container = Arc::new(Container::default());
    container.set_naming(naming.clone());
    container.set_dialer(Arc::new(ServiceDialer::new("gate01")));
    container.init(Arc::new(gateway), ["chat"]).unwrap();
    container.launch().await.unwrap();

    let clients = container.clients("chat").unwrap();
    assert!(wait_until(WAIT, || clients.is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!clients.contains("chat09"));
    container.shutdown().await.unwrap();
}
