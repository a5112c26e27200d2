//! Wiring for the two deployable roles.
//!
//! Both builders return an initialized [`Container`]; the caller supplies the
//! registry, then runs it with [`Container::start`] or
//! [`Container::launch`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use relaygate_container::{Container, ContainerConfig, RouteSelector};
use relaygate_core::{
    Acceptor, DefaultServer, MessageListener, Naming, Server, ServerConfig, ServiceRegistration, SessionStorage,
    StateListener, Upgrader,
};
use relaygate_proto::commands::{
    CHAT_GROUP_TALK, CHAT_TALK_ACK, CHAT_USER_TALK, GROUP_CREATE, GROUP_DETAIL, GROUP_JOIN, GROUP_MEMBERS,
    GROUP_QUIT, LOGIN_SIGN_IN, LOGIN_SIGN_OUT, OFFLINE_CONTENT, OFFLINE_INDEX, Protocol, SN_CHAT, SN_LOGIN,
    SN_TGATEWAY,
};
use relaygate_transport::{ServiceDialer, TcpUpgrader, WsUpgrader};
use tracing::info;

use crate::{
    error::ServiceError,
    gateway::GatewayHandler,
    handler::{ChatHandler, GroupHandler, LoginHandler, OfflineHandler},
    message::MessageService,
    router::Router,
    service::{ServerDispatcher, ServiceHandler},
    token,
};

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Unique service id
    pub service_id: String,
    /// Registered service name
    pub service_name: String,
    /// Listen address
    pub listen: String,
    /// Address announced to the registry
    pub public_address: String,
    /// Port announced to the registry
    pub public_port: u16,
    /// Client transport, tcp or websocket
    pub protocol: Protocol,
    /// Token signing secret
    pub app_secret: String,
    /// Channel idle window
    pub read_wait: Duration,
    /// Optional zone route table
    pub route: Option<PathBuf>,
    /// Registry tags
    pub tags: Vec<String>,
    /// Container settings
    pub container: ContainerConfig,
    /// Server settings
    pub server: ServerConfig,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            service_id: "gateway01".into(),
            service_name: SN_TGATEWAY.into(),
            listen: "0.0.0.0:8000".into(),
            public_address: "127.0.0.1".into(),
            public_port: 8000,
            protocol: Protocol::Tcp,
            app_secret: token::DEFAULT_SECRET.into(),
            read_wait: Duration::from_secs(120),
            route: None,
            tags: Vec::new(),
            container: ContainerConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Chat service settings.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Unique service id
    pub service_id: String,
    /// Registered service name
    pub service_name: String,
    /// Listen address
    pub listen: String,
    /// Address announced to the registry
    pub public_address: String,
    /// Port announced to the registry
    pub public_port: u16,
    /// Registry tags
    pub tags: Vec<String>,
    /// Container settings
    pub container: ContainerConfig,
    /// Server settings
    pub server: ServerConfig,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            service_id: "chat01".into(),
            service_name: SN_CHAT.into(),
            listen: "0.0.0.0:8100".into(),
            public_address: "127.0.0.1".into(),
            public_port: 8100,
            tags: Vec::new(),
            container: ContainerConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn server<U, H>(
    listen: &str,
    service: ServiceRegistration,
    upgrader: U,
    config: ServerConfig,
    read_wait: Option<Duration>,
    handler: &Arc<H>,
) -> Arc<dyn Server>
where
    U: Upgrader,
    H: Acceptor + MessageListener + StateListener,
{
    let mut srv = DefaultServer::new(listen, service, upgrader, config);
    if let Some(wait) = read_wait {
        srv.set_read_wait(wait);
    }
    srv.set_acceptor(Arc::clone(handler) as Arc<dyn Acceptor>);
    srv.set_message_listener(Arc::clone(handler) as Arc<dyn MessageListener>);
    srv.set_state_listener(Arc::clone(handler) as Arc<dyn StateListener>);
    Arc::new(srv)
}

/// Build a gateway container depending on the login and chat services.
///
/// Must be called inside a tokio runtime.
pub fn build_gateway(opts: GatewayOptions, naming: Arc<dyn Naming>) -> Result<Arc<Container>, ServiceError> {
    let mut service = ServiceRegistration::new(
        &opts.service_id,
        &opts.service_name,
        opts.protocol.as_str(),
        &opts.public_address,
        opts.public_port,
    );
    service.tags.clone_from(&opts.tags);

    let container = Arc::new(Container::new(opts.container.clone()));
    let handler = Arc::new(GatewayHandler::new(&opts.service_id, &opts.app_secret, Arc::downgrade(&container)));
    let srv = match opts.protocol {
        Protocol::Tcp => server(&opts.listen, service, TcpUpgrader, opts.server.clone(), Some(opts.read_wait), &handler),
        Protocol::WebSocket => {
            server(&opts.listen, service, WsUpgrader, opts.server.clone(), Some(opts.read_wait), &handler)
        },
        Protocol::Udp => return Err(ServiceError::Config("udp gateways are not supported".into())),
    };

    container.init(srv, [SN_CHAT, SN_LOGIN])?;
    container.set_naming(naming);
    container.set_dialer(Arc::new(ServiceDialer::new(&opts.service_id)));
    if let Some(path) = &opts.route {
        let selector = RouteSelector::from_file(path)?;
        info!(path = %path.display(), "zone routing enabled");
        container.set_selector(Arc::new(selector));
    }
    Ok(container)
}

/// Build a chat container serving login and chat commands.
///
/// Must be called inside a tokio runtime.
pub fn build_chat(
    opts: ChatOptions,
    naming: Arc<dyn Naming>,
    storage: Arc<dyn SessionStorage>,
    messages: Arc<dyn MessageService>,
) -> Result<Arc<Container>, ServiceError> {
    let mut service = ServiceRegistration::new(
        &opts.service_id,
        &opts.service_name,
        Protocol::Tcp.as_str(),
        &opts.public_address,
        opts.public_port,
    );
    service.tags.clone_from(&opts.tags);

    let mut router = Router::new();
    let login = Arc::new(LoginHandler);
    router.handle(LOGIN_SIGN_IN, login.clone());
    router.handle(LOGIN_SIGN_OUT, login);
    let chat = Arc::new(ChatHandler::new(Arc::clone(&messages)));
    router.handle(CHAT_USER_TALK, chat.clone());
    router.handle(CHAT_GROUP_TALK, chat.clone());
    router.handle(CHAT_TALK_ACK, chat);
    let group = Arc::new(GroupHandler::new(Arc::clone(&messages)));
    for command in [GROUP_CREATE, GROUP_JOIN, GROUP_QUIT, GROUP_MEMBERS, GROUP_DETAIL] {
        router.handle(command, group.clone());
    }
    let offline = Arc::new(OfflineHandler::new(messages));
    router.handle(OFFLINE_INDEX, offline.clone());
    router.handle(OFFLINE_CONTENT, offline);

    let container = Arc::new(Container::new(opts.container.clone()));
    let dispatcher = Arc::new(ServerDispatcher::new(Arc::downgrade(&container)));
    let handler = Arc::new(ServiceHandler::new(Arc::new(router), storage, dispatcher));
    let srv = server(&opts.listen, service, TcpUpgrader, opts.server.clone(), None, &handler);

    container.init(srv, Vec::<String>::new())?;
    container.set_naming(naming);
    Ok(container)
}

/// Parse a `id=name@host:port` peer into a tcp registration.
pub fn parse_peer(spec: &str) -> Result<ServiceRegistration, ServiceError> {
    let invalid = || ServiceError::Config(format!("peer {spec:?} is not id=name@host:port"));
    let (id, rest) = spec.split_once('=').ok_or_else(invalid)?;
    let (name, addr) = rest.split_once('@').ok_or_else(invalid)?;
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if id.is_empty() || name.is_empty() || host.is_empty() {
        return Err(invalid());
    }
    Ok(ServiceRegistration::new(id, name, Protocol::Tcp.as_str(), host, port))
}
