//! The container: one local server plus links to its dependencies.
//!
//! # Lifecycle
//!
//! ```text
//! ┌───────────────┐ init ┌─────────────┐ start ┌─────────┐ shutdown ┌────────┐
//! │ Uninitialized │─────>│ Initialized │──────>│ Started │─────────>│ Closed │
//! └───────────────┘      └─────────────┘       └─────────┘          └────────┘
//! ```
//!
//! Transitions are compare-and-swap; attempting one from the wrong state
//! fails with [`ContainerError::State`] and changes nothing.
//!
//! # Dependency links
//!
//! For each dependency the container subscribes to the registry. Every new
//! tcp instance gets a [`Client`] link tagged `young`; after the warm-up delay
//! it is promoted to `adult` and becomes eligible for [`Container::forward`].
//! A dedicated read loop per link turns packets pushed back by the instance
//! into local channel pushes. The link is registered before its loop starts;
//! when the loop ends that link (and only that link) is dropped, and a later
//! registry notification reconnects it. Dials to different instances run
//! concurrently, while a second dial to an instance already being dialed is
//! skipped.

use std::{
    future::Future,
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, DashSet};
use relaygate_core::{Client, ClientConfig, Dialer, Naming, Server, ServiceRegistration};
use relaygate_proto::{
    Header, LogicPkt, OpCode,
    basic::{marshal_logic, read_logic_pkt},
    commands::{META_DEST_CHANNELS, META_DEST_SERVER, Protocol},
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    clients::ClientMap,
    error::ContainerError,
    selector::{HashSelector, Selector},
};

/// Registration metadata key holding an instance's warm-up state.
pub const KEY_SERVICE_STATE: &str = "service_state";
/// Instance is linked but still warming up.
pub const STATE_YOUNG: &str = "young";
/// Instance is eligible for routing.
pub const STATE_ADULT: &str = "adult";

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContainerState {
    /// Constructed, no server yet
    Uninitialized = 0,
    /// Server and dependencies recorded
    Initialized = 1,
    /// Serving
    Started = 2,
    /// Shut down
    Closed = 3,
}

impl ContainerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Started,
            _ => Self::Closed,
        }
    }
}

/// Container settings.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Delay before a new instance is promoted to adult
    pub warmup: Duration,
    /// Deadline for the local server's shutdown
    pub shutdown_grace: Duration,
    /// Settings for dependency links
    pub client: ClientConfig,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
            client: ClientConfig::default(),
        }
    }
}

struct Parts {
    server: Option<Arc<dyn Server>>,
    deps: Vec<String>,
    naming: Option<Arc<dyn Naming>>,
    dialer: Option<Arc<dyn Dialer>>,
    selector: Arc<dyn Selector>,
}

/// Routing hub for one service instance.
pub struct Container {
    state: AtomicU8,
    parts: RwLock<Parts>,
    services: DashMap<String, Arc<ClientMap>>,
    connecting: DashSet<String>,
    config: ContainerConfig,
}

/// Marks an instance as being dialed until dropped.
struct Dialing<'a> {
    set: &'a DashSet<String>,
    id: String,
}

impl<'a> Dialing<'a> {
    fn begin(set: &'a DashSet<String>, id: &str) -> Option<Self> {
        set.insert(id.to_owned()).then(|| Self { set, id: id.to_owned() })
    }
}

impl Drop for Dialing<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new(ContainerConfig::default())
    }
}

impl Container {
    /// Uninitialized container using the hash selector.
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            state: AtomicU8::new(ContainerState::Uninitialized as u8),
            parts: RwLock::new(Parts {
                server: None,
                deps: Vec::new(),
                naming: None,
                dialer: None,
                selector: Arc::new(HashSelector),
            }),
            services: DashMap::new(),
            connecting: DashSet::new(),
            config,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        ContainerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ContainerState, to: ContainerState, operation: &'static str) -> Result<(), ContainerError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| ContainerError::State { state: ContainerState::from_u8(current), operation })
    }

    fn with_parts<T>(&self, f: impl FnOnce(&Parts) -> T) -> T {
        match self.parts.read() {
            Ok(parts) => f(&parts),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn update_parts<T>(&self, f: impl FnOnce(&mut Parts) -> T) -> T {
        match self.parts.write() {
            Ok(mut parts) => f(&mut parts),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Record the local server and the names of the services it depends on.
    pub fn init<I, S>(&self, server: Arc<dyn Server>, deps: I) -> Result<(), ContainerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deps: Vec<String> = deps.into_iter().map(Into::into).collect();
        deps.sort();
        deps.dedup();
        let (id, name) = (server.service().id.clone(), server.service().name.clone());
        self.update_parts(|p| {
            self.transition(ContainerState::Uninitialized, ContainerState::Initialized, "init")?;
            p.server = Some(server);
            p.deps.clone_from(&deps);
            Ok::<_, ContainerError>(())
        })?;
        info!(service = %id, %name, ?deps, "container initialized");
        Ok(())
    }

    /// Set the registry.
    pub fn set_naming(&self, naming: Arc<dyn Naming>) {
        self.update_parts(|p| p.naming = Some(naming));
    }

    /// Set the dialer used for dependency links.
    pub fn set_dialer(&self, dialer: Arc<dyn Dialer>) {
        self.update_parts(|p| p.dialer = Some(dialer));
    }

    /// Set the default selector for [`Container::forward`].
    pub fn set_selector(&self, selector: Arc<dyn Selector>) {
        self.update_parts(|p| p.selector = selector);
    }

    /// Local server.
    pub fn server(&self) -> Result<Arc<dyn Server>, ContainerError> {
        self.with_parts(|p| p.server.clone()).ok_or(ContainerError::NotInitialized)
    }

    /// Id of the local server.
    pub fn service_id(&self) -> Result<String, ContainerError> {
        Ok(self.server()?.service().id.clone())
    }

    /// Links to the instances of `service`, if it is a dependency that has
    /// been subscribed.
    pub fn clients(&self, service: &str) -> Option<Arc<ClientMap>> {
        self.services.get(service).map(|c| Arc::clone(c.value()))
    }

    /// Start serving and block until ctrl-c or SIGTERM, then shut down.
    pub async fn start(self: &Arc<Self>) -> Result<(), ContainerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Start serving, wait for `signal`, then shut down.
    pub async fn run_until(self: &Arc<Self>, signal: impl Future<Output = ()>) -> Result<(), ContainerError> {
        self.launch().await?;
        signal.await;
        info!("exit signal received");
        self.shutdown().await
    }

    /// Start the server, subscribe to dependencies and register the local
    /// service, without waiting for a signal.
    pub async fn launch(self: &Arc<Self>) -> Result<(), ContainerError> {
        let (server, deps, naming) = self.with_parts(|p| {
            let naming = p.naming.clone().ok_or(ContainerError::NamingRequired)?;
            let server = p.server.clone().ok_or(ContainerError::NotInitialized)?;
            self.transition(ContainerState::Initialized, ContainerState::Started, "start")?;
            Ok::<_, ContainerError>((server, p.deps.clone(), naming))
        })?;

        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = srv.start().await {
                warn!(error = %e, "server exited");
            }
        });

        for dep in deps {
            if let Err(e) = self.connect_to_service(&dep, Arc::clone(&naming)).await {
                warn!(service = %dep, error = %e, "connect to dependency failed");
            }
        }

        let local = server.service();
        if local.is_public() {
            if let Err(e) = naming.register(local).await {
                warn!(service = %local.id, error = %e, "register failed");
            }
        }
        Ok(())
    }

    /// Route `pkt` to one adult instance of `service` using the configured
    /// selector.
    pub async fn forward(&self, service: &str, pkt: LogicPkt) -> Result<(), ContainerError> {
        if pkt.header.command.is_empty() {
            return Err(ContainerError::InvalidPacket("command is empty"));
        }
        if pkt.header.channel_id.is_empty() {
            return Err(ContainerError::InvalidPacket("channel id is empty"));
        }
        let selector = self.with_parts(|p| Arc::clone(&p.selector));
        self.forward_with_selector(service, pkt, selector.as_ref()).await
    }

    /// Route `pkt` to the instance of `service` chosen by `selector`.
    ///
    /// The packet is stamped with `dest.server = <local id>` so the instance
    /// can push replies back here.
    pub async fn forward_with_selector(
        &self,
        service: &str,
        mut pkt: LogicPkt,
        selector: &dyn Selector,
    ) -> Result<(), ContainerError> {
        let client = self.lookup(service, &pkt.header, selector)?;
        let local = self.service_id()?;
        pkt.del_meta(META_DEST_SERVER);
        pkt.add_string_meta(META_DEST_SERVER, local);
        debug!(target_id = %client.id(), %pkt, "forward");
        client.send(&marshal_logic(&pkt)?).await?;
        Ok(())
    }

    /// Push `pkt` to the local channel of a connected peer service.
    pub async fn push(&self, server_id: &str, mut pkt: LogicPkt) -> Result<(), ContainerError> {
        pkt.add_string_meta(META_DEST_SERVER, server_id);
        let server = self.server()?;
        server.push(server_id, marshal_logic(&pkt)?).await?;
        Ok(())
    }

    fn lookup(&self, service: &str, header: &Header, selector: &dyn Selector) -> Result<Arc<Client>, ContainerError> {
        let clients = self.clients(service).ok_or_else(|| ContainerError::ServiceNotFound(service.to_owned()))?;
        let adults = clients.services(Some((KEY_SERVICE_STATE, STATE_ADULT)));
        let id = selector.lookup(header, &adults).ok_or_else(|| ContainerError::NoServiceFound(service.to_owned()))?;
        clients.get(&id).ok_or(ContainerError::NoClientFound(id))
    }

    async fn connect_to_service(self: &Arc<Self>, name: &str, naming: Arc<dyn Naming>) -> Result<(), ContainerError> {
        let clients = Arc::clone(self.services.entry(name.to_owned()).or_default().value());

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = Handle::current();
        let watched = name.to_owned();
        let watch_clients = Arc::clone(&clients);
        naming
            .subscribe(
                name,
                Arc::new(move |instances: Vec<ServiceRegistration>| {
                    if let Some(container) = weak.upgrade() {
                        let name = watched.clone();
                        let clients = Arc::clone(&watch_clients);
                        handle.spawn(async move { container.watch(&name, &clients, instances).await });
                    }
                }),
            )
            .await?;

        let current = naming.find(name, &[]).await?;
        self.watch(name, &clients, current).await;
        Ok(())
    }

    async fn watch(self: &Arc<Self>, name: &str, clients: &Arc<ClientMap>, instances: Vec<ServiceRegistration>) {
        for service in instances {
            if clients.contains(&service.id) {
                continue;
            }
            info!(service = name, instance = %service, "watch a new service");
            if let Err(e) = self.build_client(clients, service).await {
                warn!(service = name, error = %e, "build client failed");
            }
        }
    }

    async fn build_client(
        self: &Arc<Self>,
        clients: &Arc<ClientMap>,
        mut service: ServiceRegistration,
    ) -> Result<Option<Arc<Client>>, ContainerError> {
        let Some(_dialing) = Dialing::begin(&self.connecting, &service.id) else {
            debug!(instance = %service.id, "dial already in progress");
            return Ok(None);
        };
        if clients.contains(&service.id) {
            return Ok(None);
        }
        if service.protocol != Protocol::Tcp.as_str() {
            return Err(ContainerError::UnsupportedProtocol(service.id));
        }
        let dialer = self.with_parts(|p| p.dialer.clone()).ok_or(ContainerError::DialerRequired)?;

        service.meta.insert(KEY_SERVICE_STATE.to_owned(), STATE_YOUNG.to_owned());
        let addr = service.dial_url();
        let client = Arc::new(Client::new(service, self.config.client.clone()));
        client.connect(dialer.as_ref(), &addr).await?;

        let warmup = self.config.warmup;
        let promoted = Arc::clone(&client);
        tokio::spawn(async move {
            tokio::time::sleep(warmup).await;
            promoted.set_meta(KEY_SERVICE_STATE, STATE_ADULT);
            debug!(instance = %promoted.id(), "promoted to adult");
        });

        clients.add(Arc::clone(&client));

        let container = Arc::clone(self);
        let reader = Arc::clone(&client);
        let registry = Arc::clone(clients);
        tokio::spawn(async move {
            if let Err(e) = container.read_loop(&reader).await {
                info!(instance = %reader.id(), error = %e, "dependency read loop ended");
            }
            registry.remove_link(&reader);
            reader.close().await;
        });

        Ok(Some(client))
    }

    async fn read_loop(&self, client: &Client) -> Result<(), ContainerError> {
        info!(instance = %client.id(), name = %client.name(), "read loop started");
        loop {
            let frame = client.read().await?;
            if frame.opcode() != OpCode::Binary {
                continue;
            }
            let pkt = match read_logic_pkt(&frame.into_payload()) {
                Ok(pkt) => pkt,
                Err(e) => {
                    warn!(instance = %client.id(), error = %e, "invalid packet");
                    continue;
                },
            };
            if let Err(e) = self.push_message(pkt).await {
                warn!(instance = %client.id(), error = %e, "push message failed");
            }
        }
    }

    /// Fan a packet out to the local channels in its `dest.channels`.
    ///
    /// The packet must be addressed to this server through `dest.server`.
    /// Both routing entries are stripped before delivery. A failed channel
    /// is logged and does not stop delivery to the rest.
    pub async fn push_message(&self, mut pkt: LogicPkt) -> Result<(), ContainerError> {
        let server = self.server()?;
        let local = &server.service().id;
        let dest = pkt.get_string_meta(META_DEST_SERVER);
        if dest.as_deref() != Some(local.as_str()) {
            return Err(ContainerError::DestServerMismatch { expected: local.clone(), actual: dest });
        }
        let channels = pkt.get_string_meta(META_DEST_CHANNELS).ok_or(ContainerError::MissingDestChannels)?;

        pkt.del_meta(META_DEST_SERVER);
        pkt.del_meta(META_DEST_CHANNELS);
        let payload = marshal_logic(&pkt)?;
        debug!(channels = %channels, %pkt, "push");

        for id in channels.split(',').filter(|id| !id.is_empty()) {
            if let Err(e) = server.push(id, payload.clone()).await {
                warn!(channel_id = id, error = %e, "push to channel failed");
            }
        }
        Ok(())
    }

    /// Shut the server down, leave the registry and drop dependency links.
    pub async fn shutdown(&self) -> Result<(), ContainerError> {
        self.transition(ContainerState::Started, ContainerState::Closed, "shutdown")?;
        let (server, deps, naming) = self.with_parts(|p| (p.server.clone(), p.deps.clone(), p.naming.clone()));

        let mut result = Ok(());
        if let Some(server) = &server {
            if let Err(e) = server.shutdown(self.config.shutdown_grace).await {
                warn!(error = %e, "server shutdown");
                result = Err(e.into());
            }
        }

        if let Some(naming) = naming {
            if let Some(server) = server.as_ref().filter(|s| s.service().is_public()) {
                if let Err(e) = naming.deregister(&server.service().id).await {
                    warn!(error = %e, "deregister failed");
                }
            }
            for dep in &deps {
                let _ = naming.unsubscribe(dep).await;
            }
        }

        let links: Vec<Arc<Client>> = self.services.iter().flat_map(|entry| entry.value().all()).collect();
        for client in links {
            client.close().await;
        }
        info!("container shut down");
        result
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("state", &self.state())
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dial_per_instance() {
        let set = DashSet::new();
        let first = Dialing::begin(&set, "chat01");
        assert!(first.is_some());
        assert!(Dialing::begin(&set, "chat01").is_none());
        assert!(Dialing::begin(&set, "chat02").is_some());

        drop(first);
        assert!(!set.contains("chat01"));
        assert!(Dialing::begin(&set, "chat01").is_some());
    }
}
