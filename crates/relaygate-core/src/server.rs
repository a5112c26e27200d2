//! Accept loop and per-connection lifecycle.
//!
//! # Connection lifecycle
//!
//! 1. Upgrade the raw stream into a [`Conn`] (transport specific).
//! 2. Run the [`Acceptor`] under the login window. A rejection writes a
//!    close frame carrying the reason and drops the connection.
//! 3. Reject ids that are already registered the same way.
//! 4. Build a [`Channel`], register it and run its read loop.
//! 5. When the loop ends: deregister, notify the [`StateListener`], close
//!    the channel. These run exactly once per accepted connection.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_proto::OpCode;
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    channel::Channel,
    channel_map::ChannelMap,
    config::ServerConfig,
    conn::Conn,
    error::{HandshakeError, ServerError, TransportError},
    listener::{Acceptor, DefaultAcceptor, MessageListener, StateListener},
    naming::ServiceRegistration,
    pool::WorkerPool,
};

/// Turns an accepted TCP stream into a framed connection.
#[async_trait]
pub trait Upgrader: Send + Sync + 'static {
    /// Transport name for logs.
    fn name(&self) -> &'static str;

    /// Perform any protocol upgrade and wrap the stream.
    async fn upgrade(&self, stream: TcpStream) -> Result<Conn, TransportError>;
}

/// A listening endpoint that owns a set of channels.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Registration describing this server.
    fn service(&self) -> &ServiceRegistration;

    /// Bind and accept connections until shut down.
    async fn start(&self) -> Result<(), ServerError>;

    /// Queue a payload on the channel registered under `id`.
    async fn push(&self, id: &str, payload: Bytes) -> Result<(), ServerError>;

    /// Stop accepting, close every channel and drain dispatch, giving up
    /// after `deadline`.
    async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError>;
}

/// Server generic over its transport upgrade.
pub struct DefaultServer<U> {
    listen: String,
    service: ServiceRegistration,
    upgrader: Arc<U>,
    config: ServerConfig,
    acceptor: Arc<dyn Acceptor>,
    message_listener: Option<Arc<dyn MessageListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
    channels: Arc<ChannelMap>,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
}

impl<U: Upgrader> DefaultServer<U> {
    /// Server listening on `listen`. Must be called inside a tokio runtime.
    pub fn new(listen: impl Into<String>, service: ServiceRegistration, upgrader: U, config: ServerConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config.workers, config.worker_queue));
        Self {
            listen: listen.into(),
            service,
            upgrader: Arc::new(upgrader),
            config,
            acceptor: Arc::new(DefaultAcceptor),
            message_listener: None,
            state_listener: None,
            channels: Arc::new(ChannelMap::new()),
            pool,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the handshake acceptor.
    pub fn set_acceptor(&mut self, acceptor: Arc<dyn Acceptor>) {
        self.acceptor = acceptor;
    }

    /// Set the inbound message listener. Required before start.
    pub fn set_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.message_listener = Some(listener);
    }

    /// Set the disconnect listener.
    pub fn set_state_listener(&mut self, listener: Arc<dyn StateListener>) {
        self.state_listener = Some(listener);
    }

    /// Set the read window for new channels. Zero is ignored.
    pub fn set_read_wait(&mut self, wait: Duration) {
        if !wait.is_zero() {
            self.config.channel.read_wait = wait;
        }
    }

    /// Live channel registry.
    pub fn channels(&self) -> &Arc<ChannelMap> {
        &self.channels
    }

    /// Bind the listen address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.listen)
            .await
            .map_err(|source| ServerError::Bind { addr: self.listen.clone(), source })
    }

    /// Accept connections on an already bound listener until shut down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let message_listener = self.message_listener.clone().ok_or(ServerError::MessageListenerRequired)?;
        let local = listener.local_addr().ok();
        info!(
            service = %self.service.id,
            transport = self.upgrader.name(),
            addr = ?local,
            "server started"
        );

        loop {
            let (stream, peer) = tokio::select! {
                () = self.shutdown.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    },
                },
            };

            let session = Session {
                upgrader: Arc::clone(&self.upgrader),
                acceptor: Arc::clone(&self.acceptor),
                message_listener: Arc::clone(&message_listener),
                state_listener: self.state_listener.clone(),
                channels: Arc::clone(&self.channels),
                pool: Arc::clone(&self.pool),
                config: self.config.clone(),
            };
            tokio::spawn(session.run(stream, peer));
        }

        info!(service = %self.service.id, "server stopped accepting");
        Ok(())
    }
}

/// Everything one connection task needs from the server.
struct Session<U> {
    upgrader: Arc<U>,
    acceptor: Arc<dyn Acceptor>,
    message_listener: Arc<dyn MessageListener>,
    state_listener: Option<Arc<dyn StateListener>>,
    channels: Arc<ChannelMap>,
    pool: Arc<WorkerPool>,
    config: ServerConfig,
}

impl<U: Upgrader> Session<U> {
    async fn run(self, stream: TcpStream, peer: SocketAddr) {
        let mut conn = match self.upgrader.upgrade(stream).await {
            Ok(conn) => conn.with_remote_addr(peer),
            Err(e) => {
                debug!(%peer, error = %e, "upgrade failed");
                return;
            },
        };

        let login_wait = self.config.login_wait;
        let accepted = match timeout(login_wait, self.acceptor.accept(&mut conn, login_wait)).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => return reject(conn, &e).await,
            Err(_) => return reject(conn, &HandshakeError::Timeout).await,
        };

        let id = accepted.channel_id;
        if self.channels.contains(&id) {
            let e = HandshakeError::Rejected(format!("channel {id} exists"));
            return reject(conn, &e).await;
        }

        let channel = Channel::new(id.clone(), conn, accepted.meta, &self.config.channel);
        if !self.channels.add(Arc::clone(&channel)) {
            let _ = channel.write_frame(OpCode::Close, format!("channel {id} exists").as_bytes()).await;
            channel.close();
            return;
        }
        info!(channel_id = %id, %peer, "channel accepted");

        let reason = channel.read_loop(Arc::clone(&self.message_listener), &self.pool).await;
        if let Err(e) = reason {
            info!(channel_id = %id, reason = %e, "read loop ended");
        }

        self.channels.remove(&id);
        if let Some(listener) = &self.state_listener {
            listener.disconnect(&id).await;
        }
        channel.close();
    }
}

async fn reject(mut conn: Conn, reason: &HandshakeError) {
    info!(peer = ?conn.remote_addr(), %reason, "handshake rejected");
    let text = reason.to_string();
    if conn.write_frame(OpCode::Close, text.as_bytes()).await.is_ok() {
        let _ = conn.flush().await;
    }
}

#[async_trait]
impl<U: Upgrader> Server for DefaultServer<U> {
    fn service(&self) -> &ServiceRegistration {
        &self.service
    }

    async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    async fn push(&self, id: &str, payload: Bytes) -> Result<(), ServerError> {
        let channel = self.channels.get(id).ok_or_else(|| ServerError::ChannelNotFound(id.to_owned()))?;
        channel.push(payload).await?;
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        info!(service = %self.service.id, "shutdown");
        self.shutdown.cancel();

        let drained = timeout(deadline, async {
            for channel in self.channels.all() {
                channel.close();
            }
            while !self.channels.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.pool.shutdown().await;
        })
        .await;

        drained.map_err(|_| {
            warn!(service = %self.service.id, "shutdown deadline passed, aborting dispatch");
            self.pool.abort();
            ServerError::ShutdownTimeout
        })
    }
}

impl<U> std::fmt::Debug for DefaultServer<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultServer")
            .field("listen", &self.listen)
            .field("service", &self.service.id)
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}
