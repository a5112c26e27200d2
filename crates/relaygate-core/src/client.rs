//! Outbound connection to one service instance.
//!
//! Containers keep one [`Client`] per dependency instance. The client owns
//! the dialed connection, sends packets on it, exposes raw frame reads to the
//! container's read loop and keeps the link alive with periodic pings.

use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use relaygate_proto::{Frame, OpCode};
use tokio::{sync::Mutex, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    config::ClientConfig,
    conn::{FrameReader, FrameWriter},
    dialer::{Dialer, DialerContext},
    error::ClientError,
    naming::ServiceRegistration,
};

const IDLE: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSED: u8 = 2;

type SharedWriter = Arc<Mutex<Option<Box<dyn FrameWriter>>>>;

/// Client side of a service-to-service link.
pub struct Client {
    service: RwLock<ServiceRegistration>,
    id: String,
    name: String,
    config: ClientConfig,
    state: AtomicU8,
    reader: Mutex<Option<Box<dyn FrameReader>>>,
    writer: SharedWriter,
    closed: CancellationToken,
}

impl Client {
    /// Client for the instance described by `service`. Not yet connected.
    pub fn new(service: ServiceRegistration, config: ClientConfig) -> Self {
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            service: RwLock::new(service),
            config,
            state: AtomicU8::new(IDLE),
            reader: Mutex::new(None),
            writer: Arc::new(Mutex::new(None)),
            closed: CancellationToken::new(),
        }
    }

    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the instance registration.
    pub fn service(&self) -> ServiceRegistration {
        self.service.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Set one registration metadata entry.
    pub fn set_meta(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut service) = self.service.write() {
            service.meta.insert(key.into(), value.into());
        }
    }

    /// Registration metadata value for `key`.
    pub fn meta_value(&self, key: &str) -> Option<String> {
        self.service.read().ok().and_then(|s| s.meta.get(key).cloned())
    }

    /// Whether `connect` succeeded and `close` has not been called.
    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    /// Dial `addr` through `dialer`. Only one connect may succeed per client.
    pub async fn connect(&self, dialer: &dyn Dialer, addr: &str) -> Result<(), ClientError> {
        if self.state.compare_exchange(IDLE, CONNECTED, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(ClientError::AlreadyConnected(self.id.clone()));
        }

        let ctx = DialerContext {
            id: self.id.clone(),
            name: self.name.clone(),
            address: addr.to_owned(),
            timeout: self.config.dial_timeout,
        };
        let conn = match dialer.dial_and_handshake(&ctx).await {
            Ok(conn) => conn,
            Err(e) => {
                let _ = self.state.compare_exchange(CONNECTED, IDLE, Ordering::AcqRel, Ordering::Acquire);
                return Err(e.into());
            },
        };

        let (reader, writer) = conn.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        debug!(client = %self.id, addr, "connected");

        if let Some(interval) = self.config.heartbeat.filter(|d| !d.is_zero()) {
            let writer = Arc::clone(&self.writer);
            let closed = self.closed.clone();
            let id = self.id.clone();
            let write_wait = self.config.write_wait;
            tokio::spawn(async move {
                if let Err(e) = heartbeat_loop(&id, writer, closed, interval, write_wait).await {
                    warn!(client = %id, error = %e, "heartbeat loop exited");
                }
            });
        }
        Ok(())
    }

    /// Send one binary frame and flush it.
    pub async fn send(&self, payload: &[u8]) -> Result<(), ClientError> {
        self.check_connected()?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| ClientError::NotConnected(self.id.clone()))?;
        timeout(self.config.write_wait, async {
            writer.write_frame(OpCode::Binary, payload).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| ClientError::Timeout)??;
        Ok(())
    }

    /// Read the next frame.
    ///
    /// While heartbeats are enabled every read is bounded by the read
    /// window. A close frame from the peer surfaces as `RemoteClosed`.
    pub async fn read(&self) -> Result<Frame, ClientError> {
        self.check_connected()?;
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(|| ClientError::NotConnected(self.id.clone()))?;

        let frame = if self.config.heartbeat.is_some() {
            tokio::select! {
                () = self.closed.cancelled() => return Err(ClientError::Closed(self.id.clone())),
                res = timeout(self.config.read_wait, reader.read_frame()) => res.map_err(|_| ClientError::Timeout)??,
            }
        } else {
            tokio::select! {
                () = self.closed.cancelled() => return Err(ClientError::Closed(self.id.clone())),
                res = reader.read_frame() => res?,
            }
        };

        if frame.opcode() == OpCode::Close {
            return Err(ClientError::RemoteClosed);
        }
        Ok(frame)
    }

    /// Close the link, sending a close frame on a best-effort basis.
    /// Idempotent.
    pub async fn close(&self) {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        self.closed.cancel();
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let sent = timeout(self.config.write_wait, async {
                writer.write_frame(OpCode::Close, &[]).await?;
                writer.flush().await
            })
            .await;
            if !matches!(sent, Ok(Ok(()))) {
                debug!(client = %self.id, "close frame not delivered");
            }
        }
        debug!(client = %self.id, "client closed");
    }

    fn check_connected(&self) -> Result<(), ClientError> {
        match self.state.load(Ordering::Acquire) {
            CONNECTED => Ok(()),
            CLOSED => Err(ClientError::Closed(self.id.clone())),
            _ => Err(ClientError::NotConnected(self.id.clone())),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

async fn heartbeat_loop(
    id: &str,
    writer: SharedWriter,
    closed: CancellationToken,
    interval: Duration,
    write_wait: Duration,
) -> Result<(), ClientError> {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            () = closed.cancelled() => return Ok(()),
            _ = ticker.tick() => {},
        }
        let mut guard = writer.lock().await;
        let Some(w) = guard.as_mut() else { return Ok(()) };
        trace!(client = id, "ping");
        timeout(write_wait, async {
            w.write_frame(OpCode::Ping, &[]).await?;
            w.flush().await
        })
        .await
        .map_err(|_| ClientError::Timeout)??;
    }
}
