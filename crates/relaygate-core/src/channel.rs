//! Server-side channel wrapping one accepted connection.
//!
//! # Architecture
//!
//! A channel owns two tasks' worth of work:
//!
//! - **Write loop** (spawned by [`Channel::new`]): drains the bounded
//!   outbound queue. Each wakeup writes one payload, then every payload
//!   already queued at that instant, then flushes once. Batching keeps the
//!   flush count low under bursty pushes without delaying a lone message.
//! - **Read loop** (driven by the caller via [`Channel::read_loop`]): reads
//!   frames under a rolling deadline, answers pings, ends on close frames
//!   and hands every non-empty payload to the dispatch pool.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────┐  close() / write error / read loop exit  ┌────────┐
//! │ Open │─────────────────────────────────────────>│ Closed │
//! └──────┘                                          └────────┘
//! ```
//!
//! Close is terminal and its effects (dropping the queue, firing the closed
//! token) happen once no matter how many callers race on it. Channels never
//! remove themselves from a registry; the owner of the read loop does.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_proto::OpCode;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    config::ChannelConfig,
    conn::{Conn, FrameReader, FrameWriter},
    error::ChannelError,
    listener::{Agent, ChannelMeta, MessageListener},
    pool::WorkerPool,
};

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn FrameWriter>>>;

/// Read and write windows, adjustable after the write loop has started.
#[derive(Debug)]
struct Waits {
    read_ms: AtomicU64,
    write_ms: AtomicU64,
}

impl Waits {
    fn new(read: Duration, write: Duration) -> Self {
        Self { read_ms: AtomicU64::new(as_millis(read)), write_ms: AtomicU64::new(as_millis(write)) }
    }

    fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms.load(Ordering::Relaxed))
    }

    fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms.load(Ordering::Relaxed))
    }
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// One accepted client or service connection.
pub struct Channel {
    id: String,
    meta: ChannelMeta,
    remote_addr: Option<SocketAddr>,
    queue: Mutex<Option<mpsc::Sender<Bytes>>>,
    closed: CancellationToken,
    close_once: AtomicBool,
    reader: tokio::sync::Mutex<Box<dyn FrameReader>>,
    writer: SharedWriter,
    waits: Arc<Waits>,
}

impl Channel {
    /// Wrap `conn` and start the write loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(id: impl Into<String>, conn: Conn, meta: ChannelMeta, config: &ChannelConfig) -> Arc<Self> {
        let id = id.into();
        let remote_addr = conn.remote_addr();
        let (reader, writer) = conn.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let closed = CancellationToken::new();
        let waits = Arc::new(Waits::new(config.read_wait, config.write_wait));

        let loop_id = id.clone();
        let loop_writer = Arc::clone(&writer);
        let loop_closed = closed.clone();
        let loop_waits = Arc::clone(&waits);
        tokio::spawn(async move {
            if let Err(e) = write_loop(rx, loop_closed, loop_writer, loop_waits).await {
                info!(channel_id = %loop_id, error = %e, "write loop exited");
            }
        });

        Arc::new(Self {
            id,
            meta,
            remote_addr,
            queue: Mutex::new(Some(tx)),
            closed,
            close_once: AtomicBool::new(false),
            reader: tokio::sync::Mutex::new(reader),
            writer,
            waits,
        })
    }

    /// Channel id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handshake metadata.
    pub fn meta(&self) -> &ChannelMeta {
        &self.meta
    }

    /// Peer address, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token fired when the channel closes.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Set the read window. Zero is ignored.
    pub fn set_read_wait(&self, wait: Duration) {
        if !wait.is_zero() {
            self.waits.read_ms.store(as_millis(wait), Ordering::Relaxed);
        }
    }

    /// Set the write window. Zero is ignored.
    pub fn set_write_wait(&self, wait: Duration) {
        if !wait.is_zero() {
            self.waits.write_ms.store(as_millis(wait), Ordering::Relaxed);
        }
    }

    /// Queue a payload for the write loop.
    ///
    /// Waits only while the queue is full. Fails once the channel is closed,
    /// including when it closes while this call is waiting.
    pub async fn push(&self, payload: Bytes) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.id.clone()));
        }
        let sender = self
            .queue
            .lock()
            .ok()
            .and_then(|q| q.clone())
            .ok_or_else(|| ChannelError::Closed(self.id.clone()))?;

        tokio::select! {
            res = sender.send(payload) => res.map_err(|_| ChannelError::Closed(self.id.clone())),
            () = self.closed.cancelled() => Err(ChannelError::Closed(self.id.clone())),
        }
    }

    /// Write one frame immediately, bypassing the queue, and flush.
    pub async fn write_frame(&self, opcode: OpCode, payload: &[u8]) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        timeout(self.waits.write(), async {
            writer.write_frame(opcode, payload).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| ChannelError::WriteTimeout)??;
        Ok(())
    }

    /// Close the channel. Idempotent; effects run once.
    pub fn close(&self) {
        if self.close_once.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        self.closed.cancel();
        debug!(channel_id = %self.id, "channel closed");
    }

    /// Read frames until the peer closes, the read window lapses, a
    /// transport error occurs or the channel is closed locally.
    ///
    /// Always returns an error describing why the loop ended.
    pub async fn read_loop(
        self: &Arc<Self>,
        listener: Arc<dyn MessageListener>,
        pool: &WorkerPool,
    ) -> Result<(), ChannelError> {
        let mut reader = self.reader.lock().await;
        loop {
            let wait = self.waits.read();
            let frame = tokio::select! {
                () = self.closed.cancelled() => return Err(ChannelError::Closed(self.id.clone())),
                res = timeout(wait, reader.read_frame()) => match res {
                    Ok(frame) => frame?,
                    Err(_) => return Err(ChannelError::DeadlineExceeded),
                },
            };

            match frame.opcode() {
                OpCode::Close => return Err(ChannelError::RemoteClosed),
                OpCode::Ping => {
                    trace!(channel_id = %self.id, "ping");
                    self.write_frame(OpCode::Pong, &[]).await?;
                    continue;
                },
                _ => {},
            }

            let payload = frame.into_payload();
            if payload.is_empty() {
                continue;
            }

            let agent: Arc<dyn Agent> = Arc::clone(self) as Arc<dyn Agent>;
            let listener = Arc::clone(&listener);
            pool.submit(async move { listener.receive(agent, payload).await }).await?;
        }
    }
}

#[async_trait]
impl Agent for Channel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn push(&self, payload: Bytes) -> Result<(), ChannelError> {
        Channel::push(self, payload).await
    }

    fn meta(&self) -> &ChannelMeta {
        &self.meta
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
    writer: SharedWriter,
    waits: Arc<Waits>,
) -> Result<(), ChannelError> {
    loop {
        let payload = tokio::select! {
            () = closed.cancelled() => return Ok(()),
            payload = rx.recv() => payload,
        };
        let Some(payload) = payload else {
            return Err(ChannelError::Closed("write queue".into()));
        };

        let mut w = writer.lock().await;
        timeout(waits.write(), async {
            w.write_frame(OpCode::Binary, &payload).await?;
            for _ in 0..rx.len() {
                match rx.try_recv() {
                    Ok(next) => w.write_frame(OpCode::Binary, &next).await?,
                    Err(_) => break,
                }
            }
            w.flush().await
        })
        .await
        .map_err(|_| ChannelError::WriteTimeout)??;
    }
}
