//! Connection core for relaygate.
//!
//! Everything between a socket and an application handler lives here: the
//! [`Conn`] frame interface that transports implement, the [`Channel`] that
//! wraps an accepted connection with a bounded write queue, the
//! [`DefaultServer`] accept loop, and the outbound [`Client`] used for
//! service-to-service links.
//!
//! # Architecture
//!
//! ```text
//!  TcpStream ──Upgrader──> Conn ──Acceptor──> Channel ──read_loop──> WorkerPool
//!                                               │                        │
//!                                          ChannelMap              MessageListener
//! ```
//!
//! Transports ([`Upgrader`], [`Dialer`]) and collaborators ([`Naming`],
//! [`SessionStorage`]) are traits so bindings and backends can be swapped
//! without touching the channel logic.

pub mod channel;
pub mod channel_map;
pub mod client;
pub mod config;
pub mod conn;
pub mod dialer;
pub mod error;
pub mod listener;
pub mod naming;
pub mod pool;
pub mod server;
pub mod storage;

pub use channel::Channel;
pub use channel_map::ChannelMap;
pub use client::Client;
pub use config::{ChannelConfig, ClientConfig, ServerConfig};
pub use conn::{Conn, FrameReader, FrameWriter};
pub use dialer::{Dialer, DialerContext};
pub use error::{
    ChannelError, ClientError, DialError, HandshakeError, NamingError, PoolError, ServerError,
    StorageError, TransportError,
};
pub use listener::{Accepted, Acceptor, Agent, ChannelMeta, DefaultAcceptor, MessageListener, StateListener};
pub use naming::{MemoryNaming, Naming, ServiceCallback, ServiceRegistration};
pub use pool::WorkerPool;
pub use server::{DefaultServer, Server, Upgrader};
pub use storage::{MemoryStorage, SessionStorage};
