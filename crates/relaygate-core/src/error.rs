//! Error types for the connection core.

use std::io;

use relaygate_proto::ProtocolError;
use thiserror::Error;

/// Failures reading or writing frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent bytes that are not a valid frame
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer closed the stream
    #[error("connection closed by peer")]
    Closed,

    /// Operation did not finish before its deadline
    #[error("transport timeout")]
    Timeout,

    /// WebSocket layer error
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Channel lifecycle failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Channel was closed locally
    #[error("channel {0} has closed")]
    Closed(String),

    /// Peer sent a close frame
    #[error("remote side closed the connection")]
    RemoteClosed,

    /// No frame arrived within the read window
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// Write did not complete within the write window
    #[error("write deadline exceeded")]
    WriteTimeout,

    /// Underlying transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Dispatch pool no longer accepts work
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Handshake rejections.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Handshake did not finish in time
    #[error("handshake timeout")]
    Timeout,

    /// Acceptor refused the connection
    #[error("{0}")]
    Rejected(String),

    /// First packet could not be decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport failed during the handshake
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listen address could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Server was started without a message listener
    #[error("message listener is required")]
    MessageListenerRequired,

    /// No channel registered under the id
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// Push to a registered channel failed
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Shutdown deadline elapsed before every channel drained
    #[error("shutdown deadline exceeded")]
    ShutdownTimeout,
}

/// Dispatch pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool was shut down
    #[error("worker pool is closed")]
    Closed,
}

/// Service registry failures.
#[derive(Debug, Error)]
pub enum NamingError {
    /// No service registered under the id
    #[error("service {0} not found")]
    NotFound(String),

    /// Registry backend error
    #[error("naming backend error: {0}")]
    Backend(String),
}

/// Outbound dial failures.
#[derive(Debug, Error)]
pub enum DialError {
    /// Dial or handshake did not finish in time
    #[error("dial {0} timed out")]
    Timeout(String),

    /// Address could not be reached
    #[error("dial {addr} failed: {source}")]
    Connect {
        /// Address dialed
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Handshake frame could not be built or sent
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Transport failed after connecting
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outbound client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `connect` called on a client that is already connected or closed
    #[error("client {0} already connected")]
    AlreadyConnected(String),

    /// Operation requires a connected client
    #[error("client {0} not connected")]
    NotConnected(String),

    /// Client was closed
    #[error("client {0} closed")]
    Closed(String),

    /// Peer sent a close frame
    #[error("remote side closed the connection")]
    RemoteClosed,

    /// Read or write deadline elapsed
    #[error("client timeout")]
    Timeout,

    /// Dial failed
    #[error(transparent)]
    Dial(#[from] DialError),

    /// Transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No session or location for the key
    #[error("session not found")]
    NotFound,

    /// Backend failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored bytes could not be decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
