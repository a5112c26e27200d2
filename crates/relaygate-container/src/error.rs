//! Container and routing errors.

use relaygate_core::{ClientError, NamingError, ServerError};
use relaygate_proto::ProtocolError;
use thiserror::Error;

use crate::container::ContainerState;

/// Container failures.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Lifecycle transition attempted from the wrong state
    #[error("invalid state {state:?} for {operation}")]
    State {
        /// State the container was in
        state: ContainerState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// `start` called before a naming backend was set
    #[error("naming is required")]
    NamingRequired,

    /// Dependency link requested before a dialer was set
    #[error("dialer is required")]
    DialerRequired,

    /// Operation needs a server but `init` has not run
    #[error("container not initialized")]
    NotInitialized,

    /// Packet is missing a field routing needs
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    /// Service is not a dependency of this container
    #[error("service {0} not found")]
    ServiceNotFound(String),

    /// Dependency has no instance eligible for routing
    #[error("no service found for {0}")]
    NoServiceFound(String),

    /// Selected instance has no live link
    #[error("no client found for {0}")]
    NoClientFound(String),

    /// Pushed packet is addressed to another server
    #[error("dest.server mismatch: {actual:?} != {expected}")]
    DestServerMismatch {
        /// Local server id
        expected: String,
        /// Value found on the packet
        actual: Option<String>,
    },

    /// Pushed packet has no `dest.channels`
    #[error("dest.channels is missing")]
    MissingDestChannels,

    /// Dependency instance does not speak tcp
    #[error("service {0} is not a tcp service")]
    UnsupportedProtocol(String),

    /// Packet could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Dependency link failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Local server failed
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Registry failed
    #[error(transparent)]
    Naming(#[from] NamingError),
}

/// Route table failures.
#[derive(Debug, Error)]
pub enum RouteError {
    /// File could not be read
    #[error("read route file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for a route table
    #[error("parse route file: {0}")]
    Json(#[from] serde_json::Error),

    /// Table has no zone with a positive weight
    #[error("route table has no weighted zone")]
    NoZones,
}
