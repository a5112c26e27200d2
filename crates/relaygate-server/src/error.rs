//! Application errors.

use relaygate_container::{ContainerError, RouteError};
use relaygate_core::StorageError;
use relaygate_proto::{ProtocolError, Status};
use thiserror::Error;

use crate::token::TokenError;

/// Failures inside the gateway and chat services.
///
/// Handler errors are turned into response packets; [`ServiceError::status`]
/// picks the status the client sees.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request body did not decode as the expected type
    #[error("invalid packet body: {0}")]
    InvalidBody(#[source] ProtocolError),

    /// Request decoded but a required field is missing or empty
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Message command without a destination
    #[error("dest is empty")]
    NoDestination,

    /// No handler registered for the command
    #[error("command {0} is not implemented")]
    NotImplemented(String),

    /// Command requires a signed-in session
    #[error("session of channel {0} not found")]
    SessionNotFound(String),

    /// Encoding or decoding failed outside the request body
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Routing failed
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Container was dropped while a handler still referenced it
    #[error("container is gone")]
    ContainerGone,

    /// Session storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Message store failed
    #[error("message store: {0}")]
    MessageStore(String),

    /// Login token rejected
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Route table could not be loaded
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Command line or configuration value is invalid
    #[error("invalid config: {0}")]
    Config(String),
}

impl ServiceError {
    /// Status reported to the client when this error ends a request.
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidBody(_) | Self::InvalidRequest(_) => Status::InvalidPacketBody,
            Self::NoDestination => Status::NoDestination,
            Self::NotImplemented(_) => Status::NotImplemented,
            Self::SessionNotFound(_) => Status::SessionNotFound,
            Self::Token(_) => Status::Unauthorized,
            _ => Status::SystemException,
        }
    }
}
