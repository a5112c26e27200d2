//! Outbound dial contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::{conn::Conn, error::DialError};

/// Parameters for one dial attempt.
#[derive(Debug, Clone)]
pub struct DialerContext {
    /// Id of the instance being dialed
    pub id: String,
    /// Service name of the instance being dialed
    pub name: String,
    /// Dial address (see [`ServiceRegistration::dial_url`](crate::ServiceRegistration::dial_url))
    pub address: String,
    /// Deadline covering connect and handshake
    pub timeout: Duration,
}

/// Connects to a remote instance and runs the client side of its handshake.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Dial `ctx.address` and complete the handshake.
    async fn dial_and_handshake(&self, ctx: &DialerContext) -> Result<Conn, DialError>;
}
