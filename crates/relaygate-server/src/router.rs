//! Command routing.
//!
//! Each command maps to a chain of [`Handler`]s run in registration order.
//! The first error stops the chain and is reported to the sender as an
//! error response whose status comes from [`ServiceError::status`].
//! Unregistered commands get a `NotImplemented` response.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use relaygate_core::SessionStorage;
use relaygate_proto::{LogicPkt, messages::Session};
use tracing::{debug, warn};

use crate::{
    context::{Context, Dispatcher},
    error::ServiceError,
};

/// Handles one or more commands.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle the request in `ctx`.
    async fn handle(&self, ctx: &Context) -> Result<(), ServiceError>;
}

/// Command to handler chain table.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl Router {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the chain for `command`.
    pub fn handle(&mut self, command: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.entry(command.into()).or_default().push(handler);
    }

    /// Whether `command` has a handler.
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Run the chain for `pkt`'s command.
    pub async fn serve(
        &self,
        pkt: LogicPkt,
        session: Session,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
    ) {
        let ctx = Context::new(pkt, session, dispatcher, storage);
        let result = match self.handlers.get(ctx.command()) {
            Some(chain) => run_chain(chain, &ctx).await,
            None => Err(ServiceError::NotImplemented(ctx.command().to_owned())),
        };

        if let Err(e) = result {
            let status = e.status();
            debug!(command = ctx.command(), ?status, error = %e, "handler failed");
            if let Err(resp_err) = ctx.resp_with_error(status, &e).await {
                warn!(command = ctx.command(), error = %resp_err, "error response failed");
            }
        }
    }
}

async fn run_chain(chain: &[Arc<dyn Handler>], ctx: &Context) -> Result<(), ServiceError> {
    for handler in chain {
        handler.handle(ctx).await?;
    }
    Ok(())
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<_> = self.handlers.keys().collect();
        commands.sort();
        f.debug_struct("Router").field("commands", &commands).finish()
    }
}
