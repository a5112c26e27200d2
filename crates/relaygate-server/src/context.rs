//! Per-request handler context.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use relaygate_core::{SessionStorage, StorageError};
use relaygate_proto::{
    Flag, Header, Location, LogicPkt, Status,
    messages::{ErrorResponse, Session},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::ServiceError;

/// Sends packets to channels behind a gateway.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Deliver `pkt` to `channels`, all of which live on `gateway`.
    async fn push(&self, gateway: &str, channels: &[String], pkt: LogicPkt) -> Result<(), ServiceError>;
}

/// What a handler sees of one request.
pub struct Context {
    request: LogicPkt,
    session: Session,
    dispatcher: Arc<dyn Dispatcher>,
    storage: Arc<dyn SessionStorage>,
}

impl Context {
    /// Context for `request` sent by `session`.
    pub fn new(
        request: LogicPkt,
        session: Session,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self { request, session, dispatcher, storage }
    }

    /// Request header.
    pub fn header(&self) -> &Header {
        &self.request.header
    }

    /// Request command.
    pub fn command(&self) -> &str {
        self.request.command()
    }

    /// Session of the sender.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session storage.
    pub fn storage(&self) -> &dyn SessionStorage {
        self.storage.as_ref()
    }

    /// Decode the request body.
    pub fn read_body<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        self.request.read_body().map_err(ServiceError::InvalidBody)
    }

    /// Location of `account`'s default device, `None` when offline.
    pub async fn location(&self, account: &str) -> Result<Option<Location>, ServiceError> {
        match self.storage.get_location(account, "").await {
            Ok(location) => Ok(Some(location)),
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Locations of whichever `accounts` are online.
    pub async fn locations(&self, accounts: &[String]) -> Result<Vec<Location>, ServiceError> {
        match self.storage.get_locations(accounts).await {
            Ok(locations) => Ok(locations),
            Err(StorageError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Respond to the sender with `status` and `body`.
    pub async fn resp<T: Serialize>(&self, status: Status, body: &T) -> Result<(), ServiceError> {
        let pkt = self.response(status).with_body(body)?;
        self.reply(pkt).await
    }

    /// Respond to the sender with `status` and no body.
    pub async fn resp_status(&self, status: Status) -> Result<(), ServiceError> {
        self.reply(self.response(status)).await
    }

    /// Respond to the sender with `status` and an [`ErrorResponse`].
    pub async fn resp_with_error(&self, status: Status, err: &(dyn fmt::Display + Sync)) -> Result<(), ServiceError> {
        self.resp(status, &ErrorResponse { message: err.to_string() }).await
    }

    /// Push `body` to every location, grouped by gateway.
    pub async fn dispatch<T: Serialize>(&self, body: &T, locations: &[Location]) -> Result<(), ServiceError> {
        self.dispatch_as(self.command(), body, locations).await
    }

    /// Push `body` under `command` to every location, grouped by gateway.
    pub async fn dispatch_as<T: Serialize>(
        &self,
        command: &str,
        body: &T,
        locations: &[Location],
    ) -> Result<(), ServiceError> {
        let mut pkt = LogicPkt::from_header(self.header()).with_flag(Flag::Push).with_body(body)?;
        pkt.header.command = command.to_owned();

        let mut by_gateway: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for location in locations {
            by_gateway.entry(location.gate_id.as_str()).or_default().push(location.channel_id.clone());
        }
        for (gateway, channels) in by_gateway {
            debug!(gateway, count = channels.len(), command, "dispatch");
            self.dispatcher.push(gateway, &channels, pkt.clone()).await?;
        }
        Ok(())
    }

    fn response(&self, status: Status) -> LogicPkt {
        LogicPkt::from_header(self.header()).with_status(status).with_flag(Flag::Response)
    }

    async fn reply(&self, pkt: LogicPkt) -> Result<(), ServiceError> {
        let channels = [self.session.channel_id.clone()];
        self.dispatcher.push(&self.session.gate_id, &channels, pkt).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("command", &self.request.header.command)
            .field("channel_id", &self.session.channel_id)
            .field("gate_id", &self.session.gate_id)
            .finish_non_exhaustive()
    }
}
