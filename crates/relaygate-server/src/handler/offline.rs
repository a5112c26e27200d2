//! Offline message sync.
//!
//! A reconnecting client first asks for its index since the last message it
//! holds, then fetches the contents it is missing in batches.

use std::sync::Arc;

use async_trait::async_trait;
use relaygate_proto::{
    Status,
    commands::{OFFLINE_CONTENT, OFFLINE_INDEX},
    messages::{MessageContentRequest, MessageContentResponse, MessageIndexRequest, MessageIndexResponse},
};
use tracing::debug;

use crate::{context::Context, error::ServiceError, message::MessageService, router::Handler};

/// Handles `chat.offline.index` and `chat.offline.content`.
pub struct OfflineHandler {
    messages: Arc<dyn MessageService>,
}

impl OfflineHandler {
    /// Handler reading from `messages`.
    pub fn new(messages: Arc<dyn MessageService>) -> Self {
        Self { messages }
    }

    /// Index entries of the sender newer than the requested message.
    pub async fn sync_index(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req: MessageIndexRequest = ctx.read_body()?;
        let session = ctx.session();
        let indexes = self.messages.offline_index(&session.app, &session.account, req.message_id).await?;
        debug!(account = %session.account, after = req.message_id, count = indexes.len(), "offline index");
        ctx.resp(Status::Success, &MessageIndexResponse { indexes }).await
    }

    /// Contents of the requested messages.
    pub async fn sync_content(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req: MessageContentRequest = ctx.read_body()?;
        if req.message_ids.is_empty() {
            return Err(ServiceError::InvalidRequest("message ids are empty"));
        }
        let contents = self.messages.contents(&ctx.session().app, &req.message_ids).await?;
        ctx.resp(Status::Success, &MessageContentResponse { contents }).await
    }
}

#[async_trait]
impl Handler for OfflineHandler {
    async fn handle(&self, ctx: &Context) -> Result<(), ServiceError> {
        match ctx.command() {
            OFFLINE_INDEX => self.sync_index(ctx).await,
            OFFLINE_CONTENT => self.sync_content(ctx).await,
            other => Err(ServiceError::NotImplemented(other.to_owned())),
        }
    }
}

impl std::fmt::Debug for OfflineHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineHandler").finish_non_exhaustive()
    }
}
