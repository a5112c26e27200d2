use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use relaygate_proto::{
    Status,
    commands::{CHAT_GROUP_TALK, CHAT_TALK_ACK, CHAT_USER_TALK},
    messages::{MessageAckRequest, MessagePush, MessageRequest, MessageResponse},
};

use crate::{
    context::Context,
    error::ServiceError,
    message::{InsertMessage, MessageService},
    router::Handler,
};

/// Handles one-to-one messages, group messages and read acks.
pub struct ChatHandler {
    messages: Arc<dyn MessageService>,
}

fn now_nanos() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos() as i64)
}

impl ChatHandler {
    /// Handler storing messages in `messages`.
    pub fn new(messages: Arc<dyn MessageService>) -> Self {
        Self { messages }
    }

    fn message(ctx: &Context, req: MessageRequest, send_time: i64) -> InsertMessage {
        InsertMessage {
            sender: ctx.session().account.clone(),
            dest: ctx.header().dest.clone(),
            send_time,
            kind: req.kind,
            body: req.body,
            extra: req.extra,
        }
    }

    fn push(ctx: &Context, msg: &InsertMessage, message_id: i64) -> MessagePush {
        MessagePush {
            message_id,
            kind: msg.kind,
            body: msg.body.clone(),
            extra: msg.extra.clone(),
            sender: ctx.session().account.clone(),
            send_time: msg.send_time,
        }
    }

    /// Store a message to `dest` and push it if the receiver is online.
    pub async fn user_talk(&self, ctx: &Context) -> Result<(), ServiceError> {
        if ctx.header().dest.is_empty() {
            return Err(ServiceError::NoDestination);
        }
        let req: MessageRequest = ctx.read_body()?;
        let location = ctx.location(&ctx.header().dest).await?;

        let send_time = now_nanos();
        let msg = Self::message(ctx, req, send_time);
        let message_id = self.messages.insert_user(&ctx.session().app, msg.clone()).await?;

        if let Some(location) = location {
            ctx.dispatch(&Self::push(ctx, &msg, message_id), &[location]).await?;
        }
        ctx.resp(Status::Success, &MessageResponse { message_id, send_time }).await
    }

    /// Store a message to group `dest` and push it to online members.
    pub async fn group_talk(&self, ctx: &Context) -> Result<(), ServiceError> {
        if ctx.header().dest.is_empty() {
            return Err(ServiceError::NoDestination);
        }
        let req: MessageRequest = ctx.read_body()?;
        let app = &ctx.session().app;

        let send_time = now_nanos();
        let msg = Self::message(ctx, req, send_time);
        let message_id = self.messages.insert_group(app, msg.clone()).await?;

        let members = self.messages.group_members(app, &msg.dest).await?;
        let locations = ctx.locations(&members).await?;
        if !locations.is_empty() {
            ctx.dispatch(&Self::push(ctx, &msg, message_id), &locations).await?;
        }
        ctx.resp(Status::Success, &MessageResponse { message_id, send_time }).await
    }

    /// Record a read ack.
    pub async fn talk_ack(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req: MessageAckRequest = ctx.read_body()?;
        let session = ctx.session();
        self.messages.set_ack(&session.app, &session.account, req.message_id).await?;
        ctx.resp_status(Status::Success).await
    }
}

#[async_trait]
impl Handler for ChatHandler {
    async fn handle(&self, ctx: &Context) -> Result<(), ServiceError> {
        match ctx.command() {
            CHAT_USER_TALK => self.user_talk(ctx).await,
            CHAT_GROUP_TALK => self.group_talk(ctx).await,
            CHAT_TALK_ACK => self.talk_ack(ctx).await,
            other => Err(ServiceError::NotImplemented(other.to_owned())),
        }
    }
}

impl std::fmt::Debug for ChatHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandler").finish_non_exhaustive()
    }
}
