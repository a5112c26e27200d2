use async_trait::async_trait;
use relaygate_proto::{
    Status,
    commands::{LOGIN_KICKOUT, LOGIN_SIGN_IN, LOGIN_SIGN_OUT},
    messages::{KickoutNotify, LoginResponse, Session},
};
use tracing::info;

use crate::{context::Context, error::ServiceError, router::Handler};

/// Handles `login.signin` and `login.signout`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoginHandler;

impl LoginHandler {
    /// Store the session carried in the body and answer with its channel id.
    ///
    /// An account signed in elsewhere is told to go away first.
    pub async fn sign_in(&self, ctx: &Context) -> Result<(), ServiceError> {
        let session: Session = ctx.read_body()?;
        info!(channel_id = %session.channel_id, account = %session.account, remote_ip = %session.remote_ip, "sign in");

        if let Some(previous) = ctx.location(&session.account).await? {
            if previous.channel_id != session.channel_id {
                let notify = KickoutNotify { channel_id: previous.channel_id.clone() };
                ctx.dispatch_as(LOGIN_KICKOUT, &notify, &[previous]).await?;
            }
        }

        ctx.storage().add(&session).await?;
        ctx.resp(Status::Success, &LoginResponse { channel_id: session.channel_id }).await
    }

    /// Drop the sender's session.
    pub async fn sign_out(&self, ctx: &Context) -> Result<(), ServiceError> {
        let session = ctx.session();
        info!(channel_id = %session.channel_id, account = %session.account, "sign out");
        ctx.storage().delete(&session.account, &session.channel_id).await?;
        ctx.resp_status(Status::Success).await
    }
}

#[async_trait]
impl Handler for LoginHandler {
    async fn handle(&self, ctx: &Context) -> Result<(), ServiceError> {
        match ctx.command() {
            LOGIN_SIGN_IN => self.sign_in(ctx).await,
            LOGIN_SIGN_OUT => self.sign_out(ctx).await,
            other => Err(ServiceError::NotImplemented(other.to_owned())),
        }
    }
}
