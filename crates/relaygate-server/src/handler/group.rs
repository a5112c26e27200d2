//! Group management commands.

use std::sync::Arc;

use async_trait::async_trait;
use relaygate_proto::{
    Status,
    commands::{GROUP_CREATE, GROUP_DETAIL, GROUP_JOIN, GROUP_MEMBERS, GROUP_QUIT},
    messages::{
        GroupCreateNotify, GroupCreateRequest, GroupCreateResponse, GroupGetRequest, GroupGetResponse,
        GroupMemberRequest, GroupMembersResponse,
    },
};
use tracing::info;

use crate::{
    context::Context,
    error::ServiceError,
    message::{MessageService, NewGroup},
    router::Handler,
};

/// Handles `chat.group.*` membership commands.
pub struct GroupHandler {
    groups: Arc<dyn MessageService>,
}

impl GroupHandler {
    /// Handler keeping groups in `groups`.
    pub fn new(groups: Arc<dyn MessageService>) -> Self {
        Self { groups }
    }

    /// Create a group, tell its online members and answer with the id.
    pub async fn create(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req: GroupCreateRequest = ctx.read_body()?;
        let app = &ctx.session().app;
        let members = req.members.clone();
        let group_id = self
            .groups
            .create_group(
                app,
                NewGroup {
                    name: req.name,
                    avatar: req.avatar,
                    introduction: req.introduction,
                    owner: req.owner,
                    members: req.members,
                },
            )
            .await?;
        info!(%group_id, members = members.len(), "group created");

        let locations = ctx.locations(&members).await?;
        if !locations.is_empty() {
            let notify = GroupCreateNotify { group_id: group_id.clone(), members };
            ctx.dispatch(&notify, &locations).await?;
        }
        ctx.resp(Status::Success, &GroupCreateResponse { group_id }).await
    }

    /// Add an account to a group.
    pub async fn join(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req = Self::member_request(ctx)?;
        self.groups.join_group(&ctx.session().app, &req.group_id, &req.account).await?;
        ctx.resp_status(Status::Success).await
    }

    /// Remove an account from a group.
    pub async fn quit(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req = Self::member_request(ctx)?;
        self.groups.quit_group(&ctx.session().app, &req.group_id, &req.account).await?;
        ctx.resp_status(Status::Success).await
    }

    /// List a group's members.
    pub async fn members(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req = Self::get_request(ctx)?;
        let members = self.groups.members(&ctx.session().app, &req.group_id).await?;
        ctx.resp(Status::Success, &GroupMembersResponse { members }).await
    }

    /// Group attributes together with its members.
    pub async fn detail(&self, ctx: &Context) -> Result<(), ServiceError> {
        let req = Self::get_request(ctx)?;
        let app = &ctx.session().app;
        let info = self.groups.group(app, &req.group_id).await?;
        let members = self.groups.members(app, &req.group_id).await?;
        let resp = GroupGetResponse {
            id: info.id,
            name: info.name,
            avatar: info.avatar,
            introduction: info.introduction,
            owner: info.owner,
            members,
        };
        ctx.resp(Status::Success, &resp).await
    }

    fn member_request(ctx: &Context) -> Result<GroupMemberRequest, ServiceError> {
        let req: GroupMemberRequest = ctx.read_body()?;
        if req.group_id.is_empty() {
            return Err(ServiceError::InvalidRequest("group id is empty"));
        }
        if req.account.is_empty() {
            return Err(ServiceError::InvalidRequest("account is empty"));
        }
        Ok(req)
    }

    fn get_request(ctx: &Context) -> Result<GroupGetRequest, ServiceError> {
        let req: GroupGetRequest = ctx.read_body()?;
        if req.group_id.is_empty() {
            return Err(ServiceError::InvalidRequest("group id is empty"));
        }
        Ok(req)
    }
}

#[async_trait]
impl Handler for GroupHandler {
    async fn handle(&self, ctx: &Context) -> Result<(), ServiceError> {
        match ctx.command() {
            GROUP_CREATE => self.create(ctx).await,
            GROUP_JOIN => self.join(ctx).await,
            GROUP_QUIT => self.quit(ctx).await,
            GROUP_MEMBERS => self.members(ctx).await,
            GROUP_DETAIL => self.detail(ctx).await,
            other => Err(ServiceError::NotImplemented(other.to_owned())),
        }
    }
}

impl std::fmt::Debug for GroupHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHandler").finish_non_exhaustive()
    }
}
