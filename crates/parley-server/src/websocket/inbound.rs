//! Inbound frame dispatch: decode, persist, ack, and route one client frame.

use metrics::counter;
use tracing::{debug, instrument, warn};

use parley_core::wire::{self, Envelope};
use parley_core::{Channel, ConnectionId, ErrorCode, GroupId, OutboundFrame, Payload, UserId};
use parley_settings::PrivateRouting;

use crate::errors::ServerError;
use crate::hub::HubHandle;
use crate::metrics::{FRAMES_ERROR_TOTAL, FRAMES_IN_TOTAL};
use crate::server::Services;

/// Everything one session needs to act on its frames.
#[derive(Clone)]
pub struct SessionContext {
    /// Authenticated owner of the connection.
    pub user: UserId,
    /// This connection.
    pub conn: ConnectionId,
    /// Hub capability; replies go through it so they share the connection FIFO.
    pub hub: HubHandle,
    /// Collaborators.
    pub services: Services,
    /// Routing for the recipient copy of private messages.
    pub private_routing: PrivateRouting,
}

impl SessionContext {
    async fn reply(&self, payload: Payload) -> Result<(), ServerError> {
        self.hub.deliver_to_connection(self.conn.clone(), payload).await
    }

    async fn reply_error(&self, code: ErrorCode) -> Result<(), ServerError> {
        counter!(FRAMES_ERROR_TOTAL, "code" => code.as_str()).increment(1);
        self.reply(code.payload()).await
    }
}

/// Handle one inbound text frame.
///
/// Every outcome produces at least one frame for the sender: an ack, an
/// error, or both an ack and an echoed event. Only a stopped hub is
/// returned as an error; it ends the session.
#[instrument(skip_all, fields(user_id = %ctx.user, conn_id = %ctx.conn))]
pub async fn handle_frame(ctx: &SessionContext, raw: &str) -> Result<(), ServerError> {
    let envelope = match wire::decode(raw) {
        Ok(env) => env,
        Err(code) => {
            debug!(error = %code, len = raw.len(), "rejected frame");
            counter!(FRAMES_IN_TOTAL, "type" => "malformed").increment(1);
            return ctx.reply_error(code).await;
        }
    };

    match envelope {
        Envelope::Private { to, body, temp_id } => {
            counter!(FRAMES_IN_TOTAL, "type" => "private").increment(1);
            send_private(ctx, to, &body, temp_id).await
        }
        Envelope::Group {
            group_id,
            body,
            temp_id,
        } => {
            counter!(FRAMES_IN_TOTAL, "type" => "group").increment(1);
            send_group(ctx, group_id, &body, temp_id).await
        }
        Envelope::Unsupported { kind } => {
            counter!(FRAMES_IN_TOTAL, "type" => "unsupported").increment(1);
            debug!(kind = %kind, "unsupported frame type");
            ctx.reply_error(ErrorCode::UnsupportedType).await
        }
    }
}

async fn send_private(
    ctx: &SessionContext,
    to: UserId,
    body: &str,
    temp_id: String,
) -> Result<(), ServerError> {
    let msg = match ctx.services.store.send_private(&ctx.user, &to, body).await {
        Ok(msg) => msg,
        Err(e) => {
            warn!(recipient = %to, error = %e, "private send failed");
            return ctx.reply_error(ErrorCode::SendFailed).await;
        }
    };

    ctx.reply(OutboundFrame::private_ack(temp_id, &msg).encode())
        .await?;

    let event = OutboundFrame::private_event(&msg).encode();
    match ctx.private_routing {
        PrivateRouting::Local => ctx.hub.deliver_to_user(to, event.clone()).await?,
        PrivateRouting::Bridge => {
            let channel = Channel::private(&to);
            if let Err(e) = ctx.hub.publish_cross_instance(&channel, &event).await {
                warn!(channel = %channel, error = %e, "private publish failed");
            }
        }
    }

    ctx.reply(event).await
}

async fn send_group(
    ctx: &SessionContext,
    group: GroupId,
    body: &str,
    temp_id: String,
) -> Result<(), ServerError> {
    match ctx.services.membership.is_member(group, &ctx.user).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(group_id = %group, "sender is not a member");
            return ctx.reply_error(ErrorCode::NotAMember).await;
        }
        Err(e) => {
            warn!(group_id = %group, error = %e, "membership check failed");
            return ctx.reply_error(ErrorCode::NotAMember).await;
        }
    }

    let msg = match ctx.services.store.send_group(group, &ctx.user, body).await {
        Ok(msg) => msg,
        Err(e) => {
            warn!(group_id = %group, error = %e, "group send failed");
            return ctx.reply_error(ErrorCode::SendFailed).await;
        }
    };

    ctx.reply(OutboundFrame::group_ack(temp_id, &msg).encode())
        .await?;

    let from_email = match ctx.services.identity.display_name_of(&ctx.user).await {
        Ok(name) => name,
        Err(e) => {
            debug!(error = %e, "display name lookup failed; omitting");
            None
        }
    };

    let channel = Channel::group(group);
    let event = OutboundFrame::group_event(&msg, from_email).encode();
    if let Err(e) = ctx.hub.publish_cross_instance(&channel, &event).await {
        warn!(channel = %channel, error = %e, "group publish failed");
    }
    Ok(())
}
