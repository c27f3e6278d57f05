//! Slash-command handlers and the component actions they spawn.

use super::components::ComponentAction;
use super::router::{require, CommandContext, CommandRegistry};
use super::permissions::PermissionLevel;
use crate::error::{BotError, Result};
use crate::platform::{Embed, InteractionResponse, MessagePayload};
use crate::App;
use std::sync::Arc;

pub mod admin;
pub mod content;
pub mod moderation;
pub mod navigation;

/// Every command the bot registers in a guild.
pub fn registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(moderation::Punish));
    registry.register(Arc::new(moderation::Revoke));
    registry.register(Arc::new(moderation::DeleteRecord));
    registry.register(Arc::new(moderation::Records));
    registry.register(Arc::new(navigation::Nav));
    registry.register(Arc::new(navigation::NavRefresh));
    registry.register(Arc::new(navigation::NavDelete));
    registry.register(Arc::new(content::PresetCommand));
    registry.register(Arc::new(content::PresetCreate));
    registry.register(Arc::new(content::Roll));
    registry.register(Arc::new(content::Prefs));
    registry.register(Arc::new(admin::ReloadConfig));
    registry.register(Arc::new(admin::Scan));
    registry.register(Arc::new(admin::NavRefreshAll));
    registry
}

pub(crate) fn ephemeral_embed(embed: Embed) -> InteractionResponse {
    InteractionResponse::Message {
        payload: MessagePayload::embed(embed),
        ephemeral: true,
    }
}

pub(crate) fn required_option<'a>(ctx: &'a CommandContext<'_>, name: &str) -> Result<&'a str> {
    ctx.interaction
        .str_option(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BotError::InvalidInput(format!("缺少参数 {}", name)))
}

pub(crate) fn slot_option(ctx: &CommandContext<'_>) -> Result<Option<u8>> {
    match ctx.interaction.int_option("slot") {
        None => Ok(None),
        Some(n) if (1..=crate::db::navigation::MAX_SLOTS as i64).contains(&n) => Ok(Some(n as u8)),
        Some(n) => Err(BotError::InvalidInput(format!("槽位 {} 超出范围", n))),
    }
}

/// Routes a parsed component id to its action.
pub async fn component(
    app: &Arc<App>,
    ctx: &CommandContext<'_>,
    action: ComponentAction,
    values: &[String],
) -> Result<InteractionResponse> {
    match action {
        ComponentAction::RollAgain { user_id } => content::roll_again(app, ctx, &user_id).await,
        ComponentAction::QuickPresetReply { preset_id, message_id } => {
            require(ctx.level, PermissionLevel::User)?;
            content::quick_reply(app, ctx, &preset_id, &message_id).await
        }
        ComponentAction::NavSelect { slot, mode } => {
            require(ctx.level, PermissionLevel::User)?;
            navigation::select(app, ctx, slot, mode, values)
        }
        ComponentAction::NavConfirm { slot } => navigation::confirm(app, ctx, slot).await,
        ComponentAction::NavCancel { slot } => navigation::cancel(app, ctx, slot),
        ComponentAction::ConfirmDelete { punishment_id } => {
            require(ctx.level, PermissionLevel::Admin)?;
            moderation::confirm_delete(app, ctx, punishment_id).await
        }
    }
}
