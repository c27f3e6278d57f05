//! Interaction routing: commands by name, components by `custom_id` prefix,
//! autocomplete and modal submits.

use super::components::{self, ComponentAction};
use super::handlers;
use super::permissions::{self, PermissionLevel};
use crate::config::AUTOCOMPLETE_LIMIT;
use crate::error::{BotError, Result};
use crate::platform::{Choice, CommandSpec, Interaction, InteractionData, InteractionResponse, MessagePayload};
use crate::App;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a handler sees of the inbound interaction.
pub struct CommandContext<'a> {
    pub interaction: &'a Interaction,
    pub guild_id: &'a str,
    pub level: PermissionLevel,
    pub now: i64,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn spec(&self) -> CommandSpec;
    fn required(&self) -> PermissionLevel;
    /// Slow handlers are deferred ephemerally and their reply edited in later.
    fn defers(&self) -> bool {
        false
    }
    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse>;
    async fn autocomplete(&self, _app: &Arc<App>, _ctx: &CommandContext<'_>, _option: &str, _value: &str) -> Result<Vec<Choice>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(handler.spec().name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.handlers.values().map(|h| h.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Case-insensitive substring filter, capped at the platform's choice limit.
pub fn filter_choices<I>(candidates: I, query: &str) -> Vec<Choice>
where
    I: IntoIterator<Item = (String, String)>,
{
    let query = query.trim().to_lowercase();
    candidates
        .into_iter()
        .filter(|(name, _)| query.is_empty() || name.to_lowercase().contains(&query))
        .take(AUTOCOMPLETE_LIMIT)
        .map(|(name, value)| Choice {
            name: crate::text::truncate_chars(&name, 100),
            value,
        })
        .collect()
}

pub fn require(level: PermissionLevel, needed: PermissionLevel) -> Result<()> {
    if level < needed {
        return Err(BotError::PermissionDenied(format!("需要{}权限", needed.label())));
    }
    Ok(())
}

async fn permission_level(app: &App, guild_id: &str, interaction: &Interaction) -> PermissionLevel {
    let guild_config = match app.stores.guild(guild_id) {
        Ok(db) => {
            let g = guild_id.to_string();
            db.run_blocking(move |db| db.get_guild_config(&g)).await.ok().flatten()
        }
        Err(_) => None,
    };
    permissions::resolve(
        &app.config,
        guild_config.as_ref(),
        &interaction.user_id,
        &interaction.member_roles,
    )
}

/// Handles one inbound interaction end to end. Failures are reported back to
/// the invoking user and never propagate.
pub async fn handle_interaction(app: &Arc<App>, interaction: &Interaction) {
    let handle = interaction.handle();
    let Some(guild_id) = interaction.guild_id.as_deref() else {
        let reply = InteractionResponse::ephemeral("❌ 该功能仅限服务器内使用。");
        if let Err(e) = app.platform.respond_interaction(&handle, &reply).await {
            warn!("Session: responding to {} failed: {}", interaction.id, e);
        }
        return;
    };
    let ctx = CommandContext {
        interaction,
        guild_id,
        level: permission_level(app, guild_id, interaction).await,
        now: crate::now_epoch(),
    };

    let mut deferred = false;
    let result = dispatch(app, &ctx, &mut deferred).await;
    let outcome = match (result, deferred) {
        (Ok(response), false) => app.platform.respond_interaction(&handle, &response).await,
        (Ok(response), true) => {
            let payload = match response {
                InteractionResponse::Message { payload, .. } | InteractionResponse::UpdateMessage(payload) => payload,
                _ => MessagePayload::text("✅ 完成"),
            };
            app.platform.edit_interaction_response(&handle, &payload).await
        }
        (Err(e), was_deferred) => {
            debug!("Session: interaction {} failed: {}", interaction.id, e);
            if was_deferred {
                app.platform
                    .edit_interaction_response(&handle, &MessagePayload::text(e.user_message()))
                    .await
            } else {
                app.platform
                    .respond_interaction(&handle, &InteractionResponse::ephemeral(e.user_message()))
                    .await
            }
        }
    };
    if let Err(e) = outcome {
        warn!("Session: responding to {} failed: {}", interaction.id, e);
    }
}

async fn dispatch(app: &Arc<App>, ctx: &CommandContext<'_>, deferred: &mut bool) -> Result<InteractionResponse> {
    match &ctx.interaction.data {
        InteractionData::Command { name, .. } => {
            let handler = app
                .commands
                .get(name)
                .ok_or_else(|| BotError::NotFound(format!("命令 {}", name)))?;
            require(ctx.level, handler.required())?;
            if handler.defers() {
                app.platform.defer_interaction(&ctx.interaction.handle(), true).await?;
                *deferred = true;
            }
            handler.run(app, ctx).await
        }
        InteractionData::Autocomplete { name, focused, value } => {
            let Some(handler) = app.commands.get(name) else {
                return Ok(InteractionResponse::Autocomplete(Vec::new()));
            };
            if ctx.level < handler.required() {
                return Ok(InteractionResponse::Autocomplete(Vec::new()));
            }
            let mut choices = handler.autocomplete(app, ctx, focused, value).await?;
            choices.truncate(AUTOCOMPLETE_LIMIT);
            Ok(InteractionResponse::Autocomplete(choices))
        }
        InteractionData::Component { custom_id, values } => {
            let action = components::parse(custom_id)?;
            if matches!(action, ComponentAction::NavConfirm { .. } | ComponentAction::ConfirmDelete { .. }) {
                app.platform.defer_interaction(&ctx.interaction.handle(), true).await?;
                *deferred = true;
            }
            handlers::component(app, ctx, action, values).await
        }
        InteractionData::ModalSubmit { custom_id, fields } => {
            let parts: Vec<&str> = custom_id.split(':').collect();
            match parts.as_slice() {
                [handlers::content::PRESET_MODAL_PREFIX, "create"] => {
                    require(ctx.level, PermissionLevel::Admin)?;
                    handlers::content::submit_preset_modal(app, ctx, fields).await
                }
                _ => Err(BotError::InvalidInput(format!("未知表单 {}", custom_id))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_choices_is_case_insensitive_and_capped() {
        let names = (0..40).map(|i| (format!("Rule {}", i), format!("r{}", i)));
        let choices = filter_choices(names, "rule");
        assert_eq!(choices.len(), AUTOCOMPLETE_LIMIT);

        let names = vec![
            ("Welcome".to_string(), "w".to_string()),
            ("Rules".to_string(), "r".to_string()),
        ];
        let choices = filter_choices(names, "WEL");
        assert_eq!(choices, vec![Choice { name: "Welcome".into(), value: "w".into() }]);
    }

    #[test]
    fn test_require_orders_levels() {
        assert!(require(PermissionLevel::Admin, PermissionLevel::User).is_ok());
        let err = require(PermissionLevel::User, PermissionLevel::Admin).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);
    }
}
