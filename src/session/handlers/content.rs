//! Preset messages, card rolls and user preferences.

use super::ephemeral_embed;
use crate::db::{Preset, PresetKind, UserPreferences};
use crate::error::{BotError, Result};
use crate::platform::{
    ActionRow, ButtonStyle, Choice, CommandOptionSpec, CommandSpec, Component, Embed, InteractionResponse,
    MessagePayload, ModalSpec, OptionKind, TextInputSpec,
};
use crate::session::components::ComponentAction;
use crate::session::permissions::PermissionLevel;
use crate::session::router::{filter_choices, CommandContext, CommandHandler};
use crate::App;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub const PRESET_MODAL_PREFIX: &str = "preset_modal";
const BUTTONS_PER_ROW: usize = 5;
const MAX_ROWS: usize = 5;

/// Message body of a stored preset.
pub fn preset_payload(preset: &Preset) -> MessagePayload {
    match preset.kind {
        PresetKind::Text => MessagePayload::text(preset.value.clone()),
        PresetKind::Embed => MessagePayload::embed(
            Embed::new()
                .title(preset.name.clone())
                .description(preset.value.clone())
                .color(0x5865F2),
        ),
    }
}

async fn load_preset(app: &App, guild_id: &str, preset_id: &str) -> Result<Preset> {
    let db = app.stores.guild(guild_id)?;
    let id = preset_id.to_string();
    db.run_blocking(move |db| db.get_preset(&id))
        .await?
        .filter(|p| p.guild_id == guild_id)
        .ok_or_else(|| BotError::NotFound(format!("预设消息 {}", preset_id)))
}

/// Sends a preset into `channel_id` unless it was used anywhere in the last 30 s.
pub async fn send_preset(app: &App, preset: &Preset, channel_id: &str, reply_to: Option<&str>, now: i64) -> Result<String> {
    if let Err(left) = app.session.cooldowns.try_use(&preset.id, now) {
        return Err(BotError::InvalidInput(format!("该预设消息冷却中，请 {} 秒后再试", left)));
    }
    let mut payload = preset_payload(preset);
    if let Some(id) = reply_to.filter(|id| !id.is_empty()) {
        payload = payload.reply_to(id);
    }
    Ok(app.platform.send_message(channel_id, &payload).await?)
}

pub struct PresetCommand;

#[async_trait]
impl CommandHandler for PresetCommand {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("preset", "发送预设消息")
            .option(CommandOptionSpec::new(OptionKind::String, "name", "预设消息").autocomplete())
            .option(CommandOptionSpec::new(OptionKind::String, "message", "要回复的消息 ID"))
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let target = ctx.interaction.str_option("message").filter(|m| !m.trim().is_empty());
        match ctx.interaction.str_option("name").filter(|n| !n.trim().is_empty()) {
            Some(preset_id) => {
                let preset = load_preset(app, ctx.guild_id, preset_id).await?;
                send_preset(app, &preset, &ctx.interaction.channel_id, target, ctx.now).await?;
                Ok(InteractionResponse::ephemeral(format!("✅ 已发送预设消息「{}」", preset.name)))
            }
            None => {
                let target = target.ok_or_else(|| BotError::InvalidInput("请指定预设消息或要回复的消息".to_string()))?;
                quick_reply_menu(app, ctx.guild_id, target).await
            }
        }
    }

    async fn autocomplete(&self, app: &Arc<App>, ctx: &CommandContext<'_>, option: &str, value: &str) -> Result<Vec<Choice>> {
        if option != "name" {
            return Ok(Vec::new());
        }
        let db = app.stores.guild(ctx.guild_id)?;
        let g = ctx.guild_id.to_string();
        let presets = db.run_blocking(move |db| db.list_presets(&g)).await?;
        Ok(filter_choices(presets.into_iter().map(|p| (p.name, p.id)), value))
    }
}

/// One button per preset; pressing one replies to `message_id` with it.
async fn quick_reply_menu(app: &App, guild_id: &str, message_id: &str) -> Result<InteractionResponse> {
    let db = app.stores.guild(guild_id)?;
    let g = guild_id.to_string();
    let presets = db.run_blocking(move |db| db.list_presets(&g)).await?;
    if presets.is_empty() {
        return Err(BotError::NotFound("本服务器暂无预设消息".to_string()));
    }
    let buttons: Vec<Component> = presets
        .iter()
        .take(BUTTONS_PER_ROW * MAX_ROWS)
        .map(|p| {
            Component::button(
                ComponentAction::QuickPresetReply {
                    preset_id: p.id.clone(),
                    message_id: message_id.to_string(),
                }
                .encode(),
                crate::text::ellipsize(&p.name, 80),
                ButtonStyle::Secondary,
            )
        })
        .collect();
    let mut payload = MessagePayload::text("选择要回复的预设消息：");
    for row in buttons.chunks(BUTTONS_PER_ROW) {
        payload = payload.with_row(ActionRow(row.to_vec()));
    }
    Ok(InteractionResponse::Message {
        payload,
        ephemeral: true,
    })
}

pub(crate) async fn quick_reply(app: &Arc<App>, ctx: &CommandContext<'_>, preset_id: &str, message_id: &str) -> Result<InteractionResponse> {
    let preset = load_preset(app, ctx.guild_id, preset_id).await?;
    send_preset(app, &preset, &ctx.interaction.channel_id, Some(message_id), ctx.now).await?;
    Ok(InteractionResponse::UpdateMessage(MessagePayload::text(format!(
        "✅ 已回复预设消息「{}」",
        preset.name
    ))))
}

pub struct PresetCreate;

#[async_trait]
impl CommandHandler for PresetCreate {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("preset_create", "新建或覆盖预设消息")
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    async fn run(&self, _app: &Arc<App>, _ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let input = |id: &str, label: &str, long: bool, required: bool, value: Option<&str>| TextInputSpec {
            custom_id: id.to_string(),
            label: label.to_string(),
            long,
            required,
            value: value.map(|v| v.to_string()),
        };
        Ok(InteractionResponse::Modal(ModalSpec {
            custom_id: format!("{}:create", PRESET_MODAL_PREFIX),
            title: "新建预设消息".to_string(),
            inputs: vec![
                input("name", "名称", false, true, None),
                input("value", "内容", true, true, None),
                input("kind", "类型（text 或 embed）", false, false, Some("text")),
                input("description", "说明", false, false, None),
            ],
        }))
    }
}

/// Preset ids end up inside component ids, so they stay short and colon-free.
fn preset_id(guild_id: &str, name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .take(32)
        .collect();
    format!("{}-{}", guild_id, slug)
}

pub(crate) async fn submit_preset_modal(
    app: &Arc<App>,
    ctx: &CommandContext<'_>,
    fields: &HashMap<String, String>,
) -> Result<InteractionResponse> {
    let field = |name: &str| fields.get(name).map(|v| v.trim()).unwrap_or_default();
    let name = field("name");
    let value = field("value");
    if name.is_empty() || value.is_empty() {
        return Err(BotError::InvalidInput("名称和内容不能为空".to_string()));
    }
    let preset = Preset {
        id: preset_id(ctx.guild_id, name),
        guild_id: ctx.guild_id.to_string(),
        name: name.to_string(),
        value: value.to_string(),
        kind: PresetKind::parse(field("kind")),
        description: field("description").to_string(),
    };
    let db = app.stores.guild(ctx.guild_id)?;
    let stored = preset.clone();
    db.run_blocking(move |db| db.upsert_preset(&stored)).await?;
    info!("Preset: {} saved preset {} in guild {}", ctx.interaction.user_id, preset.id, ctx.guild_id);
    Ok(InteractionResponse::ephemeral(format!("✅ 预设消息「{}」已保存", preset.name)))
}

pub struct Roll;

#[async_trait]
impl CommandHandler for Roll {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("roll", "随机抽取一篇帖子")
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let payload = app.roller.roll(ctx.guild_id, &ctx.interaction.user_id).await?;
        Ok(InteractionResponse::Message {
            payload,
            ephemeral: false,
        })
    }
}

pub(crate) async fn roll_again(app: &Arc<App>, ctx: &CommandContext<'_>, owner_id: &str) -> Result<InteractionResponse> {
    if owner_id != ctx.interaction.user_id {
        return Err(BotError::PermissionDenied("只有抽卡者本人可以再抽一次".to_string()));
    }
    let payload = app.roller.roll(ctx.guild_id, owner_id).await?;
    Ok(InteractionResponse::UpdateMessage(payload))
}

pub struct Prefs;

#[async_trait]
impl CommandHandler for Prefs {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("prefs", "设置抽卡偏好")
            .option(CommandOptionSpec::new(OptionKind::String, "tag", "偏好标签 ID"))
            .option(CommandOptionSpec::new(OptionKind::String, "exclude", "排除的标签 ID，逗号分隔"))
            .option(CommandOptionSpec::new(OptionKind::Boolean, "clear", "清空偏好"))
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let mut prefs = app.roller.preferences(&ctx.interaction.user_id).await?;
        let clear = ctx.interaction.option("clear").and_then(|v| v.as_bool()).unwrap_or(false);
        if clear {
            prefs = UserPreferences {
                user_id: ctx.interaction.user_id.clone(),
                ..Default::default()
            };
        }
        if let Some(tag) = ctx.interaction.str_option("tag") {
            prefs.preferred_tag = Some(tag.trim().to_string()).filter(|t| !t.is_empty());
        }
        if let Some(raw) = ctx.interaction.str_option("exclude") {
            prefs.excluded_tags = raw
                .split(',')
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
                .collect();
        }
        app.roller.set_preferences(prefs.clone(), ctx.now).await?;

        let snapshot = app.settings.get();
        let name = |id: &str| snapshot.tag_name(ctx.guild_id, id).to_string();
        let excluded: Vec<String> = prefs.excluded_tags.iter().map(|t| name(t)).collect();
        Ok(ephemeral_embed(
            Embed::new()
                .title("🎲 抽卡偏好")
                .field("偏好标签", prefs.preferred_tag.as_deref().map(name).unwrap_or_else(|| "无".to_string()), true)
                .field(
                    "排除标签",
                    if excluded.is_empty() { "无".to_string() } else { excluded.join("、") },
                    true,
                )
                .color(0x5865F2),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_id_is_component_safe() {
        let id = preset_id("123", "规则 v2: 新人");
        assert_eq!(id, "123-规则-v2--新人");
        assert!(!id.contains(':'));
    }

    #[test]
    fn test_embed_preset_payload() {
        let preset = Preset {
            id: "p".into(),
            guild_id: "g".into(),
            name: "Rules".into(),
            value: "Be kind".into(),
            kind: PresetKind::Embed,
            description: String::new(),
        };
        let payload = preset_payload(&preset);
        assert!(payload.content.is_none());
        assert_eq!(payload.embeds[0].description.as_deref(), Some("Be kind"));
    }
}
