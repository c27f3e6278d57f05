use super::{ephemeral_embed, slot_option};
use crate::db::navigation::MAX_SLOTS;
use crate::db::UpdateMode;
use crate::error::{BotError, Result};
use crate::navigation::NavigationRequest;
use crate::platform::{
    ActionRow, ButtonStyle, CommandOptionSpec, CommandSpec, Component, Embed, InteractionResponse, MessagePayload,
    OptionKind, SelectOption,
};
use crate::session::components::ComponentAction;
use crate::session::permissions::PermissionLevel;
use crate::session::router::{CommandContext, CommandHandler};
use crate::session::state::NavSelection;
use crate::App;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Select menus hold at most this many options.
const MAX_MENU_OPTIONS: usize = 25;

fn slot_spec(required: bool) -> CommandOptionSpec {
    let spec = CommandOptionSpec::new(OptionKind::Integer, "slot", "导航槽位（1-3）")
        .choice("1", "1")
        .choice("2", "2")
        .choice("3", "3");
    if required {
        spec.required()
    } else {
        spec
    }
}

pub struct Nav;

#[async_trait]
impl CommandHandler for Nav {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("nav", "创建或覆盖个人作品导航")
            .option(slot_spec(true))
            .option(
                CommandOptionSpec::new(OptionKind::String, "mode", "更新方式")
                    .choice("编辑原消息", "edit")
                    .choice("删除后重发", "delete"),
            )
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let slot = slot_option(ctx)?.ok_or_else(|| BotError::InvalidInput("缺少槽位".to_string()))?;
        let mode = match ctx.interaction.str_option("mode") {
            None => UpdateMode::Edit,
            Some(raw) => UpdateMode::parse(raw).ok_or_else(|| BotError::InvalidInput(format!("未知更新方式 {}", raw)))?,
        };
        let partitions = app.navigation.partitions(ctx.guild_id);
        if partitions.is_empty() {
            return Err(BotError::NotFound("本服务器未配置任何分区".to_string()));
        }
        let options: Vec<SelectOption> = partitions
            .into_iter()
            .take(MAX_MENU_OPTIONS)
            .map(|(table, name, _)| SelectOption::new(name, table))
            .collect();
        let max_values = options.len() as u8;
        let payload = MessagePayload::embed(
            Embed::new()
                .title(format!("🧭 设置导航槽位 {}", slot))
                .description("请选择要收录的分区，导航将发布在当前频道。")
                .color(0x5865F2),
        )
        .with_row(ActionRow(vec![Component::Select {
            custom_id: ComponentAction::NavSelect { slot, mode }.encode(),
            placeholder: "选择分区".to_string(),
            options,
            min_values: 1,
            max_values,
        }]));
        Ok(InteractionResponse::Message {
            payload,
            ephemeral: true,
        })
    }
}

/// Remembers the picked partitions under the menu's message id and asks for
/// confirmation.
pub(crate) fn select(
    app: &Arc<App>,
    ctx: &CommandContext<'_>,
    slot: u8,
    mode: UpdateMode,
    values: &[String],
) -> Result<InteractionResponse> {
    if values.is_empty() {
        return Err(BotError::InvalidInput("至少需要选择一个分区".to_string()));
    }
    let message_id = ctx
        .interaction
        .message_id
        .as_deref()
        .ok_or_else(|| BotError::InvalidInput("缺少菜单消息".to_string()))?;
    app.session.selections.put(
        message_id,
        NavSelection {
            user_id: ctx.interaction.user_id.clone(),
            slot,
            update_mode: mode,
            table_names: values.to_vec(),
        },
    );

    let known = app.navigation.partitions(ctx.guild_id);
    let names: Vec<String> = values
        .iter()
        .map(|v| {
            known
                .iter()
                .find(|(t, _, _)| t == v)
                .map(|(_, n, _)| n.clone())
                .unwrap_or_else(|| v.clone())
        })
        .collect();
    let payload = MessagePayload::embed(
        Embed::new()
            .title(format!("🧭 确认导航槽位 {}", slot))
            .description(format!("分区：{}\n更新方式：{}", names.join("、"), mode.as_str()))
            .color(0x5865F2),
    )
    .with_row(ActionRow(vec![
        Component::button(ComponentAction::NavConfirm { slot }.encode(), "确认创建", ButtonStyle::Success),
        Component::button(ComponentAction::NavCancel { slot }.encode(), "取消", ButtonStyle::Secondary),
    ]));
    Ok(InteractionResponse::UpdateMessage(payload))
}

pub(crate) async fn confirm(app: &Arc<App>, ctx: &CommandContext<'_>, slot: u8) -> Result<InteractionResponse> {
    let message_id = ctx.interaction.message_id.as_deref().unwrap_or_default();
    let selection = app
        .session
        .selections
        .get(message_id)
        .filter(|s| s.slot == slot)
        .ok_or_else(|| BotError::InvalidInput("选择已过期，请重新执行 /nav".to_string()))?;
    if selection.user_id != ctx.interaction.user_id {
        return Err(BotError::PermissionDenied("只能确认自己的导航".to_string()));
    }
    app.session.selections.take(message_id);

    let nav = app
        .navigation
        .create(&NavigationRequest {
            user_id: ctx.interaction.user_id.clone(),
            user_name: ctx.interaction.user_name.clone(),
            guild_id: ctx.guild_id.to_string(),
            slot,
            table_names: selection.table_names,
            message_channel_id: ctx.interaction.channel_id.clone(),
            update_mode: selection.update_mode,
        })
        .await?;
    info!("Navigation: {} created slot {} in {}", nav.user_id, nav.slot, nav.message_channel_id);
    Ok(InteractionResponse::ephemeral(format!(
        "✅ 导航槽位 {} 已创建，共 {} 页作品列表。",
        nav.slot,
        nav.my_works_message_ids.len()
    )))
}

pub(crate) fn cancel(app: &Arc<App>, ctx: &CommandContext<'_>, slot: u8) -> Result<InteractionResponse> {
    if let Some(message_id) = ctx.interaction.message_id.as_deref() {
        app.session.selections.take(message_id);
    }
    Ok(InteractionResponse::UpdateMessage(MessagePayload::text(format!(
        "已取消槽位 {} 的设置。",
        slot
    ))))
}

pub struct NavRefresh;

#[async_trait]
impl CommandHandler for NavRefresh {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("nav_refresh", "刷新个人作品导航").option(slot_spec(false))
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    fn defers(&self) -> bool {
        true
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let only = slot_option(ctx)?;
        let slots: Vec<_> = app
            .navigation
            .slots(&ctx.interaction.user_id, ctx.guild_id)
            .await?
            .into_iter()
            .filter(|n| only.map_or(true, |s| n.slot == s))
            .collect();
        if slots.is_empty() {
            return Err(BotError::NotFound("导航槽位".to_string()));
        }

        let mut lines = Vec::new();
        for nav in &slots {
            match app.navigation.update(nav, &ctx.interaction.user_name).await {
                Ok(updated) => lines.push(format!("✅ 槽位 {}：{} 页", updated.slot, updated.my_works_message_ids.len())),
                Err(e) => lines.push(format!("❌ 槽位 {}：{}", nav.slot, e.user_message())),
            }
        }
        Ok(ephemeral_embed(
            Embed::new().title("🧭 导航刷新结果").description(lines.join("\n")).color(0x57F287),
        ))
    }
}

pub struct NavDelete;

#[async_trait]
impl CommandHandler for NavDelete {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("nav_delete", "删除个人作品导航").option(slot_spec(true))
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    fn defers(&self) -> bool {
        true
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let slot = slot_option(ctx)?.ok_or_else(|| BotError::InvalidInput(format!("槽位必须在 1 到 {} 之间", MAX_SLOTS)))?;
        app.navigation.delete(&ctx.interaction.user_id, ctx.guild_id, slot).await?;
        Ok(InteractionResponse::ephemeral(format!("🗑️ 导航槽位 {} 已删除。", slot)))
    }
}
