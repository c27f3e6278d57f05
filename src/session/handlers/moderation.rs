use super::{ephemeral_embed, required_option};
use crate::error::{BotError, Result};
use crate::moderation::{parse_message_links, PunishRequest};
use crate::platform::{
    ActionRow, ButtonStyle, Choice, CommandOptionSpec, CommandSpec, Component, Embed, InteractionResponse,
    MessagePayload, OptionKind,
};
use crate::session::components::ComponentAction;
use crate::session::permissions::PermissionLevel;
use crate::session::router::{filter_choices, CommandContext, CommandHandler};
use crate::App;
use async_trait::async_trait;
use std::sync::Arc;

const RECORDS_LIMIT: usize = 10;

fn id_option(ctx: &CommandContext<'_>) -> Result<i64> {
    ctx.interaction
        .int_option("id")
        .filter(|id| *id > 0)
        .ok_or_else(|| BotError::InvalidInput("缺少有效的记录编号".to_string()))
}

pub struct Punish;

#[async_trait]
impl CommandHandler for Punish {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("punish", "对成员执行处罚")
            .option(CommandOptionSpec::new(OptionKind::User, "user", "处罚对象").required())
            .option(
                CommandOptionSpec::new(OptionKind::String, "action", "处罚类型")
                    .required()
                    .autocomplete(),
            )
            .option(CommandOptionSpec::new(OptionKind::String, "reason", "原因").required())
            .option(CommandOptionSpec::new(OptionKind::String, "evidence", "证据消息链接，可填多个"))
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    fn defers(&self) -> bool {
        true
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let req = PunishRequest {
            guild_id: ctx.guild_id.to_string(),
            channel_id: ctx.interaction.channel_id.clone(),
            admin_id: ctx.interaction.user_id.clone(),
            user_id: required_option(ctx, "user")?.to_string(),
            action_type: required_option(ctx, "action")?.to_string(),
            reason: required_option(ctx, "reason")?.to_string(),
            evidence_links: parse_message_links(ctx.interaction.str_option("evidence").unwrap_or_default()),
            interaction_id: ctx.interaction.id.clone(),
            now: ctx.now,
        };
        let outcome = app.moderation.apply(&req).await?;

        let mut embed = Embed::new()
            .title(format!("✅ 已处罚 · 记录 #{}", outcome.punishment_id))
            .color(0x57F287)
            .field("对象", format!("<@{}>", req.user_id), true)
            .field("等级", format!("第 {} 级", outcome.level + 1), true)
            .field("附加处罚", outcome.timeout.describe(), true);
        if !outcome.temp_roles.is_empty() {
            let roles: Vec<String> = outcome
                .temp_roles
                .iter()
                .map(|r| match outcome.roles_remove_at.get(r) {
                    Some(at) => format!("<@&{}> 至 <t:{}:f>", r, at),
                    None => format!("<@&{}> 永久", r),
                })
                .collect();
            embed = embed.field("添加身份组", roles.join("\n"), false);
        }
        if !outcome.dm_sent {
            embed = embed.footer("私信通知发送失败");
        }
        Ok(ephemeral_embed(embed))
    }

    async fn autocomplete(&self, app: &Arc<App>, ctx: &CommandContext<'_>, option: &str, value: &str) -> Result<Vec<Choice>> {
        if option != "action" {
            return Ok(Vec::new());
        }
        let snapshot = app.settings.get();
        let candidates = snapshot.action_types(ctx.guild_id).into_iter().map(|key| {
            let label = snapshot
                .action(ctx.guild_id, &key)
                .map(|a| a.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| key.clone());
            (label, key)
        });
        Ok(filter_choices(candidates, value))
    }
}

pub struct Revoke;

#[async_trait]
impl CommandHandler for Revoke {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("revoke", "撤销一条处罚记录").option(
            CommandOptionSpec::new(OptionKind::Integer, "id", "记录编号").required(),
        )
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    fn defers(&self) -> bool {
        true
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let outcome = app.moderation.revoke(ctx.guild_id, id_option(ctx)?).await?;
        let mut text = format!(
            "✅ 已撤销记录 #{}（<@{}>），移除身份组 {} 个。",
            outcome.punishment_id,
            outcome.user_id,
            outcome.roles_removed.len()
        );
        if outcome.recovery_granted {
            text.push_str("\n已发放恢复身份组。");
        }
        Ok(InteractionResponse::ephemeral(text))
    }
}

pub struct DeleteRecord;

#[async_trait]
impl CommandHandler for DeleteRecord {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("delete_record", "删除一条处罚记录（不恢复身份组）").option(
            CommandOptionSpec::new(OptionKind::Integer, "id", "记录编号").required(),
        )
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let id = id_option(ctx)?;
        let record = app
            .moderation
            .get_record(ctx.guild_id, id)
            .await?
            .filter(|r| r.guild_id == ctx.guild_id)
            .ok_or_else(|| BotError::NotFound(format!("处罚记录 #{}", id)))?;
        let embed = Embed::new()
            .title(format!("确认删除记录 #{}？", id))
            .description(format!(
                "对象：<@{}>\n类型：{}\n原因：{}\n时间：<t:{}:f>",
                record.user_id, record.action_type, record.reason, record.created_at
            ))
            .color(0xED4245);
        let payload = MessagePayload::embed(embed).with_row(ActionRow(vec![Component::button(
            ComponentAction::ConfirmDelete { punishment_id: id }.encode(),
            "确认删除",
            ButtonStyle::Danger,
        )]));
        Ok(InteractionResponse::Message {
            payload,
            ephemeral: true,
        })
    }
}

pub(crate) async fn confirm_delete(app: &Arc<App>, ctx: &CommandContext<'_>, punishment_id: i64) -> Result<InteractionResponse> {
    app.moderation.delete(ctx.guild_id, punishment_id).await?;
    Ok(InteractionResponse::ephemeral(format!("🗑️ 记录 #{} 已删除。", punishment_id)))
}

pub struct Records;

#[async_trait]
impl CommandHandler for Records {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("records", "查看成员的处罚记录")
            .option(CommandOptionSpec::new(OptionKind::User, "user", "成员").required())
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    fn defers(&self) -> bool {
        true
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let user_id = required_option(ctx, "user")?;
        let records = app.moderation.user_records(ctx.guild_id, user_id, RECORDS_LIMIT).await?;
        let lines: Vec<String> = records
            .iter()
            .map(|r| {
                format!(
                    "#{} · {} · {} · <t:{}:d> · {}",
                    r.punishment_id,
                    r.action_type,
                    r.status.as_str(),
                    r.created_at,
                    crate::text::ellipsize(&r.reason, 60)
                )
            })
            .collect();
        let description = if lines.is_empty() {
            "暂无处罚记录".to_string()
        } else {
            crate::text::safe_description(&lines, lines.len(), crate::config::EMBED_DESCRIPTION_BUDGET)
        };
        let summary = app.moderation.history_summary(ctx.guild_id, user_id).await?;
        Ok(ephemeral_embed(
            Embed::new()
                .title("📋 处罚记录")
                .description(description)
                .field("跨服务器概览", summary, false)
                .color(0x5865F2),
        ))
    }
}

