//! Operator commands: config reload, manual scans and batch navigation refresh.

use crate::error::{BotError, Result};
use crate::platform::{CommandOptionSpec, CommandSpec, InteractionResponse, MessagePayload, OptionKind};
use crate::scanner::ScanMode;
use crate::session::permissions::PermissionLevel;
use crate::session::router::{CommandContext, CommandHandler};
use crate::App;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause between per-guild command registrations.
pub const REGISTRATION_THROTTLE: Duration = Duration::from_secs(1);

/// Registers the command set in every enabled guild. Returns how many
/// guilds accepted it.
pub async fn register_commands(app: &App, throttle: Duration) -> usize {
    let specs = app.commands.specs();
    let guilds = app.enabled_guilds().await;
    let mut ok = 0;
    for (i, guild_id) in guilds.iter().enumerate() {
        if i > 0 && !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }
        if app.shutdown.is_cancelled() {
            break;
        }
        match app.platform.register_guild_commands(guild_id, &specs).await {
            Ok(()) => ok += 1,
            Err(e) => warn!("Commands: registration in {} failed: {}", guild_id, e),
        }
    }
    info!("Commands: registered {} command(s) in {}/{} guild(s)", specs.len(), ok, guilds.len());
    ok
}

pub struct ReloadConfig;

#[async_trait]
impl CommandHandler for ReloadConfig {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("reload_config", "重新加载配置文件")
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::SuperAdmin
    }

    fn defers(&self) -> bool {
        true
    }

    async fn run(&self, app: &Arc<App>, _ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let snapshot = app.settings.reload().map_err(|e| {
            error!("Config: reload failed: {:#}", e);
            BotError::Config(e.to_string())
        })?;
        app.tasks.spawn({
            let app = app.clone();
            async move {
                register_commands(&app, REGISTRATION_THROTTLE).await;
            }
        });
        Ok(InteractionResponse::ephemeral(format!(
            "✅ 配置已重新加载：{} 个服务器任务，{} 个处罚配置。命令正在后台重新注册。",
            snapshot.tasks.len(),
            snapshot.moderation.len()
        )))
    }
}

pub struct Scan;

#[async_trait]
impl CommandHandler for Scan {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("scan", "手动触发帖子扫描")
            .option(
                CommandOptionSpec::new(OptionKind::String, "mode", "扫描模式")
                    .choice("活跃帖子", "active")
                    .choice("全量", "full"),
            )
            .option(CommandOptionSpec::new(OptionKind::String, "guild", "仅扫描该服务器 ID"))
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Developer
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let mode = match ctx.interaction.str_option("mode") {
            None => ScanMode::Active,
            Some(raw) => ScanMode::parse(raw).ok_or_else(|| BotError::InvalidInput(format!("未知扫描模式 {}", raw)))?,
        };
        let target = ctx
            .interaction
            .str_option("guild")
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());
        let channel_id = ctx.interaction.channel_id.clone();
        let worker = app.clone();
        app.tasks.spawn(async move {
            let app = worker;
            let summary = app.scanner.scan(mode, target.as_deref(), &app.shutdown).await;
            let text = format!(
                "🔍 {} 扫描完成：新增 {} 篇，处理 {} 个帖子，失败 {} 个，用时 {}",
                mode.as_str(),
                summary.total_new_posts,
                summary.threads_processed,
                summary.failed_threads,
                humantime::format_duration(Duration::from_secs(summary.duration.as_secs()))
            );
            if let Err(e) = app.platform.send_message(&channel_id, &MessagePayload::text(text)).await {
                warn!("Scan: reporting result to {} failed: {}", channel_id, e);
            }
        });
        Ok(InteractionResponse::ephemeral(format!("⏳ 已开始 {} 扫描", mode.as_str())))
    }
}

pub struct NavRefreshAll;

#[async_trait]
impl CommandHandler for NavRefreshAll {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new("nav_refresh_all", "批量刷新所有个人导航")
    }

    fn required(&self) -> PermissionLevel {
        PermissionLevel::Developer
    }

    async fn run(&self, app: &Arc<App>, ctx: &CommandContext<'_>) -> Result<InteractionResponse> {
        let channel_id = ctx.interaction.channel_id.clone();
        let worker = app.clone();
        app.tasks.spawn(async move {
            let app = worker;
            let guilds: Vec<String> = app.settings.get().tasks.keys().cloned().collect();
            let navs = app.nav_batch.load_all(&guilds).await;
            let summary = app.nav_batch.run(navs, &app.shutdown).await;
            let payload = MessagePayload::embed(summary.embed());
            if let Err(e) = app.platform.send_message(&channel_id, &payload).await {
                warn!("Navigation batch: reporting result to {} failed: {}", channel_id, e);
            }
        });
        Ok(InteractionResponse::ephemeral("⏳ 已开始批量刷新个人导航"))
    }
}
