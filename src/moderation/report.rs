//! Punishment statistics embeds and the daily 24 h report.

use crate::db::{Database, StoreManager};
use crate::error::Result;
use crate::platform::message::{Embed, MessagePayload};
use crate::platform::{edit_or_send, PlatformClient};
use crate::settings::{ConfigSnapshot, ConfigStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const DAY: i64 = 86_400;
const STATS_COLOR: u32 = 0x5865F2;

/// Per-action counts of one guild over several windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildStats {
    pub guild_id: String,
    pub last_day: BTreeMap<String, i64>,
    pub last_week: BTreeMap<String, i64>,
    pub all_time: BTreeMap<String, i64>,
    pub active: i64,
}

impl GuildStats {
    pub fn load(db: &Database, guild_id: &str, now: i64) -> Result<Self> {
        Ok(GuildStats {
            guild_id: guild_id.to_string(),
            last_day: db.count_records_by_action(guild_id, Some(now - DAY))?.into_iter().collect(),
            last_week: db
                .count_records_by_action(guild_id, Some(now - 7 * DAY))?
                .into_iter()
                .collect(),
            all_time: db.count_records_by_action(guild_id, None)?.into_iter().collect(),
            active: db.count_active_records(guild_id)?,
        })
    }
}

fn action_label(snapshot: &ConfigSnapshot, guild_id: &str, action_type: &str) -> String {
    snapshot
        .action(guild_id, action_type)
        .map(|a| a.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| action_type.to_string())
}

fn guild_label(snapshot: &ConfigSnapshot, guild_id: &str) -> String {
    snapshot
        .guild_task(guild_id)
        .map(|t| t.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| guild_id.to_string())
}

fn counts_block(snapshot: &ConfigSnapshot, guild_id: &str, counts: &BTreeMap<String, i64>) -> String {
    if counts.is_empty() {
        return "无".to_string();
    }
    let total: i64 = counts.values().sum();
    let mut lines: Vec<String> = counts
        .iter()
        .map(|(action, n)| format!("{}：{}", action_label(snapshot, guild_id, action), n))
        .collect();
    lines.push(format!("合计：{}", total));
    lines.join("\n")
}

pub fn stats_embed(snapshot: &ConfigSnapshot, stats: &GuildStats, now: i64) -> Embed {
    Embed::new()
        .title(format!("📊 {} 处罚统计", guild_label(snapshot, &stats.guild_id)))
        .color(STATS_COLOR)
        .field("最近 24 小时", counts_block(snapshot, &stats.guild_id, &stats.last_day), true)
        .field("最近 7 天", counts_block(snapshot, &stats.guild_id, &stats.last_week), true)
        .field("全部", counts_block(snapshot, &stats.guild_id, &stats.all_time), true)
        .field("生效中", stats.active.to_string(), false)
        .footer("每小时自动更新")
        .timestamp(now)
}

pub fn daily_report_embed(snapshot: &ConfigSnapshot, stats: &[GuildStats], now: i64) -> Embed {
    let mut embed = Embed::new()
        .title("📋 24 小时处罚报告")
        .color(STATS_COLOR)
        .timestamp(now);
    if stats.is_empty() {
        return embed.description("没有配置任何服务器。");
    }
    for s in stats {
        embed = embed.field(
            guild_label(snapshot, &s.guild_id),
            counts_block(snapshot, &s.guild_id, &s.last_day),
            false,
        );
    }
    embed
}

pub struct StatsPublisher {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
}

impl StatsPublisher {
    pub fn new(platform: Arc<dyn PlatformClient>, stores: Arc<StoreManager>, config: Arc<ConfigStore>) -> Self {
        Self {
            platform,
            stores,
            config,
        }
    }

    async fn stats_for(&self, guild_id: &str, now: i64) -> Result<GuildStats> {
        let db = self.stores.guild(guild_id)?;
        let g = guild_id.to_string();
        db.run_blocking(move |db| GuildStats::load(db, &g, now)).await
    }

    /// Rebuilds every configured stats embed. Returns how many were published.
    pub async fn refresh(&self, now: i64) -> usize {
        let snapshot = self.config.get();
        let mut published = 0;
        for guild_id in snapshot.tasks.keys() {
            let db = match self.stores.guild(guild_id) {
                Ok(db) => db,
                Err(e) => {
                    warn!("Stats: store for {} unavailable: {}", guild_id, e);
                    continue;
                }
            };
            let channels = match db.run_blocking(|db| db.list_stats_channels()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Stats: listing channels of {} failed: {}", guild_id, e);
                    continue;
                }
            };
            for channel in channels {
                let target = if channel.target_guild_id.is_empty() {
                    channel.guild_id.clone()
                } else {
                    channel.target_guild_id.clone()
                };
                let stats = match self.stats_for(&target, now).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Stats: counting records of {} failed: {}", target, e);
                        continue;
                    }
                };
                let payload = MessagePayload::embed(stats_embed(&snapshot, &stats, now));
                match edit_or_send(
                    self.platform.as_ref(),
                    &channel.channel_id,
                    channel.message_id.as_deref(),
                    &payload,
                )
                .await
                {
                    Ok(id) => {
                        published += 1;
                        if channel.message_id.as_deref() != Some(id.as_str()) {
                            let ch = channel.channel_id.clone();
                            if let Err(e) = db.run_blocking(move |db| db.set_stats_message(&ch, &id)).await {
                                warn!("Stats: storing message id for {} failed: {}", channel.channel_id, e);
                            }
                        }
                    }
                    Err(e) => warn!("Stats: publishing to {} failed: {}", channel.channel_id, e),
                }
            }
        }
        info!("Stats: refreshed {} embed(s)", published);
        published
    }

    /// Sends the 24 h report for every configured guild to `log_channel_id`.
    pub async fn send_daily_report(&self, log_channel_id: &str, now: i64) -> Result<String> {
        let snapshot = self.config.get();
        let mut all = Vec::new();
        for guild_id in snapshot.tasks.keys() {
            match self.stats_for(guild_id, now).await {
                Ok(s) => all.push(s),
                Err(e) => warn!("Stats: daily report skipped {}: {}", guild_id, e),
            }
        }
        let payload = MessagePayload::embed(daily_report_embed(&snapshot, &all, now));
        let id = self.platform.send_message(log_channel_id, &payload).await?;
        info!("Stats: daily report sent for {} guild(s)", all.len());
        Ok(id)
    }
}
