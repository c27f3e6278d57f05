//! Most-replied posts, published into each configured top channel.

use crate::db::{LeaderboardAd, SourcedPost, StoreManager, TimedTask, TopChannel};
use crate::error::Result;
use crate::platform::message::{Embed, MessagePayload};
use crate::platform::{channel_url, edit_or_send, PlatformClient};
use crate::settings::ConfigStore;
use crate::text::{ellipsize, escape_link_label, safe_description};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TASK_KIND: &str = "leaderboard";
pub const REFRESH_WORKERS: usize = 5;
const DEFAULT_LIMIT: usize = 10;
const COLOR: u32 = 0xFEE75C;
const AD_COLOR: u32 = 0x99AAB5;

pub fn leaderboard_payload(guild_id: &str, guild_name: &str, posts: &[SourcedPost], ad: Option<&LeaderboardAd>) -> MessagePayload {
    let lines: Vec<String> = posts
        .iter()
        .enumerate()
        .map(|(i, sp)| {
            let medal = match i {
                0 => "🥇".to_string(),
                1 => "🥈".to_string(),
                2 => "🥉".to_string(),
                _ => format!("{}.", i + 1),
            };
            format!(
                "{} [{}]({}) · 💬 {} · {}",
                medal,
                escape_link_label(&ellipsize(&sp.post.title, 60)),
                channel_url(guild_id, &sp.post.id),
                sp.post.message_count,
                if sp.post.author_id.is_empty() {
                    sp.post.author_name.clone()
                } else {
                    format!("<@{}>", sp.post.author_id)
                }
            )
        })
        .collect();
    let description = if lines.is_empty() {
        "暂无帖子".to_string()
    } else {
        safe_description(&lines, posts.len(), crate::config::EMBED_DESCRIPTION_BUDGET)
    };
    let mut payload = MessagePayload::embed(
        Embed::new()
            .title(format!("🏆 {} 热门帖子排行", guild_name))
            .description(description)
            .color(COLOR),
    );
    if let Some(ad) = ad {
        let mut embed = Embed::new().description(ad.content.clone()).color(AD_COLOR);
        if let Some(url) = ad.image_url.as_deref().filter(|u| !u.is_empty()) {
            embed = embed.image(url);
        }
        payload = payload.with_embed(embed);
    }
    payload
}

pub struct Leaderboard {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
}

impl Leaderboard {
    pub fn new(platform: Arc<dyn PlatformClient>, stores: Arc<StoreManager>, config: Arc<ConfigStore>) -> Self {
        Self {
            platform,
            stores,
            config,
        }
    }

    /// Refreshes every top channel of every guild. Returns how many succeeded.
    pub async fn refresh_all(&self, now: i64) -> usize {
        let snapshot = self.config.get();
        let mut targets: Vec<TopChannel> = Vec::new();
        for guild_id in snapshot.tasks.keys() {
            let db = match self.stores.guild(guild_id) {
                Ok(db) => db,
                Err(e) => {
                    warn!("Leaderboard: store for {} unavailable: {}", guild_id, e);
                    continue;
                }
            };
            let g = guild_id.clone();
            match db.run_blocking(move |db| db.list_top_channels(&g)).await {
                Ok(channels) => targets.extend(channels),
                Err(e) => warn!("Leaderboard: listing top channels of {} failed: {}", guild_id, e),
            }
        }

        let total = targets.len();
        let ok = stream::iter(targets)
            .map(|channel| async move {
                match self.refresh_channel(&channel, now).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Leaderboard: refresh of {} failed: {}", channel.channel_id, e);
                        false
                    }
                }
            })
            .buffer_unordered(REFRESH_WORKERS)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;
        info!("Leaderboard: refreshed {}/{} channel(s)", ok, total);
        ok
    }

    /// Publishes one leaderboard and returns the message id holding it.
    pub async fn refresh_channel(&self, channel: &TopChannel, now: i64) -> Result<String> {
        let snapshot = self.config.get();
        let guild_id = channel.guild_id.clone();
        let guild_name = snapshot
            .guild_task(&guild_id)
            .map(|t| t.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| guild_id.clone());
        let tables = snapshot.ranking_tables(&guild_id);
        let limit = if channel.message_limit > 0 {
            channel.message_limit as usize
        } else {
            DEFAULT_LIMIT
        };

        let db = self.stores.guild(&guild_id)?;
        let (g, c, excluded) = (guild_id.clone(), channel.channel_id.clone(), channel.excluded_ids.clone());
        let (posts, ad, task) = db
            .run_blocking(move |db| {
                Ok((
                    db.top_posts(&tables, limit, &excluded)?,
                    db.random_enabled_ad(&g)?,
                    db.get_timed_task(TASK_KIND, &c)?,
                ))
            })
            .await?;

        let payload = leaderboard_payload(&guild_id, &guild_name, &posts, ad.as_ref());
        let previous = task.as_ref().and_then(|t| t.message_id.clone());
        let id = edit_or_send(self.platform.as_ref(), &channel.channel_id, previous.as_deref(), &payload).await?;

        if previous.as_deref() != Some(id.as_str()) {
            debug!("Leaderboard: {} now lives in message {}", channel.channel_id, id);
        }
        let record = TimedTask {
            kind: TASK_KIND.to_string(),
            key: channel.channel_id.clone(),
            channel_id: channel.channel_id.clone(),
            message_id: Some(id.clone()),
        };
        db.run_blocking(move |db| db.upsert_timed_task(&record, now)).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Post;
    use crate::platform::fake::FakePlatform;
    use crate::settings::{ConfigSnapshot, GuildTask, PartitionConfig};

    fn setup() -> (Arc<FakePlatform>, Leaderboard, Arc<StoreManager>) {
        let mut task = GuildTask {
            name: "Forum".into(),
            ..Default::default()
        };
        task.data.insert(
            "art".into(),
            PartitionConfig {
                channel_id: "c0042".into(),
                thread_ids: vec![],
            },
        );
        let mut snapshot = ConfigSnapshot::default();
        snapshot.tasks.insert("g".into(), task);

        let stores = Arc::new(StoreManager::in_memory());
        let db = stores.guild("g").unwrap();
        db.ensure_post_table("art_0042").unwrap();
        for (id, replies) in [("a", 5), ("b", 50), ("c", 20)] {
            db.insert_post(
                "art_0042",
                &Post {
                    id: id.into(),
                    title: format!("post {}", id),
                    message_count: replies,
                    created_at: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        }
        db.upsert_top_channel(&TopChannel {
            channel_id: "top".into(),
            guild_id: "g".into(),
            message_limit: 2,
            excluded_ids: vec!["b".into()],
        })
        .unwrap();
        let fake = Arc::new(FakePlatform::new());
        let lb = Leaderboard::new(fake.clone(), stores.clone(), Arc::new(ConfigStore::from_snapshot(snapshot)));
        (fake, lb, stores)
    }

    #[tokio::test]
    async fn test_refresh_excludes_and_limits() {
        let (fake, lb, stores) = setup();
        stores.guild("g").unwrap().add_ad("g", "buy art", None).unwrap();
        assert_eq!(lb.refresh_all(100).await, 1);

        let sent = fake.sent_to("top");
        assert_eq!(sent.len(), 1);
        let board = sent[0].payload.embeds[0].description.clone().unwrap();
        assert!(board.starts_with("🥇 [post c]"));
        assert!(board.contains("post a"));
        assert!(!board.contains("post b"));
        assert_eq!(sent[0].payload.embeds[1].description.as_deref(), Some("buy art"));
    }

    #[tokio::test]
    async fn test_refresh_edits_then_resends_when_gone() {
        let (fake, lb, stores) = setup();
        let first = lb.refresh_all(100).await;
        assert_eq!(first, 1);
        assert_eq!(lb.refresh_all(200).await, 1);
        assert_eq!(fake.sent_to("top").len(), 1);
        assert_eq!(fake.edits().len(), 1);

        let id = fake.sent_to("top")[0].message_id.clone();
        crate::platform::delete_if_present(fake.as_ref(), "top", &id).await.unwrap();
        lb.refresh_all(300).await;
        assert_eq!(fake.sent_to("top").len(), 2);
        let task = stores.guild("g").unwrap().get_timed_task(TASK_KIND, "top").unwrap().unwrap();
        assert_eq!(task.message_id, Some(fake.sent_to("top")[1].message_id.clone()));
    }
}
