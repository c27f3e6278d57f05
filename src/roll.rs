//! Random post draws from a guild's card pool.

use crate::db::{Database, SourcedPost, StoreManager, UserPreferences};
use crate::error::{BotError, Result};
use crate::platform::message::{ActionRow, ButtonStyle, Component, Embed, MessagePayload};
use crate::platform::channel_url;
use crate::settings::{ConfigSnapshot, ConfigStore};
use crate::text::{ellipsize, truncate_chars};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const ROLL_AGAIN_PREFIX: &str = "roll_again";
const CARD_COLOR: u32 = 0x5865F2;
const PREVIEW_LEN: usize = 300;

pub fn roll_again_id(user_id: &str) -> String {
    format!("{}:{}", ROLL_AGAIN_PREFIX, user_id)
}

/// Card-pool tables of a guild and their display names.
fn pool_tables(snapshot: &ConfigSnapshot, guild_id: &str) -> Vec<(String, String)> {
    match snapshot.roll_cards.get(guild_id).filter(|r| !r.tables.is_empty()) {
        Some(pool) => pool.tables.iter().map(|(t, n)| (t.clone(), n.clone())).collect(),
        None => snapshot
            .guild_task(guild_id)
            .map(|task| {
                task.data
                    .keys()
                    .cloned()
                    .zip(task.table_names())
                    .map(|(name, table)| (table, name))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

pub fn card_payload(snapshot: &ConfigSnapshot, guild_id: &str, user_id: &str, drawn: &SourcedPost, pool_name: &str) -> MessagePayload {
    let post = &drawn.post;
    let tags: Vec<&str> = post
        .tag_ids()
        .into_iter()
        .map(|id| snapshot.tag_name(guild_id, id))
        .collect();

    let mut embed = Embed::new()
        .title(ellipsize(&post.title, 200))
        .url(channel_url(guild_id, &post.id))
        .color(CARD_COLOR)
        .field("作者", if post.author_id.is_empty() { post.author_name.clone() } else { format!("<@{}>", post.author_id) }, true)
        .field("分区", pool_name, true)
        .field("回复", post.message_count.to_string(), true)
        .timestamp(post.created_at);
    if !post.content.is_empty() {
        embed = embed.description(truncate_chars(&post.content, PREVIEW_LEN));
    }
    if !tags.is_empty() {
        embed = embed.field("标签", tags.join(" · "), false);
    }
    if let Some(url) = post.cover_image_url.as_deref().filter(|u| !u.is_empty()) {
        embed = embed.image(url);
    }

    MessagePayload::embed(embed).with_row(ActionRow(vec![Component::button(
        roll_again_id(user_id),
        "🎲 再抽一次",
        ButtonStyle::Primary,
    )]))
}

pub struct CardRoller {
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
}

impl CardRoller {
    pub fn new(stores: Arc<StoreManager>, config: Arc<ConfigStore>) -> Self {
        Self { stores, config }
    }

    fn pool_store(&self, snapshot: &ConfigSnapshot, guild_id: &str) -> Result<Database> {
        match snapshot
            .roll_cards
            .get(guild_id)
            .and_then(|r| r.database.as_deref())
            .filter(|p| !p.is_empty())
        {
            Some(path) => self.stores.open_external(Path::new(path)),
            None => self.stores.guild(guild_id),
        }
    }

    pub async fn preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let user = user_id.to_string();
        self.stores.user()?.run_blocking(move |db| db.get_preferences(&user)).await
    }

    pub async fn set_preferences(&self, prefs: UserPreferences, now: i64) -> Result<()> {
        self.stores
            .user()?
            .run_blocking(move |db| db.set_preferences(&prefs, now))
            .await
    }

    /// Draws one card for `user_id` and renders it.
    pub async fn roll(&self, guild_id: &str, user_id: &str) -> Result<MessagePayload> {
        let snapshot = self.config.get();
        let pool = pool_tables(&snapshot, guild_id);
        if pool.is_empty() {
            return Err(BotError::NotFound("本服务器未配置卡池".to_string()));
        }
        let prefs = self.preferences(user_id).await?;
        let db = self.pool_store(&snapshot, guild_id)?;

        let tables: Vec<String> = pool.iter().map(|(t, _)| t.clone()).collect();
        let drawn = db
            .run_blocking(move |db| {
                db.random_posts(&tables, 1, prefs.preferred_tag.as_deref(), &prefs.excluded_tags)
            })
            .await?;
        let card = drawn
            .into_iter()
            .next()
            .ok_or_else(|| BotError::NotFound("符合条件的帖子".to_string()))?;
        debug!("Roll: {} drew {} from {}", user_id, card.post.id, card.table);

        let pool_name = pool
            .iter()
            .find(|(t, _)| *t == card.table)
            .map(|(_, n)| n.as_str())
            .unwrap_or(card.table.as_str());
        Ok(card_payload(&snapshot, guild_id, user_id, &card, pool_name))
    }
}
