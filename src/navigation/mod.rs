//! Personal navigation: up to three self-maintained indexes of a user's own
//! posts, each rendered as several messages in a channel of their choice.

use crate::db::navigation::MAX_SLOTS;
use crate::db::{PersonalNavigation, StoreManager, UpdateMode};
use crate::error::{BotError, Result};
use crate::platform::message::{Embed, MessagePayload};
use crate::platform::{delete_if_present, edit_or_send, PlatformClient};
use crate::settings::ConfigStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod batch;
pub mod render;

pub use batch::{BatchRefresher, BatchSummary};
pub use render::{render, PartitionWorks, RenderedNavigation};

/// Parameters of a new (or overriding) slot.
#[derive(Debug, Clone)]
pub struct NavigationRequest {
    pub user_id: String,
    pub user_name: String,
    pub guild_id: String,
    pub slot: u8,
    pub table_names: Vec<String>,
    pub message_channel_id: String,
    pub update_mode: UpdateMode,
}

pub struct NavigationEngine {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
}

impl NavigationEngine {
    pub fn new(platform: Arc<dyn PlatformClient>, stores: Arc<StoreManager>, config: Arc<ConfigStore>) -> Self {
        Self {
            platform,
            stores,
            config,
        }
    }

    /// Partitions of the guild as `(table, display name, channel id)`.
    pub fn partitions(&self, guild_id: &str) -> Vec<(String, String, String)> {
        self.config
            .get()
            .guild_task(guild_id)
            .map(|task| {
                task.data
                    .iter()
                    .map(|(name, p)| {
                        (
                            crate::db::posts::partition_table(name, &p.channel_id),
                            name.clone(),
                            p.channel_id.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn slots(&self, user_id: &str, guild_id: &str) -> Result<Vec<PersonalNavigation>> {
        let db = self.stores.guild(guild_id)?;
        let (u, g) = (user_id.to_string(), guild_id.to_string());
        db.run_blocking(move |db| db.user_navigations(&u, &g)).await
    }

    async fn collect_works(&self, nav: &PersonalNavigation) -> Result<Vec<PartitionWorks>> {
        let db = self.stores.guild(&nav.guild_id)?;
        let tables = nav.table_names.clone();
        let names = nav.channel_names.clone();
        let author = nav.user_id.clone();
        db.run_blocking(move |db| {
            let mut out = Vec::new();
            for (i, table) in tables.iter().enumerate() {
                out.push(PartitionWorks {
                    name: names.get(i).cloned().unwrap_or_else(|| table.clone()),
                    posts: db.posts_by_author(table, &author)?,
                });
            }
            Ok(out)
        })
        .await
    }

    /// Creates slot `req.slot`, replacing whatever occupied it.
    pub async fn create(&self, req: &NavigationRequest) -> Result<PersonalNavigation> {
        if req.slot < 1 || req.slot > MAX_SLOTS {
            return Err(BotError::InvalidInput(format!("槽位必须在 1 到 {} 之间", MAX_SLOTS)));
        }
        if req.table_names.is_empty() {
            return Err(BotError::InvalidInput("至少需要选择一个分区".to_string()));
        }

        let known = self.partitions(&req.guild_id);
        let mut channel_ids = Vec::new();
        let mut channel_names = Vec::new();
        for table in &req.table_names {
            let (_, name, channel) = known
                .iter()
                .find(|(t, _, _)| t == table)
                .ok_or_else(|| BotError::InvalidInput(format!("未知分区 {}", table)))?;
            channel_names.push(name.clone());
            channel_ids.push(channel.clone());
        }

        let db = self.stores.guild(&req.guild_id)?;
        let (u, g, slot) = (req.user_id.clone(), req.guild_id.clone(), req.slot);
        if let Some(old) = db
            .run_blocking(move |db| db.get_navigation(&u, &g, slot))
            .await?
        {
            info!("Navigation: overriding slot {} of {}", old.slot, old.user_id);
            self.remove_messages(&old).await;
        }

        let mut nav = PersonalNavigation {
            id: 0,
            user_id: req.user_id.clone(),
            guild_id: req.guild_id.clone(),
            slot: req.slot,
            table_names: req.table_names.clone(),
            channel_ids,
            channel_names,
            message_channel_id: req.message_channel_id.clone(),
            my_works_message_ids: Vec::new(),
            top_works_message_id: String::new(),
            latest_works_message_id: String::new(),
            update_mode: req.update_mode,
        };
        let rendered = render(&nav.guild_id, &req.user_name, &self.collect_works(&nav).await?);
        if let Err(e) = self.publish(&mut nav, &rendered).await {
            // Nothing is stored yet, so whatever was sent would be unreachable.
            self.remove_messages(&nav).await;
            return Err(e);
        }

        let stored = nav.clone();
        nav.id = db.run_blocking(move |db| db.upsert_navigation(&stored)).await?;
        info!(
            "Navigation: slot {} of {} created with {} page(s)",
            nav.slot,
            nav.user_id,
            nav.my_works_message_ids.len()
        );
        Ok(nav)
    }

    /// Re-renders `nav` and applies its update mode.
    pub async fn update(&self, nav: &PersonalNavigation, owner_name: &str) -> Result<PersonalNavigation> {
        let rendered = render(&nav.guild_id, owner_name, &self.collect_works(nav).await?);
        let mut next = nav.clone();
        let published = self.publish(&mut next, &rendered).await;

        // Partial results are stored too so the next refresh reuses them.
        let db = self.stores.guild(&nav.guild_id)?;
        let (id, my, top, latest) = (
            next.id,
            next.my_works_message_ids.clone(),
            next.top_works_message_id.clone(),
            next.latest_works_message_id.clone(),
        );
        db.run_blocking(move |db| db.update_navigation_messages(id, &my, &top, &latest))
            .await?;
        published?;
        debug!("Navigation: slot {} of {} refreshed", next.slot, next.user_id);
        Ok(next)
    }

    /// Refresh used by the batch runner. Refuses archived threads with
    /// [`BotError::ArchivedThread`] so they count as skipped.
    pub async fn update_scheduled(&self, nav: &PersonalNavigation) -> Result<PersonalNavigation> {
        let channel = self.platform.get_thread(&nav.message_channel_id).await?;
        if channel.archived {
            return Err(BotError::ArchivedThread(nav.message_channel_id.clone()));
        }
        let owner = match self.platform.get_member(&nav.guild_id, &nav.user_id).await {
            Ok(m) if !m.display_name.is_empty() => m.display_name,
            _ => format!("<@{}>", nav.user_id),
        };
        self.update(nav, &owner).await
    }

    /// Deletes the slot and its messages.
    pub async fn delete(&self, user_id: &str, guild_id: &str, slot: u8) -> Result<()> {
        let db = self.stores.guild(guild_id)?;
        let (u, g) = (user_id.to_string(), guild_id.to_string());
        let nav = db
            .run_blocking(move |db| db.get_navigation(&u, &g, slot))
            .await?
            .ok_or_else(|| BotError::NotFound(format!("导航槽位 {}", slot)))?;
        self.remove_messages(&nav).await;
        let (u, g) = (user_id.to_string(), guild_id.to_string());
        db.run_blocking(move |db| db.delete_navigation(&u, &g, slot))
            .await?;
        info!("Navigation: slot {} of {} deleted", slot, user_id);
        Ok(())
    }

    async fn remove_messages(&self, nav: &PersonalNavigation) {
        let ids = nav
            .my_works_message_ids
            .iter()
            .chain([&nav.top_works_message_id, &nav.latest_works_message_id])
            .filter(|id| !id.is_empty());
        for id in ids {
            if let Err(e) = delete_if_present(self.platform.as_ref(), &nav.message_channel_id, id).await {
                warn!("Navigation: deleting message {} failed: {}", id, e);
            }
        }
    }

    async fn put(&self, channel_id: &str, existing: Option<&str>, embed: &Embed, mode: UpdateMode) -> Result<String> {
        let payload = MessagePayload::embed(embed.clone());
        let existing = existing.filter(|id| !id.is_empty());
        match mode {
            UpdateMode::Edit => Ok(edit_or_send(self.platform.as_ref(), channel_id, existing, &payload).await?),
            UpdateMode::Delete => {
                if let Some(id) = existing {
                    delete_if_present(self.platform.as_ref(), channel_id, id).await?;
                }
                Ok(self.platform.send_message(channel_id, &payload).await?)
            }
        }
    }

    /// Writes `rendered` into the slot's messages and records the new ids.
    /// On error `nav` still holds every id written so far; pages not reached
    /// keep their previous ids.
    async fn publish(&self, nav: &mut PersonalNavigation, rendered: &RenderedNavigation) -> Result<()> {
        let channel = nav.message_channel_id.clone();
        let mode = nav.update_mode;
        let previous = nav.my_works_message_ids.clone();

        for (i, embed) in rendered.my_works.iter().enumerate() {
            let id = self
                .put(&channel, previous.get(i).map(|s| s.as_str()), embed, mode)
                .await?;
            match nav.my_works_message_ids.get_mut(i) {
                Some(slot) => *slot = id,
                None => nav.my_works_message_ids.push(id),
            }
        }
        nav.top_works_message_id = self
            .put(&channel, Some(nav.top_works_message_id.as_str()), &rendered.top_works, mode)
            .await?;
        nav.latest_works_message_id = self
            .put(&channel, Some(nav.latest_works_message_id.as_str()), &rendered.latest_works, mode)
            .await?;

        let stale: Vec<String> = previous
            .iter()
            .skip(rendered.my_works.len())
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();
        nav.my_works_message_ids.truncate(rendered.my_works.len());
        if !stale.is_empty() {
            if let Err(e) = self.platform.bulk_delete_messages(&channel, &stale).await {
                warn!("Navigation: removing {} stale page(s) failed: {}", stale.len(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Post;
    use crate::platform::fake::FakePlatform;
    use crate::settings::{ConfigSnapshot, GuildTask, PartitionConfig};

    pub(crate) fn setup(posts: usize) -> (Arc<FakePlatform>, NavigationEngine, Arc<StoreManager>) {
        let mut task = GuildTask::default();
        task.data.insert(
            "art".into(),
            PartitionConfig {
                channel_id: "c5678".into(),
                thread_ids: vec![],
            },
        );
        let mut snapshot = ConfigSnapshot::default();
        snapshot.tasks.insert("g".into(), task);

        let stores = Arc::new(StoreManager::in_memory());
        let db = stores.guild("g").unwrap();
        db.ensure_post_table("art_5678").unwrap();
        for i in 0..posts {
            db.insert_post(
                "art_5678",
                &Post {
                    id: format!("p{}", i),
                    title: format!("work {}", i),
                    author_id: "u".into(),
                    created_at: 1000 + i as i64,
                    ..Default::default()
                },
            )
            .unwrap();
        }
        let fake = Arc::new(FakePlatform::new());
        fake.add_channel(crate::platform::ThreadInfo {
            id: "nav-channel".into(),
            ..Default::default()
        });
        let engine = NavigationEngine::new(fake.clone(), stores.clone(), Arc::new(ConfigStore::from_snapshot(snapshot)));
        (fake, engine, stores)
    }

    fn request(mode: UpdateMode) -> NavigationRequest {
        NavigationRequest {
            user_id: "u".into(),
            user_name: "Ann".into(),
            guild_id: "g".into(),
            slot: 1,
            table_names: vec!["art_5678".into()],
            message_channel_id: "nav-channel".into(),
            update_mode: mode,
        }
    }

    #[tokio::test]
    async fn test_create_sends_all_pages() {
        let (fake, engine, _stores) = setup(3);
        let nav = engine.create(&request(UpdateMode::Edit)).await.unwrap();
        assert_eq!(nav.my_works_message_ids.len(), 1);
        assert_eq!(nav.channel_names, vec!["art"]);
        assert_eq!(fake.sent_to("nav-channel").len(), 3);
        assert!(nav.id > 0);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (_fake, engine, _stores) = setup(0);
        let mut req = request(UpdateMode::Edit);
        req.slot = 4;
        assert!(engine.create(&req).await.is_err());
        let mut req = request(UpdateMode::Edit);
        req.table_names.clear();
        assert!(engine.create(&req).await.is_err());
        let mut req = request(UpdateMode::Edit);
        req.table_names = vec!["nope_0000".into()];
        assert!(engine.create(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_refresh_reuses_ids_with_identical_payloads() {
        let (fake, engine, _stores) = setup(5);
        let nav = engine.create(&request(UpdateMode::Edit)).await.unwrap();
        let again = engine.update(&nav, "Ann").await.unwrap();
        assert_eq!(again.my_works_message_ids, nav.my_works_message_ids);
        assert_eq!(again.top_works_message_id, nav.top_works_message_id);
        let sent = fake.sent_to("nav-channel");
        assert_eq!(sent.len(), 3);
        for edit in fake.edits() {
            let original = sent.iter().find(|s| s.message_id == edit.message_id).unwrap();
            assert_eq!(original.payload, edit.payload);
        }
    }

    #[tokio::test]
    async fn test_delete_mode_always_yields_fresh_ids() {
        let (fake, engine, _stores) = setup(2);
        let nav = engine.create(&request(UpdateMode::Delete)).await.unwrap();
        let again = engine.update(&nav, "Ann").await.unwrap();
        assert_ne!(again.my_works_message_ids, nav.my_works_message_ids);
        assert_ne!(again.top_works_message_id, nav.top_works_message_id);
        assert_eq!(fake.deletes().len(), 3);
        assert!(fake.edits().is_empty());
    }

    #[tokio::test]
    async fn test_shrinking_removes_stale_pages() {
        let (fake, engine, stores) = setup(25);
        let nav = engine.create(&request(UpdateMode::Edit)).await.unwrap();
        assert_eq!(nav.my_works_message_ids.len(), 2);

        let removed: Vec<String> = (0..6).map(|i| format!("p{}", i)).collect();
        stores.guild("g").unwrap().delete_posts("art_5678", &removed).unwrap();
        let again = engine.update(&nav, "Ann").await.unwrap();
        assert_eq!(again.my_works_message_ids, vec![nav.my_works_message_ids[0].clone()]);
        assert!(fake
            .deletes()
            .contains(&("nav-channel".to_string(), nav.my_works_message_ids[1].clone())));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_resent_pages() {
        use crate::platform::PlatformClient;
        let (fake, engine, _stores) = setup(25);
        let nav = engine.create(&request(UpdateMode::Edit)).await.unwrap();
        let (m1, m2) = (nav.my_works_message_ids[0].clone(), nav.my_works_message_ids[1].clone());
        fake.delete_message("nav-channel", &m1).await.unwrap();
        fake.delete_message("nav-channel", &m2).await.unwrap();

        fake.fail_sends_after(1);
        assert!(engine.update(&nav, "Ann").await.is_err());
        let stored = engine.slots("u", "g").await.unwrap().remove(0);
        let m5 = stored.my_works_message_ids[0].clone();
        assert_ne!(m5, m1);
        assert_eq!(stored.my_works_message_ids[1], m2);
        assert_eq!(stored.top_works_message_id, nav.top_works_message_id);

        fake.clear_send_failures();
        let healed = engine.update(&stored, "Ann").await.unwrap();
        assert_eq!(healed.my_works_message_ids[0], m5);
        // four from create, then one page per refresh
        assert_eq!(fake.sent_to("nav-channel").len(), 6);
        for id in healed.my_works_message_ids.iter().chain([&healed.top_works_message_id]) {
            assert!(fake.live_payload(id).is_some());
        }
    }

    #[tokio::test]
    async fn test_failed_create_removes_sent_pages() {
        let (fake, engine, _stores) = setup(3);
        fake.fail_sends_after(1);
        assert!(engine.create(&request(UpdateMode::Edit)).await.is_err());
        let sent = fake.sent_to("nav-channel");
        assert_eq!(sent.len(), 1);
        assert!(fake.live_payload(&sent[0].message_id).is_none());
        assert!(engine.slots("u", "g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_slot_removes_messages() {
        let (fake, engine, _stores) = setup(1);
        engine.create(&request(UpdateMode::Edit)).await.unwrap();
        engine.delete("u", "g", 1).await.unwrap();
        assert_eq!(fake.deletes().len(), 3);
        assert!(engine.slots("u", "g").await.unwrap().is_empty());
        assert!(engine.delete("u", "g", 1).await.unwrap_err().is_not_found());
    }
}
