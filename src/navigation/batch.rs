//! Scheduled refresh of every stored navigation slot.

use super::NavigationEngine;
use crate::db::{PersonalNavigation, StoreManager};
use crate::error::ErrorKind;
use crate::platform::message::Embed;
use crate::shutdown::Shutdown;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const BATCH_WORKERS: usize = 5;
pub const REQUEST_DELAY: Duration = Duration::from_millis(500);
const MAX_ERROR_EXCERPTS: usize = 5;
const EXCERPT_LEN: usize = 180;

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    pub fn embed(&self) -> Embed {
        let color = if self.failed == 0 { 0x57F287 } else { 0xFEE75C };
        let mut embed = Embed::new()
            .title("🧭 个人导航批量刷新完成")
            .color(color)
            .field("成功", self.success.to_string(), true)
            .field("失败", self.failed.to_string(), true)
            .field("跳过", self.skipped.to_string(), true)
            .field(
                "耗时",
                humantime::format_duration(Duration::from_secs(self.duration.as_secs())).to_string(),
                true,
            );
        if !self.errors.is_empty() {
            embed = embed.field("错误摘要", self.errors.join("\n"), false);
        }
        embed
    }
}

pub struct BatchRefresher {
    engine: Arc<NavigationEngine>,
    stores: Arc<StoreManager>,
    delay: Duration,
}

impl BatchRefresher {
    pub fn new(engine: Arc<NavigationEngine>, stores: Arc<StoreManager>) -> Self {
        Self {
            engine,
            stores,
            delay: REQUEST_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every stored slot of the given guilds.
    pub async fn load_all(&self, guild_ids: &[String]) -> Vec<PersonalNavigation> {
        let mut all = Vec::new();
        for guild_id in guild_ids {
            let db = match self.stores.guild(guild_id) {
                Ok(db) => db,
                Err(e) => {
                    warn!("Navigation batch: store for {} unavailable: {}", guild_id, e);
                    continue;
                }
            };
            match db.run_blocking(|db| db.all_navigations()).await {
                Ok(navs) => all.extend(navs),
                Err(e) => warn!("Navigation batch: listing slots of {} failed: {}", guild_id, e),
            }
        }
        all
    }

    pub async fn run(&self, navs: Vec<PersonalNavigation>, shutdown: &Shutdown) -> BatchSummary {
        let started = Instant::now();
        let delay = self.delay;
        let results: Vec<_> = stream::iter(navs)
            .map(|nav| async move {
                if shutdown.is_cancelled() {
                    return (nav, None);
                }
                let result = self.engine.update_scheduled(&nav).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (nav, Some(result))
            })
            .buffer_unordered(BATCH_WORKERS)
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for (nav, result) in results {
            match result {
                None => summary.skipped += 1,
                Some(Ok(_)) => summary.success += 1,
                Some(Err(e)) if e.kind() == ErrorKind::ArchivedThread => summary.skipped += 1,
                Some(Err(e)) => {
                    summary.failed += 1;
                    warn!("Navigation batch: slot {} of {} failed: {}", nav.slot, nav.user_id, e);
                    if summary.errors.len() < MAX_ERROR_EXCERPTS {
                        summary.errors.push(crate::text::ellipsize(
                            &format!("<@{}> 槽位 {}：{}", nav.user_id, nav.slot, e),
                            EXCERPT_LEN,
                        ));
                    }
                }
            }
        }
        summary.duration = started.elapsed();
        info!(
            "Navigation batch: {} success, {} failed, {} skipped in {}",
            summary.success,
            summary.failed,
            summary.skipped,
            humantime::format_duration(Duration::from_secs(summary.duration.as_secs()))
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UpdateMode;
    use crate::navigation::tests::setup;
    use crate::navigation::NavigationRequest;
    use crate::platform::ThreadInfo;

    #[tokio::test]
    async fn test_archived_counts_as_skipped_and_missing_as_failed() {
        let (fake, engine, stores) = setup(2);
        fake.add_channel(ThreadInfo {
            id: "archived-thread".into(),
            archived: true,
            is_thread: true,
            ..Default::default()
        });
        let engine = Arc::new(engine);
        for (slot, channel) in [(1, "nav-channel"), (2, "archived-thread"), (3, "missing")] {
            let nav = engine
                .create(&NavigationRequest {
                    user_id: "u".into(),
                    user_name: "Ann".into(),
                    guild_id: "g".into(),
                    slot,
                    table_names: vec!["art_5678".into()],
                    message_channel_id: channel.into(),
                    update_mode: UpdateMode::Edit,
                })
                .await
                .unwrap();
            assert_eq!(nav.slot, slot);
        }

        let refresher = BatchRefresher::new(engine, stores).with_delay(Duration::ZERO);
        let navs = refresher.load_all(&["g".to_string()]).await;
        assert_eq!(navs.len(), 3);
        let summary = refresher.run(navs, &Shutdown::never()).await;
        assert_eq!((summary.success, summary.skipped, summary.failed), (1, 1, 1));
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.embed().fields.len(), 5);
    }
}
