//! Removes posts whose thread no longer exists on the platform.

use crate::db::StoreManager;
use crate::platform::{PlatformClient, PlatformError};
use crate::settings::ConfigStore;
use crate::shutdown::Shutdown;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

pub const RECONCILE_WORKERS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub deleted: usize,
    pub errors: usize,
}

pub struct Reconciler {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn PlatformClient>, stores: Arc<StoreManager>, config: Arc<ConfigStore>) -> Self {
        Self {
            platform,
            stores,
            config,
        }
    }

    pub async fn run(&self, shutdown: &Shutdown) -> ReconcileSummary {
        let snapshot = self.config.get();
        let mut total = ReconcileSummary::default();

        for (guild_id, task) in &snapshot.tasks {
            let db = match self.stores.guild(guild_id) {
                Ok(db) => db,
                Err(e) => {
                    warn!("Reconcile: store for guild {} unavailable: {}", guild_id, e);
                    continue;
                }
            };
            for table in task.table_names() {
                if shutdown.is_cancelled() {
                    return total;
                }
                let t = table.clone();
                let ids = match db.run_blocking(move |db| db.post_ids(&t)).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!("Reconcile: reading {} failed: {}", table, e);
                        continue;
                    }
                };

                let probes: Vec<(String, Result<(), PlatformError>)> = stream::iter(ids)
                    .map(|id| async move {
                        if shutdown.is_cancelled() {
                            return (id, Ok(()));
                        }
                        let res = self.platform.get_thread(&id).await.map(|_| ());
                        (id, res)
                    })
                    .buffer_unordered(RECONCILE_WORKERS)
                    .collect()
                    .await;

                let mut gone = Vec::new();
                let mut summary = ReconcileSummary {
                    checked: probes.len(),
                    ..Default::default()
                };
                for (id, res) in probes {
                    match res {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => gone.push(id),
                        Err(e) => {
                            summary.errors += 1;
                            warn!("Reconcile: probing thread {} failed: {}", id, e);
                        }
                    }
                }

                if !gone.is_empty() {
                    let t = table.clone();
                    match db.run_blocking(move |db| db.delete_posts(&t, &gone)).await {
                        Ok(n) => summary.deleted = n,
                        Err(e) => warn!("Reconcile: deleting from {} failed: {}", table, e),
                    }
                }
                info!(
                    "Reconcile: {} checked {}, deleted {}, errors {}",
                    table, summary.checked, summary.deleted, summary.errors
                );
                total.checked += summary.checked;
                total.deleted += summary.deleted;
                total.errors += summary.errors;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Post;
    use crate::platform::fake::{starter, thread, FakePlatform};
    use crate::settings::{ConfigSnapshot, GuildTask, PartitionConfig};

    #[tokio::test]
    async fn test_transient_errors_keep_rows() {
        let mut task = GuildTask::default();
        task.data.insert(
            "p".into(),
            PartitionConfig {
                channel_id: "c1234".into(),
                thread_ids: vec![],
            },
        );
        let mut snapshot = ConfigSnapshot::default();
        snapshot.tasks.insert("g".into(), task);

        let fake = Arc::new(FakePlatform::new());
        fake.add_active_thread(thread("a", "g", "c1234", 1), starter("a", "u", ""));
        let stores = Arc::new(StoreManager::in_memory());
        let db = stores.guild("g").unwrap();
        db.ensure_post_table("p_1234").unwrap();
        for id in ["a", "b"] {
            db.insert_post(
                "p_1234",
                &Post {
                    id: id.into(),
                    created_at: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let reconciler = Reconciler::new(fake, stores, Arc::new(ConfigStore::from_snapshot(snapshot)));
        let summary = reconciler.run(&Shutdown::never()).await;
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(db.post_ids("p_1234").unwrap(), vec!["a"]);
    }
}
