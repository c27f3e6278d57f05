//! Forum crawler. `active` visits open threads only; `full` also pages
//! through archived threads. Inserts are upserts, so rerunning is safe.

use crate::db::{Database, Post, StoreManager};
use crate::error::Result;
use crate::platform::{PlatformClient, ThreadInfo};
use crate::settings::{ConfigStore, GuildTask};
use crate::shutdown::Shutdown;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod lock;
pub mod new_posts;
pub mod post;

pub use lock::{ScanLock, ScanLockFile};
pub use new_posts::NewPostLog;
pub use post::build_post;

/// Partitions processed concurrently per guild.
pub const MAX_CONCURRENT_PARTITIONS: usize = 45;
/// Upper bound on concurrent thread fetches within one partition.
pub const MAX_THREAD_CHUNK: usize = 16;
pub const ARCHIVE_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Active,
    Full,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Active => "active",
            ScanMode::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ScanMode::Active),
            "full" => Some(ScanMode::Full),
            _ => None,
        }
    }
}

/// Thread chunk size given how many partitions are still queued.
pub fn chunk_size(remaining_partitions: usize) -> usize {
    let size = match remaining_partitions {
        0..=3 => 16,
        4..=5 => 12,
        6..=10 => 8,
        _ => 4,
    };
    size.min(MAX_THREAD_CHUNK)
}

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub total_new_posts: usize,
    pub partitions_scanned: usize,
    pub threads_processed: usize,
    pub failed_threads: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

impl ScanSummary {
    fn absorb(&mut self, other: &PartitionOutcome) {
        self.total_new_posts += other.new_posts;
        self.threads_processed += other.processed;
        self.failed_threads += other.failed;
        if other.completed {
            self.partitions_scanned += 1;
        }
    }
}

#[derive(Debug, Default)]
struct PartitionOutcome {
    new_posts: usize,
    processed: usize,
    failed: usize,
    completed: bool,
}

struct PartitionJob {
    guild_id: String,
    name: String,
    channel_id: String,
    table: String,
    seeds: Vec<String>,
    remaining: usize,
}

pub struct Scanner {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
    lock: ScanLockFile,
    new_posts: Arc<NewPostLog>,
}

impl Scanner {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        stores: Arc<StoreManager>,
        config: Arc<ConfigStore>,
        lock: ScanLockFile,
        new_posts: Arc<NewPostLog>,
    ) -> Self {
        Self {
            platform,
            stores,
            config,
            lock,
            new_posts,
        }
    }

    pub fn lock_file(&self) -> &ScanLockFile {
        &self.lock
    }

    /// Scans every configured guild, or only `target_guild`. Never fails as a
    /// whole; per-unit failures are logged and counted.
    pub async fn scan(&self, mode: ScanMode, target_guild: Option<&str>, shutdown: &Shutdown) -> ScanSummary {
        let started = Instant::now();
        let snapshot = self.config.get();
        let mut summary = ScanSummary::default();

        info!("Scan: starting {} scan", mode.as_str());
        for (guild_id, task) in &snapshot.tasks {
            if shutdown.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if target_guild.is_some_and(|g| g != guild_id) {
                continue;
            }
            match self.scan_guild(mode, guild_id, task, shutdown).await {
                Ok(outcome) => {
                    summary.total_new_posts += outcome.total_new_posts;
                    summary.partitions_scanned += outcome.partitions_scanned;
                    summary.threads_processed += outcome.threads_processed;
                    summary.failed_threads += outcome.failed_threads;
                    summary.cancelled |= outcome.cancelled;
                }
                Err(e) => warn!("Scan: guild {} skipped: {}", guild_id, e),
            }
        }
        summary.cancelled |= shutdown.is_cancelled();
        summary.duration = started.elapsed();

        if summary.cancelled {
            info!("Scan: {} scan cancelled after {} partition(s)", mode.as_str(), summary.partitions_scanned);
        } else {
            if let Err(e) = self.lock.record_scan(mode, chrono::Utc::now().timestamp()) {
                warn!("Scan: failed to update scan lock: {}", e);
            }
            info!(
                "Scan: {} scan finished in {}: {} new post(s), {} partition(s), {} thread(s), {} failure(s)",
                mode.as_str(),
                humantime::format_duration(Duration::from_secs(summary.duration.as_secs())),
                summary.total_new_posts,
                summary.partitions_scanned,
                summary.threads_processed,
                summary.failed_threads
            );
        }
        summary
    }

    async fn scan_guild(
        &self,
        mode: ScanMode,
        guild_id: &str,
        task: &GuildTask,
        shutdown: &Shutdown,
    ) -> Result<ScanSummary> {
        let db = self.stores.guild(guild_id)?;
        let gid = guild_id.to_string();
        let config = db.run_blocking(move |db| db.get_guild_config(&gid)).await?;
        if config.is_some_and(|c| !c.enabled) {
            debug!("Scan: guild {} disabled, skipping", guild_id);
            return Ok(ScanSummary::default());
        }

        let total = task.data.len();
        let jobs: Vec<PartitionJob> = task
            .data
            .iter()
            .enumerate()
            .map(|(i, (name, p))| PartitionJob {
                guild_id: guild_id.to_string(),
                name: name.clone(),
                channel_id: p.channel_id.clone(),
                table: crate::db::posts::partition_table(name, &p.channel_id),
                seeds: p.thread_ids.clone(),
                remaining: total - i,
            })
            .collect();

        let outcomes: Vec<PartitionOutcome> = stream::iter(jobs)
            .map(|job| {
                let db = db.clone();
                async move {
                    if shutdown.is_cancelled() {
                        return PartitionOutcome::default();
                    }
                    self.scan_partition(mode, &db, job, shutdown).await
                }
            })
            .buffer_unordered(MAX_CONCURRENT_PARTITIONS)
            .collect()
            .await;

        let mut summary = ScanSummary::default();
        for outcome in &outcomes {
            summary.absorb(outcome);
        }
        summary.cancelled = shutdown.is_cancelled();
        info!(
            "Scan: guild {} ({}): {} new post(s) across {} partition(s)",
            guild_id, task.name, summary.total_new_posts, summary.partitions_scanned
        );
        Ok(summary)
    }

    async fn scan_partition(
        &self,
        mode: ScanMode,
        db: &Database,
        job: PartitionJob,
        shutdown: &Shutdown,
    ) -> PartitionOutcome {
        let mut outcome = PartitionOutcome::default();
        let table = job.table.clone();

        let known = match mode {
            ScanMode::Active => {
                let t = table.clone();
                db.run_blocking(move |db| {
                    db.ensure_post_table(&t)?;
                    db.post_ids(&t)
                })
                .await
            }
            ScanMode::Full => {
                let t = table.clone();
                db.run_blocking(move |db| db.ensure_post_table(&t))
                    .await
                    .map(|_| job.seeds.clone())
            }
        };
        let existing = match known {
            Ok(ids) => RwLock::new(ids.into_iter().collect::<HashSet<String>>()),
            Err(e) => {
                warn!("Scan: partition {} unavailable: {}", table, e);
                return outcome;
            }
        };
        let chunk = chunk_size(job.remaining);

        if shutdown.is_cancelled() {
            return outcome;
        }
        match self.platform.list_active_threads(&job.channel_id).await {
            Ok(threads) => {
                self.process_threads(mode, db, &job, &threads, chunk, &existing, shutdown, &mut outcome)
                    .await
            }
            Err(e) => warn!("Scan: listing active threads of {} failed: {}", job.channel_id, e),
        }

        if mode == ScanMode::Full {
            let mut before: Option<i64> = None;
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                let page = match self
                    .platform
                    .list_archived_threads(&job.channel_id, before, ARCHIVE_PAGE_SIZE)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Scan: archive page of {} failed, stopping partition: {}", job.channel_id, e);
                        break;
                    }
                };
                if page.threads.is_empty() {
                    break;
                }
                self.process_threads(mode, db, &job, &page.threads, chunk, &existing, shutdown, &mut outcome)
                    .await;
                if !page.has_more {
                    break;
                }
                let cursor = page
                    .threads
                    .iter()
                    .map(|t| t.archive_timestamp.unwrap_or(t.created_at))
                    .min();
                match (cursor, before) {
                    (Some(c), Some(b)) if c >= b => break,
                    (None, _) => break,
                    (c, _) => before = c,
                }
            }
        }

        outcome.completed = !shutdown.is_cancelled();
        debug!(
            "Scan: partition {} ({}) done: {} new, {} processed",
            job.name, table, outcome.new_posts, outcome.processed
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_threads(
        &self,
        mode: ScanMode,
        db: &Database,
        job: &PartitionJob,
        threads: &[ThreadInfo],
        chunk: usize,
        existing: &RwLock<HashSet<String>>,
        shutdown: &Shutdown,
        outcome: &mut PartitionOutcome,
    ) {
        for batch in threads.chunks(chunk.max(1)) {
            if shutdown.is_cancelled() {
                return;
            }
            let results = futures::future::join_all(
                batch
                    .iter()
                    .map(|t| self.process_thread(mode, db, job, t, existing)),
            )
            .await;
            for (thread, result) in batch.iter().zip(results) {
                outcome.processed += 1;
                match result {
                    Ok(true) => outcome.new_posts += 1,
                    Ok(false) => {}
                    Err(e) => {
                        outcome.failed += 1;
                        warn!("Scan: thread {} in {} skipped: {}", thread.id, job.table, e);
                    }
                }
            }
        }
    }

    /// Returns whether the thread was previously unknown.
    async fn process_thread(
        &self,
        mode: ScanMode,
        db: &Database,
        job: &PartitionJob,
        thread: &ThreadInfo,
        existing: &RwLock<HashSet<String>>,
    ) -> Result<bool> {
        let known = existing.read().await.contains(&thread.id);

        if known && mode == ScanMode::Active {
            let (t, id, title, tags, count) = (
                job.table.clone(),
                thread.id.clone(),
                thread.name.clone(),
                thread.tags.join(","),
                thread.message_count,
            );
            db.run_blocking(move |db| db.update_post_metadata(&t, &id, &title, &tags, count))
                .await?;
            return Ok(false);
        }

        let first = self.platform.get_first_message(&thread.id).await?;
        let post = build_post(thread, &job.channel_id, &first);
        let t = job.table.clone();
        let stored = post.clone();
        db.run_blocking(move |db| db.insert_post(&t, &stored)).await?;

        let is_new = existing.write().await.insert(thread.id.clone());
        if is_new {
            self.log_new_post(&job.guild_id, &post);
        }
        Ok(is_new && !known)
    }

    fn log_new_post(&self, guild_id: &str, post: &Post) {
        let now = chrono::Utc::now().timestamp();
        if post.created_at < now - new_posts::RETENTION_SECS {
            return;
        }
        if let Err(e) = self.new_posts.append(guild_id, post) {
            warn!("Scan: failed to log new post {}: {}", post.id, e);
        }
    }

    /// Indexes a freshly created thread if its parent is a configured partition.
    pub async fn index_thread(&self, thread: &ThreadInfo) -> Result<Option<Post>> {
        let snapshot = self.config.get();
        let Some(task) = snapshot.guild_task(&thread.guild_id) else {
            return Ok(None);
        };
        let Some(parent) = thread.parent_id.as_deref() else {
            return Ok(None);
        };
        let Some((_, table)) = task.partition_for_channel(parent) else {
            return Ok(None);
        };

        let first = self.platform.get_first_message(&thread.id).await?;
        let post = build_post(thread, parent, &first);
        let db = self.stores.guild(&thread.guild_id)?;
        let stored = post.clone();
        db.run_blocking(move |db| {
            db.ensure_post_table(&table)?;
            db.insert_post(&table, &stored)
        })
        .await?;
        self.log_new_post(&thread.guild_id, &post);
        info!("Scan: indexed new thread {} ({})", post.id, post.title);
        Ok(Some(post))
    }

    /// Removes a deleted thread from its partition (or every partition of the
    /// guild when the parent is unknown). Returns rows removed.
    pub async fn remove_thread(&self, guild_id: &str, parent_id: Option<&str>, thread_id: &str) -> Result<usize> {
        let snapshot = self.config.get();
        let Some(task) = snapshot.guild_task(guild_id) else {
            return Ok(0);
        };
        let tables = match parent_id.and_then(|p| task.partition_for_channel(p)) {
            Some((_, table)) => vec![table],
            None => task.table_names(),
        };
        let db = self.stores.guild(guild_id)?;
        let id = thread_id.to_string();
        let removed = db
            .run_blocking(move |db| {
                let present = db.existing_tables(&tables)?;
                let mut n = 0;
                for table in present {
                    n += db.delete_post(&table, &id)?;
                }
                Ok(n)
            })
            .await?;
        if removed > 0 {
            info!("Scan: removed deleted thread {} from guild {}", thread_id, guild_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::{starter, thread, FakePlatform};
    use crate::settings::{ConfigSnapshot, PartitionConfig};

    fn setup(dir: &std::path::Path) -> (Arc<FakePlatform>, Scanner, Arc<StoreManager>) {
        let mut task = GuildTask {
            name: "G".into(),
            guilds_id: "g".into(),
            ..Default::default()
        };
        task.data.insert(
            "news".into(),
            PartitionConfig {
                channel_id: "c0001".into(),
                thread_ids: vec![],
            },
        );
        let mut snapshot = ConfigSnapshot::default();
        snapshot.tasks.insert("g".into(), task);

        let fake = Arc::new(FakePlatform::new());
        let stores = Arc::new(StoreManager::in_memory());
        let scanner = Scanner::new(
            fake.clone(),
            stores.clone(),
            Arc::new(ConfigStore::from_snapshot(snapshot)),
            ScanLockFile::new(&dir.join("scan_lock.json")),
            Arc::new(NewPostLog::new(&dir.join("new_post"))),
        );
        (fake, scanner, stores)
    }

    #[test]
    fn test_chunk_size_table() {
        assert_eq!(chunk_size(1), 16);
        assert_eq!(chunk_size(3), 16);
        assert_eq!(chunk_size(5), 12);
        assert_eq!(chunk_size(10), 8);
        assert_eq!(chunk_size(11), 4);
    }

    #[tokio::test]
    async fn test_failed_thread_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, scanner, stores) = setup(dir.path());
        fake.add_active_thread(thread("t1", "g", "c0001", 100), starter("t1", "u", "a"));
        fake.add_active_thread(thread("t2", "g", "c0001", 200), starter("t2", "u", "b"));
        fake.fail_first_message("t2");

        let summary = scanner.scan(ScanMode::Active, None, &Shutdown::never()).await;
        assert_eq!(summary.total_new_posts, 1);
        assert_eq!(summary.failed_threads, 1);
        let ids = stores.guild("g").unwrap().post_ids("news_0001").unwrap();
        assert_eq!(ids, vec!["t1"]);
    }

    #[tokio::test]
    async fn test_full_scan_pages_archives() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, scanner, stores) = setup(dir.path());
        for i in 0..250 {
            let id = format!("a{}", i);
            let mut t = thread(&id, "g", "c0001", 1000 + i);
            t.archive_timestamp = Some(5000 + i);
            fake.add_archived_thread(t, starter(&id, "u", ""));
        }
        let summary = scanner.scan(ScanMode::Full, None, &Shutdown::never()).await;
        assert_eq!(summary.total_new_posts, 250);
        assert_eq!(stores.guild("g").unwrap().post_ids("news_0001").unwrap().len(), 250);
        assert_eq!(scanner.lock_file().load().unwrap().scan_mode, "full");
    }

    #[tokio::test]
    async fn test_archive_failure_keeps_active_results() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, scanner, stores) = setup(dir.path());
        fake.add_active_thread(thread("t1", "g", "c0001", 100), starter("t1", "u", ""));
        fake.fail_archive_listing("c0001");
        let summary = scanner.scan(ScanMode::Full, None, &Shutdown::never()).await;
        assert_eq!(summary.total_new_posts, 1);
        assert_eq!(summary.partitions_scanned, 1);
        assert_eq!(stores.guild("g").unwrap().post_ids("news_0001").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_scan_issues_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, scanner, _stores) = setup(dir.path());
        fake.add_active_thread(thread("t1", "g", "c0001", 100), starter("t1", "u", ""));
        let (trigger, shutdown) = Shutdown::new();
        trigger.trigger();
        let before = fake.call_count();
        let summary = scanner.scan(ScanMode::Full, None, &shutdown).await;
        assert!(summary.cancelled);
        assert_eq!(fake.call_count(), before);
        assert!(scanner.lock_file().load().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_archive_paging_stops_all_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, scanner, stores) = setup(dir.path());
        for i in 0..250 {
            let id = format!("a{}", i);
            let mut t = thread(&id, "g", "c0001", 1000 + i);
            t.archive_timestamp = Some(5000 + i);
            fake.add_archived_thread(t, starter(&id, "u", ""));
        }
        let (trigger, shutdown) = Shutdown::new();
        fake.on_archive_listing(move || trigger.trigger());

        let summary = scanner.scan(ScanMode::Full, None, &shutdown).await;
        assert!(summary.cancelled);
        // active listing plus the one archive page that fired the signal
        assert_eq!(fake.call_count(), 2);
        assert!(stores.guild("g").unwrap().post_ids("news_0001").unwrap().is_empty());
        assert!(scanner.lock_file().load().is_none());
    }

    #[tokio::test]
    async fn test_index_and_remove_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (fake, scanner, stores) = setup(dir.path());
        let now = chrono::Utc::now().timestamp();
        let t = thread("t9", "g", "c0001", now);
        fake.add_active_thread(t.clone(), starter("t9", "u", "hello"));

        let post = scanner.index_thread(&t).await.unwrap().unwrap();
        assert_eq!(post.id, "t9");
        assert_eq!(scanner.new_posts.load("g").len(), 1);

        let other = thread("x", "g", "elsewhere", now);
        assert!(scanner.index_thread(&other).await.unwrap().is_none());

        assert_eq!(scanner.remove_thread("g", Some("c0001"), "t9").await.unwrap(), 1);
        assert!(stores.guild("g").unwrap().post_ids("news_0001").unwrap().is_empty());
    }
}
