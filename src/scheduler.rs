//! Background loops: periodic tickers plus the wall-clock daily runner. Every
//! loop selects on its timer and the shared shutdown signal.

use crate::scanner::{ScanLock, ScanMode};
use crate::App;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const COOLDOWN_GC_PERIOD: Duration = Duration::from_secs(3600);
pub const LEADERBOARD_PERIOD: Duration = Duration::from_secs(10 * 60);
pub const RECONCILE_PERIOD: Duration = Duration::from_secs(30 * 60);
pub const STATS_PERIOD: Duration = Duration::from_secs(3600);
pub const PUNISHMENT_TIMER_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const RUNTIME_STATS_PERIOD: Duration = Duration::from_secs(60);

/// Local hours the daily runner wakes at.
pub const DAILY_HOURS: [u32; 3] = [5, 13, 21];
/// Active ticks after which the daily runner upgrades to a full scan.
pub const FULL_SCAN_EVERY: i64 = 21;

/// Next daily slot strictly after `now`, in `now`'s time zone. Slots that do
/// not exist locally (DST gaps) are skipped.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    loop {
        for hour in DAILY_HOURS {
            let Some(naive) = day.and_hms_opt(hour, 0, 0) else {
                continue;
            };
            if let Some(at) = tz.from_local_datetime(&naive).earliest() {
                if at > *now {
                    return at;
                }
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => return now.clone() + ChronoDuration::hours(8),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyOutcome {
    pub full_scan: bool,
    pub active_scan_count: i64,
    pub new_posts_pruned: usize,
    pub evidence_removed: usize,
}

pub struct Scheduler {
    app: Arc<App>,
}

impl Scheduler {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Starts every loop. The handles finish once shutdown fires.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let app = self.app;
        let mut handles = vec![
            tokio::spawn(initial_scan(app.clone())),
            tokio::spawn(daily_loop(app.clone())),
            every(app.clone(), "cooldown gc", COOLDOWN_GC_PERIOD, |app| async move {
                let removed = app.session.cooldowns.sweep(crate::now_epoch());
                debug!("Cooldown GC: removed {} entr(ies), {} left", removed, app.session.cooldowns.len());
            }),
            every(app.clone(), "leaderboard", LEADERBOARD_PERIOD, |app| async move {
                app.leaderboard.refresh_all(crate::now_epoch()).await;
            }),
            every(app.clone(), "reconcile", RECONCILE_PERIOD, |app| async move {
                app.reconciler.run(&app.shutdown).await;
            }),
            every(app.clone(), "stats", STATS_PERIOD, |app| async move {
                app.stats.refresh(crate::now_epoch()).await;
            }),
            every(app.clone(), "punishment timer", PUNISHMENT_TIMER_PERIOD, |app| async move {
                app.timer.tick(crate::now_epoch()).await;
            }),
        ];
        if app.config.enable_pprof {
            handles.push(every(app, "runtime stats", RUNTIME_STATS_PERIOD, |_app| async move {
                let metrics = tokio::runtime::Handle::current().metrics();
                info!(
                    "Runtime: {} worker(s), {} alive task(s)",
                    metrics.num_workers(),
                    metrics.num_alive_tasks()
                );
            }));
        }
        info!("Scheduler: started {} loop(s)", handles.len());
        handles
    }
}

/// Runs `work` every `period`, first after one full period.
fn every<F, Fut>(app: Arc<App>, name: &'static str, period: Duration, work: F) -> JoinHandle<()>
where
    F: Fn(Arc<App>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = app.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => work(app.clone()).await,
            }
        }
        debug!("Scheduler: {} loop stopped", name);
    })
}

async fn initial_scan(app: Arc<App>) {
    if app.config.disable_initial_scan {
        info!("Scan: initial scan disabled");
        return;
    }
    let mut shutdown = app.shutdown.clone();
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = app.ready.notified() => {}
    }
    let mode = app.scanner.lock_file().initial_mode(crate::now_epoch());
    info!("Scan: initial {} scan", mode.as_str());
    app.scanner.scan(mode, None, &app.shutdown).await;
}

async fn daily_loop(app: Arc<App>) {
    let mut shutdown = app.shutdown.clone();
    loop {
        let now = chrono::Local::now();
        let next = next_run_after(&now);
        let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
        info!("Daily runner: next run at {}", next.format("%Y-%m-%d %H:%M"));
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        let outcome = run_daily_tick(&app, next.hour()).await;
        debug!("Daily runner: {:?}", outcome);
    }
    debug!("Scheduler: daily loop stopped");
}

/// One daily run. Scans first, then housekeeping and the report.
pub async fn run_daily_tick(app: &App, hour: u32) -> DailyOutcome {
    let lock_file = app.scanner.lock_file();
    let summary = app.scanner.scan(ScanMode::Active, None, &app.shutdown).await;

    let mut outcome = DailyOutcome {
        full_scan: false,
        active_scan_count: lock_file.load().map(|l| l.active_scan_count).unwrap_or(0),
        new_posts_pruned: 0,
        evidence_removed: 0,
    };
    if !summary.cancelled {
        match lock_file.update(|l| l.active_scan_count += 1) {
            Ok(lock) => outcome.active_scan_count = lock.active_scan_count,
            Err(e) => warn!("Daily runner: updating scan counter failed: {}", e),
        }
        if outcome.active_scan_count >= FULL_SCAN_EVERY {
            info!(
                "Daily runner: {} active scans since the last full one, running a full scan",
                outcome.active_scan_count
            );
            let full = app.scanner.scan(ScanMode::Full, None, &app.shutdown).await;
            outcome.full_scan = true;
            if !full.cancelled {
                match lock_file.update(|l: &mut ScanLock| l.active_scan_count = 0) {
                    Ok(lock) => outcome.active_scan_count = lock.active_scan_count,
                    Err(e) => warn!("Daily runner: resetting scan counter failed: {}", e),
                }
            }
        }
    }
    if app.shutdown.is_cancelled() {
        return outcome;
    }

    let now = crate::now_epoch();
    let new_posts = app.new_posts.clone();
    outcome.new_posts_pruned = match tokio::task::spawn_blocking(move || new_posts.prune(now)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            warn!("Daily runner: pruning new-post logs failed: {}", e);
            0
        }
        Err(e) => {
            error!("Daily runner: prune task panicked: {}", e);
            0
        }
    };

    let evidence_dir = app.config.evidence_path.clone();
    let max_age = Duration::from_secs(app.config.evidence_max_age_days * 24 * 3600);
    outcome.evidence_removed =
        match tokio::task::spawn_blocking(move || crate::fsutil::sweep_old_files(&evidence_dir, max_age)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Daily runner: evidence sweep failed: {}", e);
                0
            }
            Err(e) => {
                error!("Daily runner: evidence sweep panicked: {}", e);
                0
            }
        };

    if let Some(channel) = app.config.log_channel_id.as_deref() {
        if let Err(e) = app.stats.send_daily_report(channel, now).await {
            warn!("Daily runner: report to {} failed: {}", channel, e);
        }
    }
    info!(
        "Daily runner: {:02}:00 run done, full={}, counter={}, pruned {} post(s), removed {} evidence file(s)",
        hour, outcome.full_scan, outcome.active_scan_count, outcome.new_posts_pruned, outcome.evidence_removed
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::StoreManager;
    use crate::platform::fake::FakePlatform;
    use crate::settings::{ConfigSnapshot, ConfigStore};
    use crate::shutdown::Shutdown;
    use chrono::{FixedOffset, Utc};

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_next_run_picks_following_slot() {
        assert_eq!(next_run_after(&at(4, 59)), at(5, 0));
        assert_eq!(next_run_after(&at(5, 0)), at(13, 0));
        assert_eq!(next_run_after(&at(13, 30)), at(21, 0));
        let tomorrow = next_run_after(&at(22, 0));
        assert_eq!(tomorrow.date_naive().to_string(), "2026-03-15");
        assert_eq!(tomorrow.hour(), 5);
    }

    #[test]
    fn test_next_run_in_utc() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 21, 0, 1).unwrap();
        assert_eq!(next_run_after(&now), Utc.with_ymd_and_hms(2027, 1, 1, 5, 0, 0).unwrap());
    }

    fn app(dir: &std::path::Path, fake: Arc<FakePlatform>) -> Arc<App> {
        App::new(
            Config::for_data_dir(dir),
            Arc::new(ConfigStore::from_snapshot(ConfigSnapshot::default())),
            Arc::new(StoreManager::in_memory()),
            fake,
            Shutdown::never(),
        )
    }

    #[tokio::test]
    async fn test_daily_tick_counts_active_scans() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), Arc::new(FakePlatform::new()));
        let outcome = run_daily_tick(&app, 5).await;
        assert!(!outcome.full_scan);
        assert_eq!(outcome.active_scan_count, 1);
        let lock = app.scanner.lock_file().load().unwrap();
        assert_eq!(lock.scan_mode, "active");
        assert_eq!(lock.active_scan_count, 1);
    }

    #[tokio::test]
    async fn test_daily_tick_sends_report_when_log_channel_set() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakePlatform::new());
        let mut config = Config::for_data_dir(dir.path());
        config.log_channel_id = Some("log".into());
        let app = App::new(
            config,
            Arc::new(ConfigStore::from_snapshot(ConfigSnapshot::default())),
            Arc::new(StoreManager::in_memory()),
            fake.clone(),
            Shutdown::never(),
        );
        run_daily_tick(&app, 21).await;
        assert_eq!(fake.sent_to("log").len(), 1);
    }

    #[tokio::test]
    async fn test_loops_stop_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (trigger, shutdown) = Shutdown::new();
        let app = App::new(
            Config::for_data_dir(dir.path()),
            Arc::new(ConfigStore::from_snapshot(ConfigSnapshot::default())),
            Arc::new(StoreManager::in_memory()),
            Arc::new(FakePlatform::new()),
            shutdown,
        );
        let handles = Scheduler::new(app).spawn();
        trigger.trigger();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        }
    }
}
