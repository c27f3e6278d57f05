pub mod config;
pub mod db;
pub mod error;
pub mod fsutil;
pub mod leaderboard;
pub mod moderation;
pub mod navigation;
pub mod platform;
pub mod reconciler;
pub mod roll;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod text;

use std::sync::Arc;
use tokio::sync::Notify;

/// Current wall-clock time in epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Shared state handed to every handler and background loop.
pub struct App {
    pub config: config::Config,
    pub settings: Arc<settings::ConfigStore>,
    pub stores: Arc<db::StoreManager>,
    pub platform: Arc<dyn platform::PlatformClient>,
    pub scanner: scanner::Scanner,
    pub reconciler: reconciler::Reconciler,
    pub moderation: moderation::ModerationEngine,
    pub timer: moderation::PunishmentTimer,
    pub stats: moderation::report::StatsPublisher,
    pub navigation: Arc<navigation::NavigationEngine>,
    pub nav_batch: navigation::BatchRefresher,
    pub leaderboard: leaderboard::Leaderboard,
    pub roller: roll::CardRoller,
    pub new_posts: Arc<scanner::NewPostLog>,
    pub session: session::SessionState,
    pub commands: session::CommandRegistry,
    pub shutdown: shutdown::Shutdown,
    /// Handler-started work joined on shutdown.
    pub tasks: shutdown::TaskTracker,
    /// Fired once the gateway reports ready.
    pub ready: Notify,
}

impl App {
    pub fn new(
        config: config::Config,
        settings: Arc<settings::ConfigStore>,
        stores: Arc<db::StoreManager>,
        platform: Arc<dyn platform::PlatformClient>,
        shutdown: shutdown::Shutdown,
    ) -> Arc<Self> {
        let new_posts = Arc::new(scanner::NewPostLog::new(&config.new_post_dir()));
        let scanner = scanner::Scanner::new(
            platform.clone(),
            stores.clone(),
            settings.clone(),
            scanner::ScanLockFile::new(&config.scan_lock_path()),
            new_posts.clone(),
        );
        let evidence = moderation::EvidenceArchive::new(&config.evidence_path, platform.clone());
        let navigation = Arc::new(navigation::NavigationEngine::new(
            platform.clone(),
            stores.clone(),
            settings.clone(),
        ));

        Arc::new(App {
            reconciler: reconciler::Reconciler::new(platform.clone(), stores.clone(), settings.clone()),
            moderation: moderation::ModerationEngine::new(platform.clone(), stores.clone(), settings.clone(), evidence),
            timer: moderation::PunishmentTimer::new(platform.clone(), stores.clone(), settings.clone()),
            stats: moderation::report::StatsPublisher::new(platform.clone(), stores.clone(), settings.clone()),
            nav_batch: navigation::BatchRefresher::new(navigation.clone(), stores.clone()),
            leaderboard: leaderboard::Leaderboard::new(platform.clone(), stores.clone(), settings.clone()),
            roller: roll::CardRoller::new(stores.clone(), settings.clone()),
            commands: session::handlers::registry(),
            session: session::SessionState::new(),
            tasks: shutdown::TaskTracker::new(),
            ready: Notify::new(),
            navigation,
            scanner,
            new_posts,
            config,
            settings,
            stores,
            platform,
            shutdown,
        })
    }

    /// Guilds with a task entry whose stored config is not disabled.
    pub async fn enabled_guilds(&self) -> Vec<String> {
        let snapshot = self.settings.get();
        let mut out = Vec::new();
        for guild_id in snapshot.tasks.keys() {
            let enabled = match self.stores.guild(guild_id) {
                Ok(db) => {
                    let g = guild_id.clone();
                    db.run_blocking(move |db| db.get_guild_config(&g))
                        .await
                        .ok()
                        .flatten()
                        .map(|c| c.enabled)
                        .unwrap_or(true)
                }
                Err(_) => false,
            };
            if enabled {
                out.push(guild_id.clone());
            }
        }
        out
    }
}
