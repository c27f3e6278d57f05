use anyhow::Context;
use forumkeeper::config::Config;
use forumkeeper::db::StoreManager;
use forumkeeper::platform::discord::DiscordPlatform;
use forumkeeper::platform::{EventKinds, PlatformClient};
use forumkeeper::scheduler::Scheduler;
use forumkeeper::session::events;
use forumkeeper::settings::ConfigStore;
use forumkeeper::shutdown::Shutdown;
use forumkeeper::App;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long background tasks get to wind down after the signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting with {:?}", config);

    let settings = Arc::new(
        ConfigStore::load(&config.config_dir, &config.db_root).context("loading configuration files")?,
    );
    let stores = Arc::new(StoreManager::new(&config.db_root).context("opening store root")?);

    let downloader = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .context("building HTTP client")?;
    let platform: Arc<dyn PlatformClient> =
        Arc::new(DiscordPlatform::new(&config.bot_token, config.app_id, downloader));

    let (trigger, shutdown) = Shutdown::new();
    let app = App::new(config, settings, stores.clone(), platform.clone(), shutdown);

    let mut handles = Vec::new();
    let incoming = platform.subscribe(EventKinds::ALL);
    handles.push(tokio::spawn(events::run(app.clone(), incoming)));

    platform
        .open_gateway()
        .await
        .map_err(|e| anyhow::anyhow!("opening gateway: {}", e))?;
    handles.extend(Scheduler::new(app.clone()).spawn());
    info!("Bot is running");

    wait_for_signal().await;
    info!("Shutting down...");
    trigger.trigger();

    let drain = async {
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Background task ended abnormally: {}", e);
            }
        }
        app.tasks.join_all().await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Background tasks did not stop within {}", humantime::format_duration(SHUTDOWN_GRACE));
    }

    platform.close_gateway().await;
    stores.close_all();
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }
}
