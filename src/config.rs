use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Process-level settings read from the environment.
#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub app_id: u64,
    pub log_channel_id: Option<String>,
    pub developer_user_ids: Vec<String>,
    pub super_admin_role_ids: Vec<String>,
    pub disable_initial_scan: bool,
    pub disable_command_unregister: bool,
    pub evidence_path: PathBuf,
    pub evidence_max_age_days: u64,
    pub enable_pprof: bool,
    pub data_dir: PathBuf,
    pub db_root: PathBuf,
    pub config_dir: PathBuf,
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));
        let db_root = env::var("DB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("db"));

        Ok(Config {
            bot_token: env::var("BOT_TOKEN")
                .map_err(|_| anyhow::anyhow!("BOT_TOKEN must be set"))?,
            app_id: env::var("APP_ID")
                .map_err(|_| anyhow::anyhow!("APP_ID must be set"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("APP_ID must be a valid u64"))?,
            log_channel_id: env::var("LOG_CHANNEL_ID")
                .ok()
                .filter(|id| !id.trim().is_empty()),
            developer_user_ids: split_ids(&env::var("DEVELOPER_USER_IDS").unwrap_or_default()),
            super_admin_role_ids: split_ids(&env::var("SUPER_ADMIN_ROLE_IDS").unwrap_or_default()),
            disable_initial_scan: env::var("DISABLE_INITIAL_SCAN")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            disable_command_unregister: env::var("DISABLE_COMMAND_UNREGISTER")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            evidence_path: PathBuf::from(
                env::var("EVIDENCE_PATH").unwrap_or_else(|_| "data/evidence".to_string()),
            ),
            evidence_max_age_days: env::var("EVIDENCE_MAX_AGE_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            enable_pprof: env::var("ENABLE_PPROF")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            config_dir: PathBuf::from(env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string())),
            data_dir,
            db_root,
        })
    }

    /// Configuration rooted in `dir`, for tests and tooling.
    pub fn for_data_dir(dir: &std::path::Path) -> Self {
        Config {
            bot_token: String::new(),
            app_id: 0,
            log_channel_id: None,
            developer_user_ids: Vec::new(),
            super_admin_role_ids: Vec::new(),
            disable_initial_scan: true,
            disable_command_unregister: true,
            evidence_path: dir.join("evidence"),
            evidence_max_age_days: 30,
            enable_pprof: false,
            data_dir: dir.to_path_buf(),
            db_root: dir.join("db"),
            config_dir: dir.join("config"),
        }
    }

    pub fn scan_lock_path(&self) -> PathBuf {
        self.data_dir.join("scan_lock.json")
    }

    pub fn new_post_dir(&self) -> PathBuf {
        self.data_dir.join("new_post")
    }

    pub fn is_developer(&self, user_id: &str) -> bool {
        self.developer_user_ids.iter().any(|id| id == user_id)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"[REDACTED]")
            .field("app_id", &self.app_id)
            .field("log_channel_id", &self.log_channel_id)
            .field("developer_user_ids", &self.developer_user_ids)
            .field("super_admin_role_ids", &self.super_admin_role_ids)
            .field("disable_initial_scan", &self.disable_initial_scan)
            .field("disable_command_unregister", &self.disable_command_unregister)
            .field("evidence_path", &self.evidence_path)
            .field("evidence_max_age_days", &self.evidence_max_age_days)
            .field("enable_pprof", &self.enable_pprof)
            .field("data_dir", &self.data_dir)
            .field("db_root", &self.db_root)
            .field("config_dir", &self.config_dir)
            .finish()
    }
}

/// Embed description limit is 4096 characters
pub const EMBED_DESCRIPTION_LIMIT: usize = 4096;
/// Budget used when paginating long descriptions, leaving room for titles.
pub const EMBED_DESCRIPTION_BUDGET: usize = 4000;
/// Autocomplete responses are capped at 25 choices
pub const AUTOCOMPLETE_LIMIT: usize = 25;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Missing vars
        env::remove_var("BOT_TOKEN");
        env::remove_var("APP_ID");
        assert!(Config::build().is_err(), "Should fail when required vars are missing");

        // 2. Defaults
        env::set_var("BOT_TOKEN", "test_token");
        env::set_var("APP_ID", "12345");
        env::set_var("DEVELOPER_USER_IDS", " 1, 2 ,,3");
        env::remove_var("DATA_DIR");
        env::remove_var("DB_ROOT");
        let config = Config::build().unwrap();
        assert_eq!(config.app_id, 12345);
        assert_eq!(config.developer_user_ids, vec!["1", "2", "3"]);
        assert_eq!(config.evidence_max_age_days, 30);
        assert_eq!(config.db_root, PathBuf::from("data").join("db"));
        assert!(config.is_developer("2"));

        // 3. Debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(debug_output.contains("[REDACTED]"));

        env::remove_var("BOT_TOKEN");
        env::remove_var("APP_ID");
        env::remove_var("DEVELOPER_USER_IDS");
    }
}
