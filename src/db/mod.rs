use crate::error::{BotError, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub mod guild;
pub mod moderation;
pub mod navigation;
pub mod posts;
pub mod schema;
pub mod user;

pub use guild::{AutoTrigger, GuildConfig, LeaderboardAd, Preset, PresetKind, StatsChannel, TimedTask, TopChannel};
pub use moderation::{EvidenceItem, ModerationRecord, NewModerationRecord, RecordStatus};
pub use navigation::{PersonalNavigation, UpdateMode};
pub use posts::{Post, SourcedPost};
pub use user::UserPreferences;

/// Handle to one SQLite database file.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates the guild tables and applies column migrations.
    pub fn execute_init(&self) -> Result<()> {
        debug!("Database: Initializing guild schema...");
        let conn = self.conn();
        conn.execute_batch(schema::GUILD_SCHEMA)?;
        for sql in schema::GUILD_MIGRATIONS {
            apply_migration(&conn, sql)?;
        }
        Ok(())
    }

    pub fn execute_user_init(&self) -> Result<()> {
        debug!("Database: Initializing user schema...");
        self.conn().execute_batch(schema::USER_SCHEMA)?;
        Ok(())
    }

    /// Runs `f` on the blocking pool so SQLite I/O never stalls the reactor.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

fn apply_migration(conn: &Connection, sql: &str) -> Result<()> {
    match conn.execute(sql, []) {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
        Err(e) => Err(BotError::Store(e)),
    }
}

/// Opens per-guild databases at `<root>/<guild_id>.db` plus `user.db`,
/// keeping one handle per file.
pub struct StoreManager {
    root: Option<PathBuf>,
    guilds: Mutex<HashMap<String, Database>>,
    user: Mutex<Option<Database>>,
}

impl StoreManager {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: Some(root.to_path_buf()),
            guilds: Mutex::new(HashMap::new()),
            user: Mutex::new(None),
        })
    }

    /// Every database lives in memory; used by tests.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            guilds: Mutex::new(HashMap::new()),
            user: Mutex::new(None),
        }
    }

    pub fn guild_path(&self, guild_id: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join(format!("{}.db", guild_id)))
    }

    pub fn guild(&self, guild_id: &str) -> Result<Database> {
        if guild_id.is_empty() || guild_id.contains(['/', '\\', '.']) {
            return Err(BotError::InvalidInput(format!("guild id {:?}", guild_id)));
        }
        let mut guilds = self.guilds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = guilds.get(guild_id) {
            return Ok(db.clone());
        }
        let db = match self.guild_path(guild_id) {
            Some(path) => Database::open(&path)?,
            None => Database::open_in_memory()?,
        };
        db.execute_init()?;
        info!("Database: opened store for guild {}", guild_id);
        guilds.insert(guild_id.to_string(), db.clone());
        Ok(db)
    }

    /// Opens `path` directly, e.g. a card pool configured elsewhere.
    pub fn open_external(&self, path: &Path) -> Result<Database> {
        let key = path.to_string_lossy().into_owned();
        let mut guilds = self.guilds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = guilds.get(&key) {
            return Ok(db.clone());
        }
        let db = Database::open(path)?;
        guilds.insert(key, db.clone());
        Ok(db)
    }

    pub fn user(&self) -> Result<Database> {
        let mut user = self.user.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = user.as_ref() {
            return Ok(db.clone());
        }
        let db = match &self.root {
            Some(root) => Database::open(&root.join("user.db"))?,
            None => Database::open_in_memory()?,
        };
        db.execute_user_init()?;
        *user = Some(db.clone());
        Ok(db)
    }

    /// Drops every cached handle; connections close once in-flight users finish.
    pub fn close_all(&self) {
        let count = {
            let mut guilds = self.guilds.lock().unwrap_or_else(|e| e.into_inner());
            let n = guilds.len();
            guilds.clear();
            n
        };
        self.user.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!("Database: closed {} guild store(s)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        db.execute_init().unwrap();
        let conn = db.conn();
        assert!(conn.prepare("SELECT recovery_role_id FROM guild_config").is_ok());
        assert!(conn.prepare("SELECT description FROM preset_messages").is_ok());
    }

    #[test]
    fn test_store_manager_paths() {
        let dir = tempfile::tempdir().unwrap();
        let stores = StoreManager::new(dir.path()).unwrap();
        stores.guild("123").unwrap();
        assert!(dir.path().join("123.db").exists());
        stores.user().unwrap();
        assert!(dir.path().join("user.db").exists());
        assert!(stores.guild("../etc").is_err());
        stores.close_all();
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let stores = StoreManager::in_memory();
        let db = stores.guild("g").unwrap();
        let n: i64 = db
            .run_blocking(|db| Ok(db.conn().query_row("SELECT 41 + 1", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(n, 42);
    }
}
