//! JSON configuration files and the hot-reloadable snapshot built from them.

use crate::db::posts::partition_table;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const TASK_CONFIG_FILE: &str = "task_config.json";
pub const ROLL_CARD_CONFIG_FILE: &str = "roll_cardConfig.json";
pub const THREAD_CONFIG_FILE: &str = "thread_config.json";
pub const KICK_CONFIG_FILE: &str = "kick_config.json";
pub const PUNISH_CONFIG_FILE: &str = "punish_config.json";
pub const DATABASE_MAPPING_FILE: &str = "databaseMapping.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub channel_id: String,
    /// Thread ids already known to exist; seeds full scans.
    #[serde(default, rename = "thread_id")]
    pub thread_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildTask {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub guilds_id: String,
    /// Sorted by partition name, which fixes the scan order.
    #[serde(default)]
    pub data: BTreeMap<String, PartitionConfig>,
}

impl GuildTask {
    pub fn table_names(&self) -> Vec<String> {
        self.data
            .iter()
            .map(|(name, p)| partition_table(name, &p.channel_id))
            .collect()
    }

    /// Partition owning `channel_id`, with its table name.
    pub fn partition_for_channel(&self, channel_id: &str) -> Option<(String, String)> {
        self.data
            .iter()
            .find(|(_, p)| p.channel_id == channel_id)
            .map(|(name, p)| (name.clone(), partition_table(name, &p.channel_id)))
    }
}

pub type TaskConfig = BTreeMap<String, GuildTask>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollCardGuild {
    /// Overrides the guild's default store path.
    #[serde(default)]
    pub database: Option<String>,
    /// table name → display name
    #[serde(default)]
    pub tables: BTreeMap<String, String>,
    #[serde(default)]
    pub tag_mapping_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadIndexGuild {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// One escalation step of a moderation action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    #[serde(default)]
    pub remove_role_ids: Vec<String>,
    #[serde(default)]
    pub add_role_ids: Vec<String>,
    #[serde(default)]
    pub add_role_timeout_minutes: i64,
    /// Days, `"ban"`, or `"0"`/empty for none.
    #[serde(default)]
    pub timeout: String,
    #[serde(default)]
    pub whitelist_role_ids: Vec<String>,
    #[serde(default)]
    pub description_template: String,
    #[serde(default)]
    pub color: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub name: String,
    /// Sparse map keyed by the level index as a string.
    #[serde(default)]
    pub levels: BTreeMap<String, LevelConfig>,
}

pub type ModerationConfig = BTreeMap<String, BTreeMap<String, ActionConfig>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingEntry {
    pub database: String,
    pub tables: BTreeMap<String, String>,
}

/// Immutable view of every configuration file; replaced wholesale on reload.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub tasks: TaskConfig,
    pub roll_cards: BTreeMap<String, RollCardGuild>,
    pub threads: BTreeMap<String, ThreadIndexGuild>,
    pub moderation: ModerationConfig,
    /// guild → tag id → tag name
    pub tag_names: HashMap<String, HashMap<String, String>>,
}

impl ConfigSnapshot {
    pub fn guild_task(&self, guild_id: &str) -> Option<&GuildTask> {
        self.tasks.get(guild_id)
    }

    pub fn action(&self, guild_id: &str, action_type: &str) -> Option<&ActionConfig> {
        self.moderation.get(guild_id).and_then(|m| m.get(action_type))
    }

    pub fn action_types(&self, guild_id: &str) -> Vec<String> {
        self.moderation
            .get(guild_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Partition tables used for rankings: the thread index list when one is
    /// configured, otherwise every scanned partition.
    pub fn ranking_tables(&self, guild_id: &str) -> Vec<String> {
        if let Some(t) = self.threads.get(guild_id).filter(|t| !t.tables.is_empty()) {
            return t.tables.clone();
        }
        self.guild_task(guild_id)
            .map(|t| t.table_names())
            .unwrap_or_default()
    }

    pub fn tag_name<'a>(&'a self, guild_id: &str, tag_id: &'a str) -> &'a str {
        self.tag_names
            .get(guild_id)
            .and_then(|m| m.get(tag_id))
            .map(|s| s.as_str())
            .unwrap_or(tag_id)
    }

    pub fn database_mapping(&self, db_root: &Path) -> BTreeMap<String, MappingEntry> {
        self.tasks
            .iter()
            .map(|(guild_id, task)| {
                let tables = task
                    .data
                    .iter()
                    .map(|(name, p)| (name.clone(), partition_table(name, &p.channel_id)))
                    .collect();
                let database = db_root.join(format!("{}.db", guild_id));
                (
                    guild_id.clone(),
                    MappingEntry {
                        database: database.to_string_lossy().into_owned(),
                        tables,
                    },
                )
            })
            .collect()
    }
}

fn read_optional<T>(path: &Path) -> anyhow::Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Malformed config file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Reads every configuration file under `dir`.
pub fn load_snapshot(dir: &Path) -> anyhow::Result<ConfigSnapshot> {
    let tasks: TaskConfig = read_optional(&dir.join(TASK_CONFIG_FILE))?;
    let roll_cards: BTreeMap<String, RollCardGuild> = read_optional(&dir.join(ROLL_CARD_CONFIG_FILE))?;
    let threads: BTreeMap<String, ThreadIndexGuild> = read_optional(&dir.join(THREAD_CONFIG_FILE))?;

    // Both files share one format; actions are merged per guild.
    let mut moderation: ModerationConfig = read_optional(&dir.join(PUNISH_CONFIG_FILE))?;
    let kick: ModerationConfig = read_optional(&dir.join(KICK_CONFIG_FILE))?;
    for (guild_id, actions) in kick {
        moderation.entry(guild_id).or_default().extend(actions);
    }

    let mut tag_names = HashMap::new();
    for (guild_id, roll) in &roll_cards {
        if let Some(file) = &roll.tag_mapping_file {
            let path = dir.join(file);
            let mapping: HashMap<String, String> = read_optional(&path)?;
            tag_names.insert(guild_id.clone(), mapping);
        }
    }

    Ok(ConfigSnapshot {
        tasks,
        roll_cards,
        threads,
        moderation,
        tag_names,
    })
}

/// Writes `databaseMapping.json` derived from the task configuration.
pub fn write_database_mapping(dir: &Path, snapshot: &ConfigSnapshot, db_root: &Path) -> anyhow::Result<()> {
    let mapping = snapshot.database_mapping(db_root);
    let content = serde_json::to_vec_pretty(&mapping)?;
    crate::fsutil::write_atomic(&dir.join(DATABASE_MAPPING_FILE), &content)
        .with_context(|| format!("Failed to write {}", DATABASE_MAPPING_FILE))?;
    Ok(())
}

/// Holds the current [`ConfigSnapshot`]; readers always see a complete one.
pub struct ConfigStore {
    dir: PathBuf,
    db_root: PathBuf,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn load(dir: &Path, db_root: &Path) -> anyhow::Result<Self> {
        let snapshot = load_snapshot(dir)?;
        if let Err(e) = write_database_mapping(dir, &snapshot, db_root) {
            warn!("Config: could not regenerate database mapping: {:#}", e);
        }
        info!(
            "Config: loaded {} guild task(s), {} moderation guild(s)",
            snapshot.tasks.len(),
            snapshot.moderation.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            db_root: db_root.to_path_buf(),
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn from_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            dir: PathBuf::new(),
            db_root: PathBuf::new(),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn get(&self) -> Arc<ConfigSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-reads the files. On failure the previous snapshot stays in place.
    pub fn reload(&self) -> anyhow::Result<Arc<ConfigSnapshot>> {
        let snapshot = Arc::new(load_snapshot(&self.dir)?);
        if let Err(e) = write_database_mapping(&self.dir, &snapshot, &self.db_root) {
            warn!("Config: could not regenerate database mapping: {:#}", e);
        }
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        info!("Config: snapshot reloaded");
        Ok(snapshot)
    }

    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASKS: &str = r#"{
        "g1": {
            "name": "Guild One",
            "guilds_id": "g1",
            "data": {
                "news": {"channel_id": "100001234", "thread_id": ["t1"]},
                "art": {"channel_id": "200005678"}
            }
        }
    }"#;

    #[test]
    fn test_load_snapshot_and_mapping() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TASK_CONFIG_FILE), TASKS).unwrap();
        fs::write(
            dir.path().join(PUNISH_CONFIG_FILE),
            r#"{"g1": {"mute": {"levels": {"0": {"add_role_ids": ["r1"], "add_role_timeout_minutes": 60}}}}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join(KICK_CONFIG_FILE),
            r#"{"g1": {"kick": {"levels": {"0": {"timeout": "ban"}}}}}"#,
        )
        .unwrap();

        let store = ConfigStore::load(dir.path(), Path::new("/db")).unwrap();
        let snap = store.get();
        let task = snap.guild_task("g1").unwrap();
        assert_eq!(task.table_names(), vec!["art_5678", "news_1234"]);
        assert_eq!(task.data["news"].thread_ids, vec!["t1"]);
        assert_eq!(snap.action_types("g1"), vec!["kick", "mute"]);
        assert_eq!(snap.action("g1", "mute").unwrap().levels["0"].add_role_timeout_minutes, 60);

        let mapping: BTreeMap<String, MappingEntry> = serde_json::from_str(
            &fs::read_to_string(dir.path().join(DATABASE_MAPPING_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(mapping["g1"].tables["news"], "news_1234");
        assert!(mapping["g1"].database.ends_with("g1.db"));
    }

    #[test]
    fn test_reload_keeps_old_snapshot_on_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TASK_CONFIG_FILE), TASKS).unwrap();
        let store = ConfigStore::load(dir.path(), dir.path()).unwrap();

        fs::write(dir.path().join(TASK_CONFIG_FILE), "{ not json").unwrap();
        assert!(store.reload().is_err());
        assert!(store.get().guild_task("g1").is_some());
    }

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snap = load_snapshot(dir.path()).unwrap();
        assert!(snap.tasks.is_empty());
        assert_eq!(snap.tag_name("g", "42"), "42");
    }
}
