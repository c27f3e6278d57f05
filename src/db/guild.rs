//! Guild-scoped configuration rows: roles, presets, top channels, ads,
//! statistics channels, auto-triggers and timed tasks.

use super::Database;
use crate::error::Result;
use rusqlite::{params, OptionalExtension, Row};

fn split(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildConfig {
    pub guild_id: String,
    pub name: String,
    pub admin_role_ids: Vec<String>,
    pub user_role_ids: Vec<String>,
    pub enabled: bool,
    pub recovery_role_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetKind {
    Text,
    Embed,
}

impl PresetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetKind::Text => "text",
            PresetKind::Embed => "embed",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "embed" {
            PresetKind::Embed
        } else {
            PresetKind::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub value: String,
    pub kind: PresetKind,
    pub description: String,
}

impl Preset {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(4)?;
        Ok(Preset {
            id: row.get(0)?,
            guild_id: row.get(1)?,
            name: row.get(2)?,
            value: row.get(3)?,
            kind: PresetKind::parse(&kind),
            description: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopChannel {
    pub channel_id: String,
    pub guild_id: String,
    pub message_limit: i64,
    pub excluded_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardAd {
    pub id: i64,
    pub guild_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsChannel {
    pub channel_id: String,
    pub guild_id: String,
    pub target_guild_id: String,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoTrigger {
    pub id: i64,
    pub guild_id: String,
    pub keywords: Vec<String>,
    pub preset_id: String,
    /// `None` fires in every channel.
    pub channel_id: Option<String>,
}

impl AutoTrigger {
    pub fn matches(&self, channel_id: &str, content: &str) -> bool {
        if let Some(ch) = self.channel_id.as_deref().filter(|c| !c.is_empty()) {
            if ch != channel_id {
                return false;
            }
        }
        let content = content.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| !k.is_empty())
            .any(|k| content.contains(&k.to_lowercase()))
    }
}

/// A platform message the bot keeps up to date, keyed by `(kind, key)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedTask {
    pub kind: String,
    pub key: String,
    pub channel_id: String,
    pub message_id: Option<String>,
}

impl Database {
    pub fn get_guild_config(&self, guild_id: &str) -> Result<Option<GuildConfig>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT guild_id, name, admin_role_ids, user_role_ids, enabled, recovery_role_id
                 FROM guild_config WHERE guild_id = ?1",
                [guild_id],
                |r| {
                    Ok(GuildConfig {
                        guild_id: r.get(0)?,
                        name: r.get(1)?,
                        admin_role_ids: split(r.get(2)?),
                        user_role_ids: split(r.get(3)?),
                        enabled: r.get(4)?,
                        recovery_role_id: r.get::<_, Option<String>>(5)?.filter(|s| !s.is_empty()),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_guild_config(&self, config: &GuildConfig) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO guild_config (guild_id, name, admin_role_ids, user_role_ids, enabled, recovery_role_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(guild_id) DO UPDATE SET
                name = excluded.name,
                admin_role_ids = excluded.admin_role_ids,
                user_role_ids = excluded.user_role_ids,
                enabled = excluded.enabled,
                recovery_role_id = excluded.recovery_role_id",
            params![
                config.guild_id,
                config.name,
                config.admin_role_ids.join(","),
                config.user_role_ids.join(","),
                config.enabled,
                config.recovery_role_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_presets(&self, guild_id: &str) -> Result<Vec<Preset>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, name, value, kind, description FROM preset_messages
             WHERE guild_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([guild_id], Preset::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_preset(&self, id: &str) -> Result<Option<Preset>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, guild_id, name, value, kind, description FROM preset_messages WHERE id = ?1",
                [id],
                Preset::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_preset(&self, preset: &Preset) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO preset_messages (id, guild_id, name, value, kind, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                preset.id,
                preset.guild_id,
                preset.name,
                preset.value,
                preset.kind.as_str(),
                preset.description,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_top_channels(&self, guild_id: &str) -> Result<Vec<TopChannel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, guild_id, message_limit, excluded_ids FROM top_channels
             WHERE guild_id = ?1 ORDER BY channel_id",
        )?;
        let rows = stmt
            .query_map([guild_id], |r| {
                Ok(TopChannel {
                    channel_id: r.get(0)?,
                    guild_id: r.get(1)?,
                    message_limit: r.get(2)?,
                    excluded_ids: split(r.get(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn is_top_channel(&self, channel_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists = conn
            .prepare("SELECT 1 FROM top_channels WHERE channel_id = ?1")?
            .exists([channel_id])?;
        Ok(exists)
    }

    pub fn upsert_top_channel(&self, channel: &TopChannel) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO top_channels (channel_id, guild_id, message_limit, excluded_ids)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                channel.channel_id,
                channel.guild_id,
                channel.message_limit,
                channel.excluded_ids.join(","),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_enabled_ads(&self, guild_id: &str) -> Result<Vec<LeaderboardAd>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, content, image_url, enabled FROM leaderboard_ads
             WHERE guild_id = ?1 AND enabled = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([guild_id], |r| {
                Ok(LeaderboardAd {
                    id: r.get(0)?,
                    guild_id: r.get(1)?,
                    content: r.get(2)?,
                    image_url: r.get(3)?,
                    enabled: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn random_enabled_ad(&self, guild_id: &str) -> Result<Option<LeaderboardAd>> {
        let conn = self.conn();
        let ad = conn
            .query_row(
                "SELECT id, guild_id, content, image_url, enabled FROM leaderboard_ads
                 WHERE guild_id = ?1 AND enabled = 1 ORDER BY RANDOM() LIMIT 1",
                [guild_id],
                |r| {
                    Ok(LeaderboardAd {
                        id: r.get(0)?,
                        guild_id: r.get(1)?,
                        content: r.get(2)?,
                        image_url: r.get(3)?,
                        enabled: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(ad)
    }

    pub fn add_ad(&self, guild_id: &str, content: &str, image_url: Option<&str>) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO leaderboard_ads (guild_id, content, image_url, enabled) VALUES (?1, ?2, ?3, 1)",
            params![guild_id, content, image_url],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn list_stats_channels(&self) -> Result<Vec<StatsChannel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, guild_id, target_guild_id, message_id FROM punish_stats_channels
             ORDER BY channel_id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(StatsChannel {
                    channel_id: r.get(0)?,
                    guild_id: r.get(1)?,
                    target_guild_id: r.get(2)?,
                    message_id: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_stats_channel(&self, channel: &StatsChannel) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO punish_stats_channels (channel_id, guild_id, target_guild_id, message_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                channel.channel_id,
                channel.guild_id,
                channel.target_guild_id,
                channel.message_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_stats_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE punish_stats_channels SET message_id = ?1 WHERE channel_id = ?2",
            params![message_id, channel_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_auto_triggers(&self, guild_id: &str) -> Result<Vec<AutoTrigger>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, keywords, preset_id, channel_id FROM auto_triggers
             WHERE guild_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([guild_id], |r| {
                let keywords: String = r.get(2)?;
                Ok(AutoTrigger {
                    id: r.get(0)?,
                    guild_id: r.get(1)?,
                    keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                    preset_id: r.get(3)?,
                    channel_id: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn add_auto_trigger(
        &self,
        guild_id: &str,
        keywords: &[String],
        preset_id: &str,
        channel_id: Option<&str>,
    ) -> Result<i64> {
        let keywords = serde_json::to_string(keywords)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO auto_triggers (guild_id, keywords, preset_id, channel_id) VALUES (?1, ?2, ?3, ?4)",
            params![guild_id, keywords, preset_id, channel_id],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn get_timed_task(&self, kind: &str, key: &str) -> Result<Option<TimedTask>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT kind, key, channel_id, message_id FROM timed_tasks WHERE kind = ?1 AND key = ?2",
                params![kind, key],
                |r| {
                    Ok(TimedTask {
                        kind: r.get(0)?,
                        key: r.get(1)?,
                        channel_id: r.get(2)?,
                        message_id: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_timed_task(&self, task: &TimedTask, now: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO timed_tasks (kind, key, channel_id, message_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, key) DO UPDATE SET
                channel_id = excluded.channel_id,
                message_id = excluded.message_id,
                updated_at = excluded.updated_at",
            params![task.kind, task.key, task.channel_id, task.message_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        db
    }

    #[test]
    fn test_guild_config_roundtrip_with_recovery_role() {
        let db = db();
        assert!(db.get_guild_config("g").unwrap().is_none());
        let cfg = GuildConfig {
            guild_id: "g".into(),
            name: "Guild".into(),
            admin_role_ids: vec!["a1".into(), "a2".into()],
            user_role_ids: vec![],
            enabled: true,
            recovery_role_id: Some("rec".into()),
        };
        db.upsert_guild_config(&cfg).unwrap();
        assert_eq!(db.get_guild_config("g").unwrap().unwrap(), cfg);
    }

    #[test]
    fn test_presets_and_triggers() {
        let db = db();
        db.upsert_preset(&Preset {
            id: "p1".into(),
            guild_id: "g".into(),
            name: "Rules".into(),
            value: "Read the rules".into(),
            kind: PresetKind::Text,
            description: String::new(),
        })
        .unwrap();
        assert_eq!(db.list_presets("g").unwrap().len(), 1);
        assert_eq!(db.get_preset("p1").unwrap().unwrap().name, "Rules");

        db.add_auto_trigger("g", &["Help".into()], "p1", Some("c1")).unwrap();
        let triggers = db.list_auto_triggers("g").unwrap();
        assert!(triggers[0].matches("c1", "i need HELP please"));
        assert!(!triggers[0].matches("c2", "help"));
        assert!(!triggers[0].matches("c1", "nothing"));
    }

    #[test]
    fn test_timed_task_upsert() {
        let db = db();
        let mut task = TimedTask {
            kind: "leaderboard".into(),
            key: "c1".into(),
            channel_id: "c1".into(),
            message_id: Some("m1".into()),
        };
        db.upsert_timed_task(&task, 1).unwrap();
        task.message_id = Some("m2".into());
        db.upsert_timed_task(&task, 2).unwrap();
        assert_eq!(db.get_timed_task("leaderboard", "c1").unwrap().unwrap(), task);
    }

    #[test]
    fn test_top_channels_and_stats() {
        let db = db();
        db.upsert_top_channel(&TopChannel {
            channel_id: "c1".into(),
            guild_id: "g".into(),
            message_limit: 5,
            excluded_ids: vec!["p9".into()],
        })
        .unwrap();
        assert!(db.is_top_channel("c1").unwrap());
        assert_eq!(db.list_top_channels("g").unwrap()[0].excluded_ids, vec!["p9"]);

        db.upsert_stats_channel(&StatsChannel {
            channel_id: "s1".into(),
            guild_id: "g".into(),
            target_guild_id: "g".into(),
            message_id: None,
        })
        .unwrap();
        db.set_stats_message("s1", "m1").unwrap();
        assert_eq!(db.list_stats_channels().unwrap()[0].message_id.as_deref(), Some("m1"));

        db.add_ad("g", "Join us", None).unwrap();
        assert_eq!(db.list_enabled_ads("g").unwrap().len(), 1);
    }
}
