use super::Database;
use crate::error::Result;
use rusqlite::{named_params, params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Active,
    Completed,
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Completed => "completed",
            RecordStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RecordStatus::Completed,
            "cancelled" => RecordStatus::Cancelled,
            _ => RecordStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub content: String,
    pub attachment_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationRecord {
    pub punishment_id: i64,
    pub guild_id: String,
    pub user_id: String,
    pub user_name: String,
    pub admin_id: String,
    /// Id of the interaction that created the record.
    pub message_id: String,
    pub reason: String,
    pub created_at: i64,
    pub evidence: Vec<EvidenceItem>,
    pub action_type: String,
    pub temp_roles: Vec<String>,
    /// Raw JSON `{role_id: epoch_secs}`; kept verbatim so corruption is visible.
    pub roles_remove_at: String,
    pub status: RecordStatus,
}

impl ModerationRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let evidence: String = row.get(8)?;
        let temp_roles: String = row.get(10)?;
        let status: String = row.get(12)?;
        Ok(ModerationRecord {
            punishment_id: row.get(0)?,
            guild_id: row.get(1)?,
            user_id: row.get(2)?,
            user_name: row.get(3)?,
            admin_id: row.get(4)?,
            message_id: row.get(5)?,
            reason: row.get(6)?,
            created_at: row.get(7)?,
            evidence: serde_json::from_str(&evidence).unwrap_or_default(),
            action_type: row.get(9)?,
            temp_roles: serde_json::from_str(&temp_roles).unwrap_or_default(),
            roles_remove_at: row.get(11)?,
            status: RecordStatus::parse(&status),
        })
    }

    /// `None` when the column is empty or not a valid map.
    pub fn removal_schedule(&self) -> Option<BTreeMap<String, i64>> {
        if self.roles_remove_at.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.roles_remove_at).ok()
    }
}

/// Fields supplied when recording a new action.
#[derive(Debug, Clone, Default)]
pub struct NewModerationRecord {
    pub guild_id: String,
    pub user_id: String,
    pub user_name: String,
    pub admin_id: String,
    pub message_id: String,
    pub reason: String,
    pub created_at: i64,
    pub evidence: Vec<EvidenceItem>,
    pub action_type: String,
    pub temp_roles: Vec<String>,
    pub roles_remove_at: BTreeMap<String, i64>,
}

const RECORD_COLUMNS: &str = "punishment_id, guild_id, user_id, user_name, admin_id, message_id, reason, \
     created_at, evidence, action_type, temp_roles, roles_remove_at, status";

pub fn encode_schedule(schedule: &BTreeMap<String, i64>) -> Result<String> {
    Ok(serde_json::to_string(schedule)?)
}

impl Database {
    /// Returns the generated punishment id.
    pub fn add_moderation_record(&self, record: &NewModerationRecord) -> Result<i64> {
        let evidence = serde_json::to_string(&record.evidence)?;
        let temp_roles = serde_json::to_string(&record.temp_roles)?;
        let schedule = if record.roles_remove_at.is_empty() {
            String::new()
        } else {
            encode_schedule(&record.roles_remove_at)?
        };
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO moderation_records
                (guild_id, user_id, user_name, admin_id, message_id, reason, created_at,
                 evidence, action_type, temp_roles, roles_remove_at, status)
             VALUES
                (:guild_id, :user_id, :user_name, :admin_id, :message_id, :reason, :created_at,
                 :evidence, :action_type, :temp_roles, :roles_remove_at, 'active')",
            named_params! {
                ":guild_id": record.guild_id,
                ":user_id": record.user_id,
                ":user_name": record.user_name,
                ":admin_id": record.admin_id,
                ":message_id": record.message_id,
                ":reason": record.reason,
                ":created_at": record.created_at,
                ":evidence": evidence,
                ":action_type": record.action_type,
                ":temp_roles": temp_roles,
                ":roles_remove_at": schedule,
            },
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn get_moderation_record(&self, punishment_id: i64) -> Result<Option<ModerationRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM moderation_records WHERE punishment_id = ?1",
                    RECORD_COLUMNS
                ),
                [punishment_id],
                ModerationRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Every record of one `(guild, user, action)` pair, oldest first.
    pub fn user_action_history(&self, guild_id: &str, user_id: &str, action_type: &str) -> Result<Vec<ModerationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM moderation_records
             WHERE guild_id = ?1 AND user_id = ?2 AND action_type = ?3
             ORDER BY created_at ASC, punishment_id ASC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![guild_id, user_id, action_type], ModerationRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_user_records(&self, guild_id: &str, user_id: &str, action_type: &str) -> Result<i64> {
        let conn = self.conn();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM moderation_records
             WHERE guild_id = ?1 AND user_id = ?2 AND action_type = ?3",
            params![guild_id, user_id, action_type],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Records of `user_id` in this store, newest first.
    pub fn user_records(&self, user_id: &str, limit: usize) -> Result<Vec<ModerationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM moderation_records WHERE user_id = ?1
             ORDER BY created_at DESC, punishment_id DESC LIMIT ?2",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], ModerationRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Record count per guild for `user_id`.
    pub fn user_record_counts(&self, user_id: &str) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT guild_id, COUNT(*) FROM moderation_records WHERE user_id = ?1
             GROUP BY guild_id ORDER BY guild_id",
        )?;
        let rows = stmt
            .query_map([user_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Active records whose removal schedule column is non-empty.
    pub fn active_punishments(&self) -> Result<Vec<ModerationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM moderation_records
             WHERE status = 'active' AND roles_remove_at IS NOT NULL AND roles_remove_at != ''
             ORDER BY punishment_id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], ModerationRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Writes the remaining schedule; an empty one completes the record.
    pub fn update_removal_schedule(&self, punishment_id: i64, schedule: &BTreeMap<String, i64>) -> Result<()> {
        let encoded = encode_schedule(schedule)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if schedule.is_empty() {
            tx.execute(
                "UPDATE moderation_records SET roles_remove_at = ?1, status = 'completed'
                 WHERE punishment_id = ?2",
                params![encoded, punishment_id],
            )?;
        } else {
            tx.execute(
                "UPDATE moderation_records SET roles_remove_at = ?1 WHERE punishment_id = ?2",
                params![encoded, punishment_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_record_status(&self, punishment_id: i64, status: RecordStatus) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE moderation_records SET status = ?1 WHERE punishment_id = ?2",
            params![status.as_str(), punishment_id],
        )?;
        tx.commit()?;
        Ok(n)
    }

    pub fn delete_moderation_record(&self, punishment_id: i64) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "DELETE FROM moderation_records WHERE punishment_id = ?1",
            [punishment_id],
        )?;
        tx.commit()?;
        Ok(n)
    }

    /// `(action_type, count)` for records created at or after `since`
    /// (all time when `None`).
    pub fn count_records_by_action(&self, guild_id: &str, since: Option<i64>) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT action_type, COUNT(*) FROM moderation_records
             WHERE guild_id = ?1 AND created_at >= ?2
             GROUP BY action_type ORDER BY action_type",
        )?;
        let rows = stmt
            .query_map(params![guild_id, since.unwrap_or(i64::MIN)], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_active_records(&self, guild_id: &str) -> Result<i64> {
        let conn = self.conn();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM moderation_records WHERE guild_id = ?1 AND status = 'active'",
            [guild_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}
