use super::Database;
use crate::error::Result;
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPreferences {
    pub user_id: String,
    pub preferred_tag: Option<String>,
    pub excluded_tags: Vec<String>,
}

impl Database {
    pub fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT preferred_tag, excluded_tags FROM user_preferences WHERE user_id = ?1",
                [user_id],
                |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((preferred_tag, excluded)) => UserPreferences {
                user_id: user_id.to_string(),
                preferred_tag: preferred_tag.filter(|t| !t.is_empty()),
                excluded_tags: excluded
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(|t| t.to_string())
                    .collect(),
            },
            None => UserPreferences {
                user_id: user_id.to_string(),
                ..Default::default()
            },
        })
    }

    pub fn set_preferences(&self, prefs: &UserPreferences, now: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO user_preferences (user_id, preferred_tag, excluded_tags, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                preferred_tag = excluded.preferred_tag,
                excluded_tags = excluded.excluded_tags,
                updated_at = excluded.updated_at",
            params![
                prefs.user_id,
                prefs.preferred_tag,
                prefs.excluded_tags.join(","),
                now
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
