use super::Database;
use crate::error::{BotError, Result};
use rusqlite::{named_params, params, OptionalExtension, Row};

pub const MAX_SLOTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Edit,
    Delete,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Edit => "edit",
            UpdateMode::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "edit" => Some(UpdateMode::Edit),
            "delete" => Some(UpdateMode::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonalNavigation {
    pub id: i64,
    pub user_id: String,
    pub guild_id: String,
    pub slot: u8,
    pub table_names: Vec<String>,
    pub channel_ids: Vec<String>,
    pub channel_names: Vec<String>,
    pub message_channel_id: String,
    pub my_works_message_ids: Vec<String>,
    pub top_works_message_id: String,
    pub latest_works_message_id: String,
    pub update_mode: UpdateMode,
}

fn split(raw: String) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl PersonalNavigation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mode: String = row.get(11)?;
        let slot: i64 = row.get(3)?;
        Ok(PersonalNavigation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            guild_id: row.get(2)?,
            slot: slot as u8,
            table_names: split(row.get(4)?),
            channel_ids: split(row.get(5)?),
            channel_names: split(row.get(6)?),
            message_channel_id: row.get(7)?,
            my_works_message_ids: split(row.get(8)?),
            top_works_message_id: row.get(9)?,
            latest_works_message_id: row.get(10)?,
            update_mode: UpdateMode::parse(&mode).unwrap_or(UpdateMode::Edit),
        })
    }
}

const NAV_COLUMNS: &str = "id, user_id, guild_id, slot, table_names, channel_ids, channel_names, \
     message_channel_id, my_works_message_ids, top_works_message_id, latest_works_message_id, update_mode";

impl Database {
    /// Inserts or overrides the `(user, guild, slot)` row and returns its id.
    pub fn upsert_navigation(&self, nav: &PersonalNavigation) -> Result<i64> {
        if nav.slot < 1 || nav.slot > MAX_SLOTS {
            return Err(BotError::InvalidInput(format!("slot {}", nav.slot)));
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO personal_navigations
                (user_id, guild_id, slot, table_names, channel_ids, channel_names, message_channel_id,
                 my_works_message_ids, top_works_message_id, latest_works_message_id, update_mode)
             VALUES
                (:user_id, :guild_id, :slot, :table_names, :channel_ids, :channel_names, :message_channel_id,
                 :my_works, :top_works, :latest_works, :update_mode)
             ON CONFLICT (user_id, guild_id, slot) DO UPDATE SET
                table_names = excluded.table_names,
                channel_ids = excluded.channel_ids,
                channel_names = excluded.channel_names,
                message_channel_id = excluded.message_channel_id,
                my_works_message_ids = excluded.my_works_message_ids,
                top_works_message_id = excluded.top_works_message_id,
                latest_works_message_id = excluded.latest_works_message_id,
                update_mode = excluded.update_mode",
            named_params! {
                ":user_id": nav.user_id,
                ":guild_id": nav.guild_id,
                ":slot": nav.slot as i64,
                ":table_names": nav.table_names.join(","),
                ":channel_ids": nav.channel_ids.join(","),
                ":channel_names": nav.channel_names.join(","),
                ":message_channel_id": nav.message_channel_id,
                ":my_works": nav.my_works_message_ids.join(","),
                ":top_works": nav.top_works_message_id,
                ":latest_works": nav.latest_works_message_id,
                ":update_mode": nav.update_mode.as_str(),
            },
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM personal_navigations WHERE user_id = ?1 AND guild_id = ?2 AND slot = ?3",
            params![nav.user_id, nav.guild_id, nav.slot as i64],
            |r| r.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_navigation(&self, user_id: &str, guild_id: &str, slot: u8) -> Result<Option<PersonalNavigation>> {
        let conn = self.conn();
        let nav = conn
            .query_row(
                &format!(
                    "SELECT {} FROM personal_navigations WHERE user_id = ?1 AND guild_id = ?2 AND slot = ?3",
                    NAV_COLUMNS
                ),
                params![user_id, guild_id, slot as i64],
                PersonalNavigation::from_row,
            )
            .optional()?;
        Ok(nav)
    }

    pub fn user_navigations(&self, user_id: &str, guild_id: &str) -> Result<Vec<PersonalNavigation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM personal_navigations WHERE user_id = ?1 AND guild_id = ?2 ORDER BY slot",
            NAV_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, guild_id], PersonalNavigation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn all_navigations(&self) -> Result<Vec<PersonalNavigation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM personal_navigations ORDER BY id",
            NAV_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], PersonalNavigation::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_navigation_messages(
        &self,
        id: i64,
        my_works: &[String],
        top_works: &str,
        latest_works: &str,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE personal_navigations
             SET my_works_message_ids = ?1, top_works_message_id = ?2, latest_works_message_id = ?3
             WHERE id = ?4",
            params![my_works.join(","), top_works, latest_works, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_navigation(&self, user_id: &str, guild_id: &str, slot: u8) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "DELETE FROM personal_navigations WHERE user_id = ?1 AND guild_id = ?2 AND slot = ?3",
            params![user_id, guild_id, slot as i64],
        )?;
        tx.commit()?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav(slot: u8) -> PersonalNavigation {
        PersonalNavigation {
            id: 0,
            user_id: "u1".into(),
            guild_id: "g".into(),
            slot,
            table_names: vec!["art_1234".into()],
            channel_ids: vec!["1234".into()],
            channel_names: vec!["art".into()],
            message_channel_id: "c".into(),
            my_works_message_ids: vec!["m1".into()],
            top_works_message_id: "m2".into(),
            latest_works_message_id: "m3".into(),
            update_mode: UpdateMode::Edit,
        }
    }

    #[test]
    fn test_upsert_overrides_slot() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        let id = db.upsert_navigation(&nav(1)).unwrap();
        let mut changed = nav(1);
        changed.update_mode = UpdateMode::Delete;
        changed.my_works_message_ids = vec!["m1".into(), "m4".into()];
        assert_eq!(db.upsert_navigation(&changed).unwrap(), id);

        let stored = db.get_navigation("u1", "g", 1).unwrap().unwrap();
        assert_eq!(stored.update_mode, UpdateMode::Delete);
        assert_eq!(stored.my_works_message_ids, vec!["m1", "m4"]);
        assert_eq!(db.user_navigations("u1", "g").unwrap().len(), 1);
    }

    #[test]
    fn test_slot_bounds() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        assert!(db.upsert_navigation(&nav(0)).is_err());
        assert!(db.upsert_navigation(&nav(4)).is_err());
        db.upsert_navigation(&nav(3)).unwrap();
        assert_eq!(db.delete_navigation("u1", "g", 3).unwrap(), 1);
        assert!(db.all_navigations().unwrap().is_empty());
    }
}
