//! Partition tables holding indexed forum posts.

use super::{schema, Database};
use crate::error::{BotError, Result};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub author_name: String,
    pub author_id: String,
    pub content: String,
    /// Comma-joined tag ids.
    pub tags: String,
    pub message_count: i64,
    pub created_at: i64,
    pub cover_image_url: Option<String>,
}

impl Post {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id: row.get(0)?,
            channel_id: row.get(1)?,
            title: row.get(2)?,
            author_name: row.get(3)?,
            author_id: row.get(4)?,
            content: row.get(5)?,
            tags: row.get(6)?,
            message_count: row.get(7)?,
            created_at: row.get(8)?,
            cover_image_url: row.get(9)?,
        })
    }

    pub fn tag_ids(&self) -> Vec<&str> {
        self.tags.split(',').filter(|t| !t.is_empty()).collect()
    }
}

/// A post together with the partition table it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedPost {
    pub table: String,
    pub post: Post,
}

/// `<partition>_<last 4 chars of channel id>`
pub fn partition_table(partition: &str, channel_id: &str) -> String {
    let chars: Vec<char> = channel_id.chars().collect();
    let start = chars.len().saturating_sub(4);
    let suffix: String = chars[start..].iter().collect();
    format!("{}_{}", partition, suffix)
}

/// Validates a table name and returns it double-quoted for interpolation.
pub fn quote_table(table: &str) -> Result<String> {
    let valid = !table.is_empty()
        && table.len() <= 128
        && table
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(BotError::InvalidInput(format!("table name {:?}", table)));
    }
    Ok(format!("\"{}\"", table))
}

impl Database {
    pub fn ensure_post_table(&self, table: &str) -> Result<()> {
        let quoted = quote_table(table)?;
        let index = quote_table(&format!("idx_{}_author", table))?;
        self.conn()
            .execute_batch(&schema::post_table_sql(&quoted, &index))?;
        Ok(())
    }

    /// Subset of `tables` that exist in this database, in input order.
    pub fn existing_tables(&self, tables: &[String]) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let present: HashSet<String> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(tables.iter().filter(|t| present.contains(*t)).cloned().collect())
    }

    /// Upsert by id; a later scan replaces counts, tags and cover.
    pub fn insert_post(&self, table: &str, post: &Post) -> Result<()> {
        let quoted = quote_table(table)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                quoted,
                schema::POST_COLUMNS
            ),
            params![
                post.id,
                post.channel_id,
                post.title,
                post.author_name,
                post.author_id,
                post.content,
                post.tags,
                post.message_count,
                post.created_at,
                post.cover_image_url,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Refreshes thread metadata without touching the starter message fields.
    pub fn update_post_metadata(
        &self,
        table: &str,
        id: &str,
        title: &str,
        tags: &str,
        message_count: i64,
    ) -> Result<usize> {
        let quoted = quote_table(table)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let n = tx.execute(
            &format!(
                "UPDATE {} SET title = ?1, tags = ?2, message_count = ?3 WHERE id = ?4",
                quoted
            ),
            params![title, tags, message_count, id],
        )?;
        tx.commit()?;
        Ok(n)
    }

    pub fn post_ids(&self, table: &str) -> Result<Vec<String>> {
        let quoted = quote_table(table)?;
        if self.existing_tables(&[table.to_string()])?.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT id FROM {}", quoted))?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn get_post(&self, table: &str, id: &str) -> Result<Option<Post>> {
        let quoted = quote_table(table)?;
        let conn = self.conn();
        let post = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", schema::POST_COLUMNS, quoted),
                [id],
                Post::from_row,
            )
            .optional()?;
        Ok(post)
    }

    pub fn delete_post(&self, table: &str, id: &str) -> Result<usize> {
        self.delete_posts(table, &[id.to_string()])
    }

    pub fn delete_posts(&self, table: &str, ids: &[String]) -> Result<usize> {
        let quoted = quote_table(table)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", quoted))?;
            for id in ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Random sample across partitions. Tag filters are substring matches
    /// on the comma-joined tag column.
    pub fn random_posts(
        &self,
        tables: &[String],
        n: usize,
        tag: Option<&str>,
        excluded_tags: &[String],
    ) -> Result<Vec<SourcedPost>> {
        let tables = self.existing_tables(tables)?;
        if tables.is_empty() || n == 0 {
            return Ok(Vec::new());
        }

        let mut filters = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            filters.push("tags LIKE ?".to_string());
            args.push(format!("%{}%", tag));
        }
        for ex in excluded_tags.iter().filter(|t| !t.is_empty()) {
            filters.push("tags NOT LIKE ?".to_string());
            args.push(format!("%{}%", ex));
        }
        let where_clause = if filters.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", filters.join(" AND "))
        };

        let mut selects = Vec::new();
        let mut bound: Vec<String> = Vec::new();
        for table in &tables {
            let quoted = quote_table(table)?;
            selects.push(format!(
                "SELECT {}, ? AS source_table FROM {}{}",
                schema::POST_COLUMNS,
                quoted,
                where_clause
            ));
            bound.push(table.clone());
            bound.extend(args.iter().cloned());
        }
        let sql = format!(
            "SELECT * FROM ({}) ORDER BY RANDOM() LIMIT {}",
            selects.join(" UNION ALL "),
            n
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok(SourcedPost {
                    post: Post::from_row(row)?,
                    table: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of posts created in `[start, end)` across `tables`.
    pub fn count_posts_in_range(&self, tables: &[String], start: i64, end: i64) -> Result<i64> {
        let tables = self.existing_tables(tables)?;
        if tables.is_empty() {
            return Ok(0);
        }
        let mut selects = Vec::new();
        for table in &tables {
            selects.push(format!(
                "SELECT COUNT(*) AS c FROM {} WHERE created_at >= ?1 AND created_at < ?2",
                quote_table(table)?
            ));
        }
        let sql = format!(
            "SELECT COALESCE(SUM(c), 0) FROM ({})",
            selects.join(" UNION ALL ")
        );
        let conn = self.conn();
        let total: i64 = conn.query_row(&sql, params![start, end], |r| r.get(0))?;
        Ok(total)
    }

    pub fn posts_by_author(&self, table: &str, author_id: &str) -> Result<Vec<Post>> {
        if self.existing_tables(&[table.to_string()])?.is_empty() {
            return Ok(Vec::new());
        }
        let quoted = quote_table(table)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE author_id = ?1 ORDER BY created_at DESC",
            schema::POST_COLUMNS,
            quoted
        ))?;
        let posts = stmt
            .query_map([author_id], Post::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    /// Most-replied posts across `tables`, skipping `excluded_ids`.
    pub fn top_posts(&self, tables: &[String], limit: usize, excluded_ids: &[String]) -> Result<Vec<SourcedPost>> {
        let tables = self.existing_tables(tables)?;
        if tables.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut selects = Vec::new();
        let mut bound: Vec<String> = Vec::new();
        for table in &tables {
            selects.push(format!(
                "SELECT {}, ? AS source_table FROM {}",
                schema::POST_COLUMNS,
                quote_table(table)?
            ));
            bound.push(table.clone());
        }
        let sql = format!(
            "SELECT * FROM ({}) ORDER BY message_count DESC, created_at DESC",
            selects.join(" UNION ALL ")
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bound.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let post = Post::from_row(row)?;
            if excluded_ids.contains(&post.id) {
                continue;
            }
            out.push(SourcedPost {
                post,
                table: row.get(10)?,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
