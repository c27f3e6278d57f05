//! Per-guild log of recently indexed posts under `new_post/<guild_id>.json`.

use crate::db::Post;
use crate::fsutil::write_atomic;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Posts older than this are pruned by the daily runner.
pub const RETENTION_SECS: i64 = 7 * 24 * 3600;

pub struct NewPostLog {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the files.
    guard: Mutex<()>,
}

impl NewPostLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            guard: Mutex::new(()),
        }
    }

    fn file(&self, guild_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", guild_id))
    }

    fn read(path: &Path) -> Vec<Post> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("New-post log {} is malformed, starting over: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    pub fn load(&self, guild_id: &str) -> Vec<Post> {
        let _g = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        Self::read(&self.file(guild_id))
    }

    /// Appends `post`, replacing an earlier entry with the same id.
    pub fn append(&self, guild_id: &str, post: &Post) -> std::io::Result<()> {
        let _g = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.file(guild_id);
        let mut posts = Self::read(&path);
        posts.retain(|p| p.id != post.id);
        posts.push(post.clone());
        write_atomic(&path, &serde_json::to_vec_pretty(&posts)?)
    }

    /// Drops entries created before `now - RETENTION_SECS` from every guild
    /// file. Returns the number removed.
    pub fn prune(&self, now: i64) -> std::io::Result<usize> {
        let _g = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = now - RETENTION_SECS;
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mut posts = Self::read(&path);
            let before = posts.len();
            posts.retain(|p| p.created_at >= cutoff);
            if posts.len() != before {
                removed += before - posts.len();
                write_atomic(&path, &serde_json::to_vec_pretty(&posts)?)?;
            }
        }
        debug!("New-post log: pruned {} entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, created_at: i64) -> Post {
        Post {
            id: id.into(),
            created_at,
            ..Default::default()
        }
    }

    #[test]
    fn test_append_dedupes_and_prune_drops_old() {
        let dir = tempfile::tempdir().unwrap();
        let log = NewPostLog::new(dir.path());
        let now = 10 * RETENTION_SECS;
        log.append("g", &post("a", now - RETENTION_SECS - 1)).unwrap();
        log.append("g", &post("b", now - 10)).unwrap();
        log.append("g", &post("b", now - 5)).unwrap();
        assert_eq!(log.load("g").len(), 2);

        assert_eq!(log.prune(now).unwrap(), 1);
        let left = log.load("g");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].created_at, now - 5);
    }
}
