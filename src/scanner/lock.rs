//! `scan_lock.json`: last scan mode, when it finished, and how many daily
//! active scans ran since the last full one.

use super::ScanMode;
use crate::fsutil::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A full scan newer than this makes the boot scan active-only.
pub const RECENT_SCAN_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanLock {
    pub scan_mode: String,
    pub timestamp: i64,
    #[serde(default)]
    pub active_scan_count: i64,
}

impl ScanLock {
    pub fn mode(&self) -> Option<ScanMode> {
        ScanMode::parse(&self.scan_mode)
    }
}

pub struct ScanLockFile {
    path: PathBuf,
}

impl ScanLockFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files read as `None`.
    pub fn load(&self) -> Option<ScanLock> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!("Scan lock {} is malformed: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, lock: &ScanLock) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(lock)?;
        write_atomic(&self.path, &data)
    }

    /// Read-modify-write; concurrent writers race and the last one wins.
    pub fn update<F>(&self, f: F) -> std::io::Result<ScanLock>
    where
        F: FnOnce(&mut ScanLock),
    {
        let mut lock = self.load().unwrap_or_default();
        f(&mut lock);
        self.save(&lock)?;
        Ok(lock)
    }

    /// Stamps a finished scan, keeping the active-scan counter.
    pub fn record_scan(&self, mode: ScanMode, now: i64) -> std::io::Result<ScanLock> {
        self.update(|lock| {
            lock.scan_mode = mode.as_str().to_string();
            lock.timestamp = now;
        })
    }

    /// Mode for the boot scan: active only after a full scan in the last 24 h.
    pub fn initial_mode(&self, now: i64) -> ScanMode {
        match self.load() {
            Some(lock)
                if lock.mode() == Some(ScanMode::Full)
                    && now - lock.timestamp < RECENT_SCAN_SECS
                    && lock.timestamp <= now =>
            {
                ScanMode::Active
            }
            _ => ScanMode::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_mode_selection() {
        let dir = tempfile::tempdir().unwrap();
        let file = ScanLockFile::new(&dir.path().join("scan_lock.json"));
        let now = 1_700_000_000;
        assert_eq!(file.initial_mode(now), ScanMode::Full);

        file.record_scan(ScanMode::Full, now - 3600).unwrap();
        assert_eq!(file.initial_mode(now), ScanMode::Active);

        file.record_scan(ScanMode::Full, now - RECENT_SCAN_SECS - 1).unwrap();
        assert_eq!(file.initial_mode(now), ScanMode::Full);

        file.record_scan(ScanMode::Active, now - 60).unwrap();
        assert_eq!(file.initial_mode(now), ScanMode::Full);
    }

    #[test]
    fn test_record_scan_keeps_counter() {
        let dir = tempfile::tempdir().unwrap();
        let file = ScanLockFile::new(&dir.path().join("scan_lock.json"));
        file.update(|l| l.active_scan_count = 7).unwrap();
        let lock = file.record_scan(ScanMode::Active, 42).unwrap();
        assert_eq!(lock.active_scan_count, 7);
        assert_eq!(file.load().unwrap().scan_mode, "active");
    }

    #[test]
    fn test_malformed_lock_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_lock.json");
        std::fs::write(&path, "{").unwrap();
        assert!(ScanLockFile::new(&path).load().is_none());
    }
}
