use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Writes `data` to a temporary file next to `path` and renames it into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Deletes regular files under `dir` (recursively) last modified before
/// `max_age` ago. Returns how many were removed.
pub fn sweep_old_files(dir: &Path, max_age: Duration) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let threshold = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    sweep_dir(dir, threshold)
}

fn sweep_dir(dir: &Path, threshold: SystemTime) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            removed += sweep_dir(&entry.path(), threshold)?;
            continue;
        }
        if !metadata.is_file() {
            continue;
        }
        if let Ok(modified) = metadata.modified() {
            if modified < threshold {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!("Failed to delete old file {:?}: {}", entry.path(), e);
                } else {
                    debug!("Removed expired file {:?}", entry.path());
                    removed += 1;
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_sweep_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("u1");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("a-1.png"), b"x").unwrap();

        assert_eq!(sweep_old_files(dir.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(sweep_old_files(dir.path(), Duration::ZERO).unwrap(), 1);
        assert!(!sub.join("a-1.png").exists());
        assert_eq!(sweep_old_files(&dir.path().join("missing"), Duration::ZERO).unwrap(), 0);
    }
}
