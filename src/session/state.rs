//! In-memory state shared by interaction handlers.

use crate::db::UpdateMode;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// The same preset is refused within this window, whichever channel it targets.
pub const PRESET_COOLDOWN_SECS: i64 = 30;
/// Entries older than this are dropped by the hourly sweep.
pub const COOLDOWN_MAX_AGE_SECS: i64 = 3600;
pub const SELECTION_CAPACITY: usize = 1000;

#[derive(Default)]
pub struct PresetCooldowns {
    last_used: Mutex<HashMap<String, i64>>,
}

impl PresetCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a use of `preset_id` unless it is cooling down.
    /// Returns the seconds left when the use is refused.
    pub fn try_use(&self, preset_id: &str, now: i64) -> Result<(), i64> {
        let mut map = self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&at) = map.get(preset_id) {
            let elapsed = now - at;
            if elapsed < PRESET_COOLDOWN_SECS {
                return Err(PRESET_COOLDOWN_SECS - elapsed);
            }
        }
        map.insert(preset_id.to_string(), now);
        Ok(())
    }

    pub fn sweep(&self, now: i64) -> usize {
        let mut map = self.last_used.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, at| now - *at <= COOLDOWN_MAX_AGE_SECS);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.last_used.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partitions picked in the navigation setup menu, waiting for confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct NavSelection {
    pub user_id: String,
    pub slot: u8,
    pub update_mode: UpdateMode,
    pub table_names: Vec<String>,
}

/// Keyed by the id of the message carrying the menu.
pub struct SelectionCache {
    cache: Mutex<LruCache<String, NavSelection>>,
}

impl SelectionCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn put(&self, message_id: &str, selection: NavSelection) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(message_id.to_string(), selection);
    }

    pub fn get(&self, message_id: &str) -> Option<NavSelection> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(message_id).cloned()
    }

    pub fn take(&self, message_id: &str) -> Option<NavSelection> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.pop(message_id)
    }
}

pub struct SessionState {
    pub cooldowns: PresetCooldowns,
    pub selections: SelectionCache,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            cooldowns: PresetCooldowns::new(),
            selections: SelectionCache::new(SELECTION_CAPACITY),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_window() {
        let cd = PresetCooldowns::new();
        assert!(cd.try_use("p", 100).is_ok());
        assert_eq!(cd.try_use("p", 110), Err(20));
        assert!(cd.try_use("q", 110).is_ok());
        assert!(cd.try_use("p", 130).is_ok());
    }

    #[test]
    fn test_sweep_drops_entries_older_than_an_hour() {
        let cd = PresetCooldowns::new();
        cd.try_use("old", 0).unwrap();
        cd.try_use("new", 3000).unwrap();
        assert_eq!(cd.sweep(3700), 1);
        assert_eq!(cd.len(), 1);
    }

    #[test]
    fn test_selection_cache_lru() {
        let cache = SelectionCache::new(2);
        let sel = |slot| NavSelection {
            user_id: "u".into(),
            slot,
            update_mode: UpdateMode::Edit,
            table_names: vec!["art_0001".into()],
        };
        cache.put("m1", sel(1));
        cache.put("m2", sel(2));
        assert!(cache.get("m1").is_some());
        cache.put("m3", sel(3));
        assert!(cache.get("m2").is_none());
        assert_eq!(cache.take("m1").map(|s| s.slot), Some(1));
        assert!(cache.get("m1").is_none());
    }
}
