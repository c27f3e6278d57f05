//! Removes temporary roles once their scheduled time has passed.

use super::levels::real_roles;
use crate::db::{ModerationRecord, StoreManager};
use crate::error::Result;
use crate::platform::PlatformClient;
use crate::settings::{ActionConfig, ConfigSnapshot, ConfigStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerSummary {
    pub checked: usize,
    pub roles_removed: usize,
    pub completed: usize,
    pub reconstructed: usize,
    pub skipped: usize,
}

/// Rebuilds a removal schedule for a record whose stored one is unusable.
///
/// A level whose added-role set equals the record's roles wins when it is
/// the only such level. Otherwise a single timeout shared by every level that
/// sets one is accepted. Anything else is ambiguous and yields `None`.
pub fn reconstruct_schedule(record: &ModerationRecord, action: &ActionConfig) -> Option<BTreeMap<String, i64>> {
    let roles: BTreeSet<&String> = real_roles(&record.temp_roles).collect();
    if roles.is_empty() {
        return Some(BTreeMap::new());
    }

    let matching: Vec<i64> = action
        .levels
        .values()
        .filter(|l| real_roles(&l.add_role_ids).collect::<BTreeSet<_>>() == roles)
        .map(|l| l.add_role_timeout_minutes)
        .collect();
    let minutes = match matching.as_slice() {
        [m] if *m > 0 => *m,
        _ => {
            let timeouts: BTreeSet<i64> = action
                .levels
                .values()
                .map(|l| l.add_role_timeout_minutes)
                .filter(|m| *m > 0)
                .collect();
            if timeouts.len() != 1 {
                return None;
            }
            *timeouts.iter().next()?
        }
    };

    let remove_at = record.created_at + minutes * 60;
    Some(roles.into_iter().map(|r| (r.clone(), remove_at)).collect())
}

pub struct PunishmentTimer {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
}

impl PunishmentTimer {
    pub fn new(platform: Arc<dyn PlatformClient>, stores: Arc<StoreManager>, config: Arc<ConfigStore>) -> Self {
        Self {
            platform,
            stores,
            config,
        }
    }

    /// Guilds whose stores may hold moderation records.
    fn guild_ids(snapshot: &ConfigSnapshot) -> Vec<String> {
        let ids: BTreeSet<&String> = snapshot.moderation.keys().chain(snapshot.tasks.keys()).collect();
        ids.into_iter().cloned().collect()
    }

    /// One pass over every active record. Records are handled sequentially.
    pub async fn tick(&self, now: i64) -> TimerSummary {
        let snapshot = self.config.get();
        let mut summary = TimerSummary::default();
        for guild_id in Self::guild_ids(&snapshot) {
            if let Err(e) = self.tick_guild(&snapshot, &guild_id, now, &mut summary).await {
                warn!("Punishment timer: guild {} failed: {}", guild_id, e);
            }
        }
        if summary.checked > 0 {
            info!(
                "Punishment timer: checked {}, removed {} role(s), completed {}, reconstructed {}, skipped {}",
                summary.checked, summary.roles_removed, summary.completed, summary.reconstructed, summary.skipped
            );
        }
        summary
    }

    async fn tick_guild(
        &self,
        snapshot: &ConfigSnapshot,
        guild_id: &str,
        now: i64,
        summary: &mut TimerSummary,
    ) -> Result<()> {
        let db = self.stores.guild(guild_id)?;
        let records = db.run_blocking(|db| db.active_punishments()).await?;

        for record in records {
            summary.checked += 1;
            let schedule = match record.removal_schedule() {
                Some(s) => s,
                None => {
                    let rebuilt = snapshot
                        .action(guild_id, &record.action_type)
                        .and_then(|a| reconstruct_schedule(&record, a));
                    match rebuilt {
                        Some(s) => {
                            summary.reconstructed += 1;
                            debug!("Punishment timer: rebuilt schedule of record {}", record.punishment_id);
                            s
                        }
                        None => {
                            summary.skipped += 1;
                            warn!(
                                "Punishment timer: record {} has an unusable schedule {:?}, skipping",
                                record.punishment_id, record.roles_remove_at
                            );
                            continue;
                        }
                    }
                }
            };

            let mut remaining = schedule.clone();
            for (role, remove_at) in &schedule {
                if now <= *remove_at {
                    continue;
                }
                match self.platform.remove_role(guild_id, &record.user_id, role).await {
                    Ok(()) => {
                        remaining.remove(role);
                        summary.roles_removed += 1;
                    }
                    Err(e) if e.is_not_found() => {
                        // Member left or role deleted; nothing left to undo.
                        remaining.remove(role);
                    }
                    Err(e) => warn!(
                        "Punishment timer: removing role {} from {} failed, will retry: {}",
                        role, record.user_id, e
                    ),
                }
            }

            if remaining.is_empty() {
                summary.completed += 1;
            }
            if remaining != schedule || remaining.is_empty() || record.removal_schedule().is_none() {
                let id = record.punishment_id;
                db.run_blocking(move |db| db.update_removal_schedule(id, &remaining))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewModerationRecord, RecordStatus};
    use crate::platform::fake::FakePlatform;
    use crate::platform::MemberInfo;
    use crate::settings::LevelConfig;

    fn record(temp_roles: &[&str], created_at: i64) -> ModerationRecord {
        ModerationRecord {
            punishment_id: 1,
            guild_id: "g".into(),
            user_id: "u".into(),
            user_name: String::new(),
            admin_id: String::new(),
            message_id: String::new(),
            reason: String::new(),
            created_at,
            evidence: vec![],
            action_type: "mute".into(),
            temp_roles: temp_roles.iter().map(|s| s.to_string()).collect(),
            roles_remove_at: "garbage".into(),
            status: RecordStatus::Active,
        }
    }

    fn action(levels: &[(&str, &[&str], i64)]) -> ActionConfig {
        let mut a = ActionConfig::default();
        for (k, roles, minutes) in levels {
            a.levels.insert(
                k.to_string(),
                LevelConfig {
                    add_role_ids: roles.iter().map(|s| s.to_string()).collect(),
                    add_role_timeout_minutes: *minutes,
                    ..Default::default()
                },
            );
        }
        a
    }

    #[test]
    fn test_reconstruct_unique_level() {
        let a = action(&[("0", &["r1"], 60), ("1", &["r2"], 180)]);
        let s = reconstruct_schedule(&record(&["r2"], 1000), &a).unwrap();
        assert_eq!(s.get("r2"), Some(&(1000 + 180 * 60)));
    }

    #[test]
    fn test_reconstruct_ambiguous_is_skipped() {
        let a = action(&[("0", &["r1"], 60), ("1", &["r1"], 120)]);
        assert!(reconstruct_schedule(&record(&["r1"], 0), &a).is_none());

        // Identical sets but one shared timeout across the action.
        let a = action(&[("0", &["r1"], 60), ("1", &["r1"], 60)]);
        assert!(reconstruct_schedule(&record(&["r1"], 0), &a).is_some());
    }

    #[tokio::test]
    async fn test_failed_removal_is_retained() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.moderation.entry("g".into()).or_default();
        let fake = Arc::new(FakePlatform::new());
        fake.add_member(
            "g",
            MemberInfo {
                user_id: "u".into(),
                roles: vec!["ok".into(), "stuck".into()],
                ..Default::default()
            },
        );
        fake.fail_role("stuck");
        let stores = Arc::new(StoreManager::in_memory());
        let db = stores.guild("g").unwrap();
        let id = db
            .add_moderation_record(&NewModerationRecord {
                guild_id: "g".into(),
                user_id: "u".into(),
                action_type: "mute".into(),
                created_at: 0,
                temp_roles: vec!["ok".into(), "stuck".into()],
                roles_remove_at: [("ok".to_string(), 10), ("stuck".to_string(), 10)].into(),
                ..Default::default()
            })
            .unwrap();

        let timer = PunishmentTimer::new(fake, stores, Arc::new(ConfigStore::from_snapshot(snapshot)));
        let summary = timer.tick(100).await;
        assert_eq!(summary.roles_removed, 1);
        let rec = db.get_moderation_record(id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Active);
        assert_eq!(rec.removal_schedule().unwrap().keys().collect::<Vec<_>>(), vec!["stuck"]);
    }

    #[tokio::test]
    async fn test_empty_schedule_completes() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.moderation.entry("g".into()).or_default();
        let stores = Arc::new(StoreManager::in_memory());
        let db = stores.guild("g").unwrap();
        let id = db
            .add_moderation_record(&NewModerationRecord {
                guild_id: "g".into(),
                user_id: "u".into(),
                action_type: "mute".into(),
                roles_remove_at: [("r".to_string(), 10)].into(),
                ..Default::default()
            })
            .unwrap();
        db.update_removal_schedule(id, &[("r".to_string(), 10)].into()).unwrap();
        // Simulate an emptied map that was never completed.
        db.conn()
            .execute("UPDATE moderation_records SET roles_remove_at = '{}', status = 'active'", [])
            .unwrap();

        let timer = PunishmentTimer::new(
            Arc::new(FakePlatform::new()),
            stores,
            Arc::new(ConfigStore::from_snapshot(snapshot)),
        );
        assert_eq!(timer.tick(0).await.completed, 1);
        assert_eq!(db.get_moderation_record(id).unwrap().unwrap().status, RecordStatus::Completed);
    }
}
