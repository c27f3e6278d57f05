//! Moderation engine: escalating actions, revocation and record deletion.

use crate::db::{ModerationRecord, NewModerationRecord, StoreManager};
use crate::error::{BotError, Result};
use crate::platform::message::{Embed, MessagePayload};
use crate::platform::PlatformClient;
use crate::settings::{ConfigStore, LevelConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub mod evidence;
pub mod levels;
pub mod report;
pub mod timer;

pub use evidence::{parse_message_links, EvidenceArchive, MessageLink};
pub use levels::{select_level, TimeoutAction};
pub use timer::PunishmentTimer;

const DEFAULT_COLOR: u32 = 0xED4245;
const HISTORY_LIMIT: usize = 10;

/// Everything needed to apply one action.
#[derive(Debug, Clone, Default)]
pub struct PunishRequest {
    pub guild_id: String,
    /// Channel the command was issued in; receives the public notice.
    pub channel_id: String,
    pub admin_id: String,
    pub user_id: String,
    pub action_type: String,
    pub reason: String,
    pub evidence_links: Vec<MessageLink>,
    pub interaction_id: String,
    pub now: i64,
}

#[derive(Debug, Clone)]
pub struct PunishOutcome {
    pub punishment_id: i64,
    pub level: usize,
    pub timeout: TimeoutAction,
    pub removed_roles: Vec<String>,
    pub temp_roles: Vec<String>,
    pub roles_remove_at: BTreeMap<String, i64>,
    pub public_message_id: Option<String>,
    pub dm_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub punishment_id: i64,
    pub user_id: String,
    pub roles_removed: Vec<String>,
    pub recovery_granted: bool,
}

pub struct ModerationEngine {
    platform: Arc<dyn PlatformClient>,
    stores: Arc<StoreManager>,
    config: Arc<ConfigStore>,
    evidence: EvidenceArchive,
}

impl ModerationEngine {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        stores: Arc<StoreManager>,
        config: Arc<ConfigStore>,
        evidence: EvidenceArchive,
    ) -> Self {
        Self {
            platform,
            stores,
            config,
            evidence,
        }
    }

    pub fn evidence(&self) -> &EvidenceArchive {
        &self.evidence
    }

    /// Applies the next escalation level of `req.action_type` to the target.
    pub async fn apply(&self, req: &PunishRequest) -> Result<PunishOutcome> {
        let snapshot = self.config.get();
        let action = snapshot
            .action(&req.guild_id, &req.action_type)
            .ok_or_else(|| BotError::NotFound(format!("处罚类型 {}", req.action_type)))?;

        let db = self.stores.guild(&req.guild_id)?;
        let (g, u, a) = (req.guild_id.clone(), req.user_id.clone(), req.action_type.clone());
        let prior = db
            .run_blocking(move |db| db.count_user_records(&g, &u, &a))
            .await?;
        let (level, cfg) = select_level(action, prior.max(0) as usize)
            .ok_or_else(|| BotError::Config(format!("action {} has no levels", req.action_type)))?;

        let member = self.platform.get_member(&req.guild_id, &req.user_id).await?;
        if let Some(role) = cfg.whitelist_role_ids.iter().find(|r| member.roles.contains(r)) {
            info!("Moderation: {} is whitelisted by role {}, refusing", req.user_id, role);
            return Err(BotError::Whitelisted(role.clone()));
        }

        // Collected before any member change so a failure leaves nothing to undo.
        let evidence = self.evidence.archive(&req.user_id, &req.evidence_links).await?;

        let mut removed_roles = Vec::new();
        for role in levels::real_roles(&cfg.remove_role_ids) {
            match self.platform.remove_role(&req.guild_id, &req.user_id, role).await {
                Ok(()) => removed_roles.push(role.clone()),
                Err(e) => warn!("Moderation: removing role {} from {} failed: {}", role, req.user_id, e),
            }
        }

        let timeout = TimeoutAction::parse(&cfg.timeout);
        match timeout {
            TimeoutAction::Ban => {
                if let Err(e) = self.platform.ban(&req.guild_id, &req.user_id, &req.reason).await {
                    warn!("Moderation: ban of {} failed: {}", req.user_id, e);
                }
            }
            TimeoutAction::Days(days) => {
                let until = req.now + days * 86_400;
                if let Err(e) = self
                    .platform
                    .timeout_member(&req.guild_id, &req.user_id, Some(until))
                    .await
                {
                    warn!("Moderation: timeout of {} failed: {}", req.user_id, e);
                }
            }
            TimeoutAction::None => {}
        }

        let mut temp_roles = Vec::new();
        let mut roles_remove_at = BTreeMap::new();
        for role in levels::real_roles(&cfg.add_role_ids) {
            match self.platform.add_role(&req.guild_id, &req.user_id, role).await {
                Ok(()) => {
                    temp_roles.push(role.clone());
                    if cfg.add_role_timeout_minutes > 0 {
                        roles_remove_at.insert(role.clone(), req.now + cfg.add_role_timeout_minutes * 60);
                    }
                }
                Err(e) => warn!("Moderation: adding role {} to {} failed: {}", role, req.user_id, e),
            }
        }

        let record = NewModerationRecord {
            guild_id: req.guild_id.clone(),
            user_id: req.user_id.clone(),
            user_name: member.display_name.clone(),
            admin_id: req.admin_id.clone(),
            message_id: req.interaction_id.clone(),
            reason: req.reason.clone(),
            created_at: req.now,
            evidence,
            action_type: req.action_type.clone(),
            temp_roles: temp_roles.clone(),
            roles_remove_at: roles_remove_at.clone(),
        };
        let punishment_id = db.run_blocking(move |db| db.add_moderation_record(&record)).await?;
        info!(
            "Moderation: record {} ({} level {}) stored for {} in guild {}",
            punishment_id, req.action_type, level, req.user_id, req.guild_id
        );

        let action_name = if action.name.is_empty() {
            req.action_type.as_str()
        } else {
            action.name.as_str()
        };
        let notice = self
            .public_notice(req, action_name, level, cfg, timeout, punishment_id)
            .await;
        let public_message_id = match self.platform.send_message(&req.channel_id, &notice).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Moderation: public notice for {} failed: {}", punishment_id, e);
                None
            }
        };
        let dm_sent = self.notify_target(req, action_name, level, timeout).await;

        Ok(PunishOutcome {
            punishment_id,
            level,
            timeout,
            removed_roles,
            temp_roles,
            roles_remove_at,
            public_message_id,
            dm_sent,
        })
    }

    async fn public_notice(
        &self,
        req: &PunishRequest,
        action_name: &str,
        level: usize,
        cfg: &LevelConfig,
        timeout: TimeoutAction,
        punishment_id: i64,
    ) -> MessagePayload {
        let mention = format!("<@{}>", req.user_id);
        let mut embed = Embed::new()
            .title(format!("⚖️ {} · 第 {} 级", action_name, level + 1))
            .description(levels::render_description(
                &cfg.description_template,
                &mention,
                &req.reason,
                level,
                action_name,
            ))
            .color(cfg.color.unwrap_or(DEFAULT_COLOR))
            .field("执行人", format!("<@{}>", req.admin_id), true)
            .field("附加处罚", timeout.describe(), true)
            .footer(format!("记录编号 #{}", punishment_id))
            .timestamp(req.now);

        match self.history_summary(&req.guild_id, &req.user_id).await {
            Ok(summary) => embed = embed.field("历史记录", summary, false),
            Err(e) => warn!("Moderation: history lookup for {} failed: {}", req.user_id, e),
        }
        MessagePayload::embed(embed).mentioning(req.user_id.clone())
    }

    /// Current-guild records plus a count per other guild with records.
    pub async fn history_summary(&self, guild_id: &str, user_id: &str) -> Result<String> {
        let db = self.stores.guild(guild_id)?;
        let u = user_id.to_string();
        let records = db
            .run_blocking(move |db| db.user_records(&u, HISTORY_LIMIT))
            .await?;
        let mut lines: Vec<String> = records
            .iter()
            .map(|r| format!("#{} · {} · <t:{}:d> · {}", r.punishment_id, r.action_type, r.created_at, r.reason))
            .collect();
        if lines.is_empty() {
            lines.push("本服务器无记录".to_string());
        }

        let snapshot = self.config.get();
        let mut guilds: Vec<&String> = snapshot.moderation.keys().chain(snapshot.tasks.keys()).collect();
        guilds.sort();
        guilds.dedup();
        for other in guilds.into_iter().filter(|g| g.as_str() != guild_id) {
            let Ok(other_db) = self.stores.guild(other) else {
                continue;
            };
            let u = user_id.to_string();
            let counts = other_db.run_blocking(move |db| db.user_record_counts(&u)).await?;
            let n: i64 = counts.iter().map(|(_, c)| c).sum();
            if n > 0 {
                let name = snapshot
                    .guild_task(other)
                    .map(|t| t.name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| other.clone());
                lines.push(format!("{}：{} 条记录", name, n));
            }
        }
        Ok(crate::text::truncate_chars(&lines.join("\n"), 1024))
    }

    async fn notify_target(&self, req: &PunishRequest, action_name: &str, level: usize, timeout: TimeoutAction) -> bool {
        let guild_name = self
            .config
            .get()
            .guild_task(&req.guild_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| req.guild_id.clone());
        let embed = Embed::new()
            .title(format!("你在 {} 受到了处罚", guild_name))
            .description(format!("类型：{}（第 {} 级）\n原因：{}", action_name, level + 1, req.reason))
            .field("附加处罚", timeout.describe(), true)
            .color(DEFAULT_COLOR)
            .timestamp(req.now);
        let dm = match self.platform.create_direct_channel(&req.user_id).await {
            Ok(ch) => ch,
            Err(e) => {
                warn!("Moderation: cannot open DM with {}: {}", req.user_id, e);
                return false;
            }
        };
        match self.platform.send_message(&dm, &MessagePayload::embed(embed)).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Moderation: DM to {} failed: {}", req.user_id, e);
                false
            }
        }
    }

    /// Undoes the effects of record `punishment_id` and deletes it.
    pub async fn revoke(&self, guild_id: &str, punishment_id: i64) -> Result<RevokeOutcome> {
        let db = self.stores.guild(guild_id)?;
        let record = db
            .run_blocking(move |db| db.get_moderation_record(punishment_id))
            .await?
            .filter(|r| r.guild_id == guild_id)
            .ok_or_else(|| BotError::NotFound(format!("处罚记录 #{}", punishment_id)))?;

        let level_index = self.record_level(&db, &record).await?;
        let snapshot = self.config.get();
        let level_cfg = snapshot
            .action(guild_id, &record.action_type)
            .and_then(|a| select_level(a, level_index))
            .map(|(_, cfg)| cfg.clone())
            .unwrap_or_default();

        if let Err(e) = self.platform.unban(guild_id, &record.user_id).await {
            if !e.is_not_found() {
                warn!("Moderation: unban of {} failed: {}", record.user_id, e);
            }
        }

        let mut roles_removed = Vec::new();
        let to_remove = levels::real_roles(&level_cfg.add_role_ids)
            .chain(levels::real_roles(&record.temp_roles))
            .cloned()
            .collect::<Vec<_>>();
        for role in to_remove {
            if roles_removed.contains(&role) {
                continue;
            }
            match self.platform.remove_role(guild_id, &record.user_id, &role).await {
                Ok(()) => roles_removed.push(role),
                Err(e) => warn!("Moderation: removing role {} during revoke failed: {}", role, e),
            }
        }

        let mut recovery_granted = false;
        if levels::real_roles(&level_cfg.remove_role_ids).next().is_some() {
            let g = guild_id.to_string();
            let recovery = db
                .run_blocking(move |db| db.get_guild_config(&g))
                .await?
                .and_then(|c| c.recovery_role_id)
                .filter(|r| !r.is_empty() && r != levels::NO_ROLE);
            if let Some(role) = recovery {
                match self.platform.add_role(guild_id, &record.user_id, &role).await {
                    Ok(()) => recovery_granted = true,
                    Err(e) => warn!("Moderation: granting recovery role {} failed: {}", role, e),
                }
            }
        }

        if let Err(e) = self.platform.timeout_member(guild_id, &record.user_id, None).await {
            warn!("Moderation: clearing timeout of {} failed: {}", record.user_id, e);
        }

        db.run_blocking(move |db| db.delete_moderation_record(punishment_id))
            .await?;
        info!("Moderation: record {} revoked for {}", punishment_id, record.user_id);
        Ok(RevokeOutcome {
            punishment_id,
            user_id: record.user_id,
            roles_removed,
            recovery_granted,
        })
    }

    /// Position of `record` within its `(user, guild, action)` history.
    async fn record_level(&self, db: &crate::db::Database, record: &ModerationRecord) -> Result<usize> {
        let (g, u, a) = (record.guild_id.clone(), record.user_id.clone(), record.action_type.clone());
        let history = db
            .run_blocking(move |db| db.user_action_history(&g, &u, &a))
            .await?;
        Ok(history
            .iter()
            .position(|r| r.punishment_id == record.punishment_id)
            .unwrap_or(0))
    }

    /// Hard delete without touching roles.
    pub async fn delete(&self, guild_id: &str, punishment_id: i64) -> Result<()> {
        let db = self.stores.guild(guild_id)?;
        let n = db
            .run_blocking(move |db| db.delete_moderation_record(punishment_id))
            .await?;
        if n == 0 {
            return Err(BotError::NotFound(format!("处罚记录 #{}", punishment_id)));
        }
        info!("Moderation: record {} deleted from guild {}", punishment_id, guild_id);
        Ok(())
    }

    pub async fn get_record(&self, guild_id: &str, punishment_id: i64) -> Result<Option<ModerationRecord>> {
        let db = self.stores.guild(guild_id)?;
        db.run_blocking(move |db| db.get_moderation_record(punishment_id)).await
    }

    pub async fn user_records(&self, guild_id: &str, user_id: &str, limit: usize) -> Result<Vec<ModerationRecord>> {
        let db = self.stores.guild(guild_id)?;
        let u = user_id.to_string();
        db.run_blocking(move |db| db.user_records(&u, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GuildConfig;
    use crate::platform::fake::FakePlatform;
    use crate::platform::MemberInfo;
    use crate::settings::{ActionConfig, ConfigSnapshot};

    fn level(add: &[&str], remove: &[&str], minutes: i64, timeout: &str) -> LevelConfig {
        LevelConfig {
            add_role_ids: add.iter().map(|s| s.to_string()).collect(),
            remove_role_ids: remove.iter().map(|s| s.to_string()).collect(),
            add_role_timeout_minutes: minutes,
            timeout: timeout.into(),
            ..Default::default()
        }
    }

    fn engine(action: ActionConfig) -> (Arc<FakePlatform>, ModerationEngine, tempfile::TempDir) {
        let mut snapshot = ConfigSnapshot::default();
        snapshot
            .moderation
            .entry("g".into())
            .or_default()
            .insert("mute".into(), action);
        let fake = Arc::new(FakePlatform::new());
        fake.add_member(
            "g",
            MemberInfo {
                user_id: "u".into(),
                display_name: "User".into(),
                roles: vec!["member".into()],
                timed_out_until: None,
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let engine = ModerationEngine::new(
            fake.clone(),
            Arc::new(StoreManager::in_memory()),
            Arc::new(ConfigStore::from_snapshot(snapshot)),
            EvidenceArchive::new(dir.path(), fake.clone()),
        );
        (fake, engine, dir)
    }

    fn request(now: i64) -> PunishRequest {
        PunishRequest {
            guild_id: "g".into(),
            channel_id: "cmd".into(),
            admin_id: "admin".into(),
            user_id: "u".into(),
            action_type: "mute".into(),
            reason: "spam".into(),
            interaction_id: "i".into(),
            now,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_whitelisted_target_is_refused_without_changes() {
        let mut action = ActionConfig::default();
        let mut l0 = level(&["muted"], &["member"], 60, "1");
        l0.whitelist_role_ids = vec!["member".into()];
        action.levels.insert("0".into(), l0);
        let (fake, engine, _dir) = engine(action);

        let err = engine.apply(&request(1000)).await.unwrap_err();
        assert!(matches!(err, BotError::Whitelisted(_)));
        assert!(fake.role_ops().is_empty());
        assert_eq!(fake.member("g", "u").unwrap().timed_out_until, None);
        assert!(engine.user_records("g", "u", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_sends_notice_and_dm() {
        let mut action = ActionConfig::default();
        action.levels.insert("0".into(), level(&["muted", "0"], &[], 60, "0"));
        let (fake, engine, _dir) = engine(action);

        let out = engine.apply(&request(1000)).await.unwrap();
        assert_eq!(out.level, 0);
        assert_eq!(out.temp_roles, vec!["muted"]);
        assert_eq!(out.roles_remove_at.get("muted"), Some(&(1000 + 3600)));
        assert!(out.dm_sent);
        assert_eq!(fake.sent_to("cmd").len(), 1);
        assert_eq!(fake.sent_to("dm-u").len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_evidence_still_records_punishment() {
        let mut action = ActionConfig::default();
        action.levels.insert("0".into(), level(&["muted"], &[], 60, "1"));
        let mut snapshot = ConfigSnapshot::default();
        snapshot.moderation.entry("g".into()).or_default().insert("mute".into(), action);
        let fake = Arc::new(FakePlatform::new());
        fake.add_member(
            "g",
            MemberInfo {
                user_id: "u".into(),
                display_name: "User".into(),
                ..Default::default()
            },
        );
        fake.add_message(crate::platform::ChatMessage {
            id: "9".into(),
            channel_id: "8".into(),
            content: "proof".into(),
            attachments: vec![crate::platform::Attachment {
                id: "a1".into(),
                filename: "shot.png".into(),
                url: "https://cdn/shot.png".into(),
                content_type: None,
            }],
            ..Default::default()
        });
        fake.set_attachment("https://cdn/shot.png", b"png");
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let engine = ModerationEngine::new(
            fake.clone(),
            Arc::new(StoreManager::in_memory()),
            Arc::new(ConfigStore::from_snapshot(snapshot)),
            EvidenceArchive::new(&blocker, fake.clone()),
        );

        let mut req = request(1000);
        req.evidence_links = vec![MessageLink {
            guild_id: "7".into(),
            channel_id: "8".into(),
            message_id: "9".into(),
        }];
        let out = engine.apply(&req).await.unwrap();
        assert_eq!(out.temp_roles, vec!["muted"]);
        let records = engine.user_records("g", "u", 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].evidence.len(), 1);
        assert_eq!(records[0].evidence[0].content, "proof");
        assert!(records[0].evidence[0].attachment_paths.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_restores_roles_and_grants_recovery() {
        let mut action = ActionConfig::default();
        action.levels.insert("0".into(), level(&["muted"], &["member"], 0, "2"));
        let (fake, engine, _dir) = engine(action);
        engine
            .stores
            .guild("g")
            .unwrap()
            .upsert_guild_config(&GuildConfig {
                guild_id: "g".into(),
                enabled: true,
                recovery_role_id: Some("recovered".into()),
                ..Default::default()
            })
            .unwrap();

        let out = engine.apply(&request(1000)).await.unwrap();
        assert!(fake.member("g", "u").unwrap().timed_out_until.is_some());

        let revoked = engine.revoke("g", out.punishment_id).await.unwrap();
        assert!(revoked.recovery_granted);
        let member = fake.member("g", "u").unwrap();
        assert!(!member.roles.contains(&"muted".to_string()));
        assert!(member.roles.contains(&"recovered".to_string()));
        assert_eq!(member.timed_out_until, None);
        assert!(engine.get_record("g", out.punishment_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_record_is_not_found() {
        let (_fake, engine, _dir) = engine(ActionConfig::default());
        assert!(engine.delete("g", 42).await.unwrap_err().is_not_found());
    }
}
