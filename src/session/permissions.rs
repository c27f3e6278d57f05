use crate::config::Config;
use crate::db::GuildConfig;

/// Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    Guest,
    User,
    Admin,
    SuperAdmin,
    Developer,
}

impl PermissionLevel {
    pub fn label(&self) -> &'static str {
        match self {
            PermissionLevel::Guest => "访客",
            PermissionLevel::User => "用户",
            PermissionLevel::Admin => "管理员",
            PermissionLevel::SuperAdmin => "超级管理员",
            PermissionLevel::Developer => "开发者",
        }
    }
}

fn holds_any(roles: &[String], wanted: &[String]) -> bool {
    wanted.iter().any(|w| !w.is_empty() && roles.contains(w))
}

/// Level of `user_id` in a guild. A guild without user roles configured
/// treats every member as a user.
pub fn resolve(config: &Config, guild: Option<&GuildConfig>, user_id: &str, roles: &[String]) -> PermissionLevel {
    if config.is_developer(user_id) {
        return PermissionLevel::Developer;
    }
    if holds_any(roles, &config.super_admin_role_ids) {
        return PermissionLevel::SuperAdmin;
    }
    match guild {
        Some(g) if holds_any(roles, &g.admin_role_ids) => PermissionLevel::Admin,
        Some(g) if g.user_role_ids.is_empty() || holds_any(roles, &g.user_role_ids) => PermissionLevel::User,
        None => PermissionLevel::User,
        Some(_) => PermissionLevel::Guest,
    }
}
