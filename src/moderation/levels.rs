//! Escalation level selection and the knobs derived from a level.

use crate::settings::{ActionConfig, LevelConfig};

/// Role id placeholder meaning "no role".
pub const NO_ROLE: &str = "0";

/// Returns the level for a user with `prior` earlier records. Falls back to
/// the highest configured level when the exact index has no entry.
pub fn select_level(action: &ActionConfig, prior: usize) -> Option<(usize, &LevelConfig)> {
    if let Some(level) = action.levels.get(&prior.to_string()) {
        return Some((prior, level));
    }
    action
        .levels
        .iter()
        .filter_map(|(k, v)| k.trim().parse::<usize>().ok().map(|i| (i, v)))
        .max_by_key(|(i, _)| *i)
}

/// Role ids of a list with the placeholder and blanks removed.
pub fn real_roles(ids: &[String]) -> impl Iterator<Item = &String> {
    ids.iter().filter(|r| !r.is_empty() && r.as_str() != NO_ROLE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    None,
    Days(i64),
    Ban,
}

impl TimeoutAction {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("ban") {
            return TimeoutAction::Ban;
        }
        match raw.parse::<i64>() {
            Ok(days) if days > 0 => TimeoutAction::Days(days),
            _ => TimeoutAction::None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TimeoutAction::None => "无".to_string(),
            TimeoutAction::Days(d) => format!("禁言 {} 天", d),
            TimeoutAction::Ban => "永久封禁".to_string(),
        }
    }
}

/// Fills `{user}`, `{reason}`, `{level}` and `{action}` in a level's
/// description template.
pub fn render_description(template: &str, user_mention: &str, reason: &str, level: usize, action: &str) -> String {
    if template.trim().is_empty() {
        return format!("{} 因「{}」受到 {}（第 {} 级）处罚。", user_mention, reason, action, level + 1);
    }
    template
        .replace("{user}", user_mention)
        .replace("{reason}", reason)
        .replace("{level}", &(level + 1).to_string())
        .replace("{action}", action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(levels: &[&str]) -> ActionConfig {
        let mut a = ActionConfig::default();
        for l in levels {
            a.levels.insert(
                l.to_string(),
                LevelConfig {
                    description_template: format!("level {}", l),
                    ..Default::default()
                },
            );
        }
        a
    }

    #[test]
    fn test_select_level_uses_highest_when_missing() {
        let a = action(&["0", "1", "3"]);
        assert_eq!(select_level(&a, 0).unwrap().0, 0);
        assert_eq!(select_level(&a, 1).unwrap().0, 1);
        assert_eq!(select_level(&a, 2).unwrap().0, 3);
        assert_eq!(select_level(&a, 9).unwrap().0, 3);
        assert!(select_level(&ActionConfig::default(), 0).is_none());
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(TimeoutAction::parse("ban"), TimeoutAction::Ban);
        assert_eq!(TimeoutAction::parse("3"), TimeoutAction::Days(3));
        assert_eq!(TimeoutAction::parse("0"), TimeoutAction::None);
        assert_eq!(TimeoutAction::parse(""), TimeoutAction::None);
    }

    #[test]
    fn test_real_roles_skips_placeholder() {
        let ids = vec!["0".to_string(), "r1".to_string(), String::new()];
        assert_eq!(real_roles(&ids).collect::<Vec<_>>(), vec!["r1"]);
    }
}
