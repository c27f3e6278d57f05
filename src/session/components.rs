//! Component `custom_id` encoding. Ids are colon-delimited and always parsed
//! by splitting and checking the part count.

use crate::db::UpdateMode;
use crate::error::{BotError, Result};

pub const NAV_PREFIX: &str = "personal_nav";
pub const CONFIRM_DELETE_PREFIX: &str = "confirm_delete_";
pub const QUICK_PRESET_PREFIX: &str = "quick_preset_reply_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentAction {
    RollAgain { user_id: String },
    NavSelect { slot: u8, mode: UpdateMode },
    NavConfirm { slot: u8 },
    NavCancel { slot: u8 },
    ConfirmDelete { punishment_id: i64 },
    QuickPresetReply { preset_id: String, message_id: String },
}

impl ComponentAction {
    pub fn encode(&self) -> String {
        match self {
            ComponentAction::RollAgain { user_id } => crate::roll::roll_again_id(user_id),
            ComponentAction::NavSelect { slot, mode } => format!("{}:select:{}:{}", NAV_PREFIX, slot, mode.as_str()),
            ComponentAction::NavConfirm { slot } => format!("{}:confirm:{}", NAV_PREFIX, slot),
            ComponentAction::NavCancel { slot } => format!("{}:cancel:{}", NAV_PREFIX, slot),
            ComponentAction::ConfirmDelete { punishment_id } => format!("{}{}", CONFIRM_DELETE_PREFIX, punishment_id),
            ComponentAction::QuickPresetReply { preset_id, message_id } => {
                format!("{}{}:{}", QUICK_PRESET_PREFIX, preset_id, message_id)
            }
        }
    }
}

fn malformed(id: &str) -> BotError {
    BotError::InvalidInput(format!("组件 ID 格式错误：{}", id))
}

fn parse_slot(raw: &str, id: &str) -> Result<u8> {
    raw.parse::<u8>().map_err(|_| malformed(id))
}

pub fn parse(custom_id: &str) -> Result<ComponentAction> {
    if let Some(rest) = custom_id.strip_prefix(CONFIRM_DELETE_PREFIX) {
        let punishment_id = rest.parse::<i64>().map_err(|_| malformed(custom_id))?;
        return Ok(ComponentAction::ConfirmDelete { punishment_id });
    }
    if let Some(rest) = custom_id.strip_prefix(QUICK_PRESET_PREFIX) {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(malformed(custom_id));
        }
        return Ok(ComponentAction::QuickPresetReply {
            preset_id: parts[0].to_string(),
            message_id: parts[1].to_string(),
        });
    }

    let parts: Vec<&str> = custom_id.split(':').collect();
    match parts.as_slice() {
        [crate::roll::ROLL_AGAIN_PREFIX, user_id] if !user_id.is_empty() => Ok(ComponentAction::RollAgain {
            user_id: user_id.to_string(),
        }),
        [NAV_PREFIX, "select", slot, mode] => Ok(ComponentAction::NavSelect {
            slot: parse_slot(slot, custom_id)?,
            mode: UpdateMode::parse(mode).ok_or_else(|| malformed(custom_id))?,
        }),
        [NAV_PREFIX, "confirm", slot] => Ok(ComponentAction::NavConfirm {
            slot: parse_slot(slot, custom_id)?,
        }),
        [NAV_PREFIX, "cancel", slot] => Ok(ComponentAction::NavCancel {
            slot: parse_slot(slot, custom_id)?,
        }),
        _ => Err(malformed(custom_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_known_ids() {
        assert_eq!(
            parse("roll_again:42").unwrap(),
            ComponentAction::RollAgain { user_id: "42".into() }
        );
        assert_eq!(
            parse("personal_nav:select:2:delete").unwrap(),
            ComponentAction::NavSelect {
                slot: 2,
                mode: UpdateMode::Delete
            }
        );
        assert_eq!(parse("confirm_delete_17").unwrap(), ComponentAction::ConfirmDelete { punishment_id: 17 });
        assert_eq!(
            parse("quick_preset_reply_rules:999").unwrap(),
            ComponentAction::QuickPresetReply {
                preset_id: "rules".into(),
                message_id: "999".into()
            }
        );
    }

    #[test]
    fn test_encode_matches_parse() {
        let action = ComponentAction::NavConfirm { slot: 3 };
        assert_eq!(parse(&action.encode()).unwrap(), action);
    }

    #[test]
    fn test_malformed_ids_are_invalid_input() {
        for id in [
            "roll_again",
            "roll_again:1:2",
            "personal_nav:select:2",
            "personal_nav:select:x:edit",
            "personal_nav:select:1:sideways",
            "confirm_delete_abc",
            "quick_preset_reply_onlyone",
            "quick_preset_reply_a:b:c",
            "something_else",
        ] {
            assert_eq!(parse(id).unwrap_err().kind(), ErrorKind::InvalidInput, "{}", id);
        }
    }
}
