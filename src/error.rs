use crate::platform::PlatformError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ArchivedThread,
    PermissionDenied,
    Whitelisted,
    InvalidInput,
    Platform,
    Store,
    Io,
    Config,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("thread {0} is archived")]
    ArchivedThread(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("target holds whitelisted role {0}")]
    Whitelisted(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::NotFound(_) => ErrorKind::NotFound,
            BotError::ArchivedThread(_) => ErrorKind::ArchivedThread,
            BotError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            BotError::Whitelisted(_) => ErrorKind::Whitelisted,
            BotError::InvalidInput(_) => ErrorKind::InvalidInput,
            BotError::Platform(PlatformError::NotFound(_)) => ErrorKind::NotFound,
            BotError::Platform(PlatformError::Forbidden(_)) => ErrorKind::PermissionDenied,
            BotError::Platform(_) | BotError::Http(_) => ErrorKind::Platform,
            BotError::Store(_) | BotError::Json(_) => ErrorKind::Store,
            BotError::Io(_) | BotError::Join(_) => ErrorKind::Io,
            BotError::Config(_) => ErrorKind::Config,
            BotError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Text shown to the person whose interaction failed.
    pub fn user_message(&self) -> String {
        match self {
            BotError::NotFound(what) => format!("❌ 未找到：{}", what),
            BotError::ArchivedThread(_) => "⚠️ 目标帖子已归档，已跳过更新。".to_string(),
            BotError::PermissionDenied(why) => format!("⛔ 权限不足：{}", why),
            BotError::Whitelisted(_) => "⛔ 目标用户持有白名单身份组，操作已拒绝。".to_string(),
            BotError::InvalidInput(why) => format!("❌ 参数无效：{}", why),
            BotError::Cancelled => "⚠️ 操作已取消。".to_string(),
            other => match other.kind() {
                ErrorKind::NotFound => "❌ 目标不存在或已被删除。".to_string(),
                ErrorKind::PermissionDenied => "⛔ 机器人缺少执行该操作的权限。".to_string(),
                _ => "❌ 内部错误，请稍后重试。".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_not_found_maps_to_not_found_kind() {
        let err = BotError::from(PlatformError::NotFound("message 1".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());

        let err = BotError::from(PlatformError::Transient("502".into()));
        assert_eq!(err.kind(), ErrorKind::Platform);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_user_message_does_not_leak_internals() {
        let err = BotError::Config("missing token".into());
        assert!(!err.user_message().contains("token"));
        let err = BotError::Whitelisted("123".into());
        assert!(err.user_message().contains("白名单"));
    }
}
