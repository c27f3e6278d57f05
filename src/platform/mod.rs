//! Capability set the bot needs from the chat platform.
//!
//! Everything above this module talks to [`PlatformClient`] only; the
//! serenity-backed implementation lives in [`discord`] and an in-memory
//! double for tests in [`fake`].

use async_trait::async_trait;
use std::ops::BitOr;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod fake;
pub mod interaction;
pub mod message;
pub mod discord;

pub use interaction::{
    Choice, CommandOption, CommandOptionSpec, CommandSpec, Interaction, InteractionData,
    InteractionHandle, InteractionResponse, ModalSpec, OptionKind, OptionValue, TextInputSpec,
};
pub use message::{ActionRow, ButtonStyle, Component, Embed, EmbedField, MessagePayload, SelectOption};

/// `MANAGE_CHANNELS` permission bit.
pub const PERMISSION_MANAGE_CHANNELS: u64 = 1 << 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("request failed: {0}")]
    Transient(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Thread (or plain channel) metadata as returned by the platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadInfo {
    pub id: String,
    pub guild_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub owner_id: Option<String>,
    pub archived: bool,
    pub locked: bool,
    pub message_count: i64,
    pub tags: Vec<String>,
    /// Creation time in epoch seconds.
    pub created_at: i64,
    pub archive_timestamp: Option<i64>,
    pub is_thread: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ArchivedThreadsPage {
    pub threads: Vec<ThreadInfo>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        if let Some(ct) = &self.content_type {
            return ct.starts_with("image/");
        }
        let lower = self.filename.to_lowercase();
        [".png", ".jpg", ".jpeg", ".gif", ".webp"]
            .iter()
            .any(|ext| lower.ends_with(ext))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embed_image_urls: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberInfo {
    pub user_id: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub timed_out_until: Option<i64>,
}

impl MemberInfo {
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKinds(u8);

impl EventKinds {
    pub const READY: EventKinds = EventKinds(1);
    pub const THREAD_CREATE: EventKinds = EventKinds(1 << 1);
    pub const THREAD_DELETE: EventKinds = EventKinds(1 << 2);
    pub const MESSAGE_CREATE: EventKinds = EventKinds(1 << 3);
    pub const INTERACTION_CREATE: EventKinds = EventKinds(1 << 4);
    pub const ALL: EventKinds = EventKinds(0b1_1111);

    pub fn contains(self, other: EventKinds) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventKinds {
    type Output = EventKinds;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventKinds(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready {
        user_name: String,
        guild_ids: Vec<String>,
    },
    ThreadCreate(ThreadInfo),
    ThreadDelete {
        thread_id: String,
        parent_id: Option<String>,
        guild_id: String,
    },
    MessageCreate(ChatMessage),
    InteractionCreate(Box<Interaction>),
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKinds {
        match self {
            GatewayEvent::Ready { .. } => EventKinds::READY,
            GatewayEvent::ThreadCreate(_) => EventKinds::THREAD_CREATE,
            GatewayEvent::ThreadDelete { .. } => EventKinds::THREAD_DELETE,
            GatewayEvent::MessageCreate(_) => EventKinds::MESSAGE_CREATE,
            GatewayEvent::InteractionCreate(_) => EventKinds::INTERACTION_CREATE,
        }
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn open_gateway(&self) -> PlatformResult<()>;
    async fn close_gateway(&self);
    /// Events of the requested kinds are delivered on the returned channel
    /// once the gateway is open.
    fn subscribe(&self, kinds: EventKinds) -> mpsc::Receiver<GatewayEvent>;

    async fn list_active_threads(&self, channel_id: &str) -> PlatformResult<Vec<ThreadInfo>>;
    /// `before` is an archive timestamp (epoch seconds) cursor.
    async fn list_archived_threads(
        &self,
        channel_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> PlatformResult<ArchivedThreadsPage>;
    async fn get_thread(&self, thread_id: &str) -> PlatformResult<ThreadInfo>;
    async fn get_first_message(&self, thread_id: &str) -> PlatformResult<ChatMessage>;
    async fn get_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<ChatMessage>;

    /// Returns the id of the created message.
    async fn send_message(&self, channel_id: &str, payload: &MessagePayload) -> PlatformResult<String>;
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: &MessagePayload,
    ) -> PlatformResult<()>;
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()>;
    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()>;

    async fn get_member(&self, guild_id: &str, user_id: &str) -> PlatformResult<MemberInfo>;
    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()>;
    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()>;
    /// `None` clears an active timeout.
    async fn timeout_member(&self, guild_id: &str, user_id: &str, until: Option<i64>) -> PlatformResult<()>;
    async fn ban(&self, guild_id: &str, user_id: &str, reason: &str) -> PlatformResult<()>;
    async fn unban(&self, guild_id: &str, user_id: &str) -> PlatformResult<()>;
    async fn create_direct_channel(&self, user_id: &str) -> PlatformResult<String>;

    async fn respond_interaction(
        &self,
        interaction: &InteractionHandle,
        response: &InteractionResponse,
    ) -> PlatformResult<()>;
    async fn edit_interaction_response(
        &self,
        interaction: &InteractionHandle,
        payload: &MessagePayload,
    ) -> PlatformResult<()>;
    async fn defer_interaction(&self, interaction: &InteractionHandle, ephemeral: bool) -> PlatformResult<()>;

    async fn member_permissions_in_channel(&self, user_id: &str, channel_id: &str) -> PlatformResult<u64>;

    async fn register_guild_commands(&self, guild_id: &str, commands: &[CommandSpec]) -> PlatformResult<()>;
    async fn unregister_global_commands(&self) -> PlatformResult<()>;
    async fn download_attachment(&self, url: &str) -> PlatformResult<Vec<u8>>;
}

/// Deletes a message, treating "already gone" as success.
pub async fn delete_if_present(
    platform: &dyn PlatformClient,
    channel_id: &str,
    message_id: &str,
) -> PlatformResult<()> {
    match platform.delete_message(channel_id, message_id).await {
        Err(PlatformError::NotFound(_)) => Ok(()),
        other => other,
    }
}

/// Edits `message_id` when present, otherwise sends a fresh message.
/// Returns the id that now holds the content.
pub async fn edit_or_send(
    platform: &dyn PlatformClient,
    channel_id: &str,
    message_id: Option<&str>,
    payload: &MessagePayload,
) -> PlatformResult<String> {
    if let Some(id) = message_id.filter(|id| !id.is_empty()) {
        match platform.edit_message(channel_id, id, payload).await {
            Ok(()) => return Ok(id.to_string()),
            Err(PlatformError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    platform.send_message(channel_id, payload).await
}

/// `https://discord.com/channels/<guild>/<channel>` style link.
pub fn channel_url(guild_id: &str, channel_id: &str) -> String {
    format!("https://discord.com/channels/{}/{}", guild_id, channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds_contains() {
        let kinds = EventKinds::THREAD_CREATE | EventKinds::MESSAGE_CREATE;
        assert!(kinds.contains(EventKinds::THREAD_CREATE));
        assert!(!kinds.contains(EventKinds::READY));
        assert!(EventKinds::ALL.contains(kinds));
    }

    #[test]
    fn test_attachment_image_detection() {
        let a = Attachment {
            filename: "Cover.PNG".into(),
            ..Default::default()
        };
        assert!(a.is_image());
        let b = Attachment {
            filename: "notes.txt".into(),
            content_type: Some("text/plain".into()),
            ..Default::default()
        };
        assert!(!b.is_image());
    }
}
