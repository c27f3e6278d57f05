//! In-memory [`PlatformClient`] used by unit and scenario tests.
//!
//! Every API call bumps a counter so tests can assert that nothing was
//! issued after cancellation.

use super::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel_id: String,
    pub message_id: String,
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOp {
    Add { guild_id: String, user_id: String, role_id: String },
    Remove { guild_id: String, user_id: String, role_id: String },
}

#[derive(Default)]
struct FakeState {
    active_threads: HashMap<String, Vec<ThreadInfo>>,
    archived_threads: HashMap<String, Vec<ThreadInfo>>,
    channels: HashMap<String, ThreadInfo>,
    first_messages: HashMap<String, ChatMessage>,
    messages: HashMap<(String, String), ChatMessage>,
    live: HashMap<String, (String, MessagePayload)>,
    sent: Vec<SentMessage>,
    edits: Vec<SentMessage>,
    deletes: Vec<(String, String)>,
    members: HashMap<(String, String), MemberInfo>,
    bans: HashSet<(String, String)>,
    role_ops: Vec<RoleOp>,
    failing_roles: HashSet<String>,
    failing_first_messages: HashSet<String>,
    failing_archive_channels: HashSet<String>,
    send_budget: Option<usize>,
    archive_hook: Option<Hook>,
    responses: Vec<(InteractionHandle, InteractionResponse)>,
    response_edits: Vec<(InteractionHandle, MessagePayload)>,
    deferred: Vec<(InteractionHandle, bool)>,
    permissions: HashMap<(String, String), u64>,
    registered: HashMap<String, Vec<CommandSpec>>,
    attachments: HashMap<String, Vec<u8>>,
    subscribers: Vec<(EventKinds, mpsc::Sender<GatewayEvent>)>,
    gateway_open: bool,
    next_id: u64,
}

pub struct FakePlatform {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 900_000,
                ..Default::default()
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    // --- Seeding ---

    pub fn add_channel(&self, info: ThreadInfo) {
        self.state().channels.insert(info.id.clone(), info);
    }

    pub fn add_active_thread(&self, thread: ThreadInfo, first_message: ChatMessage) {
        let mut state = self.state();
        let parent = thread.parent_id.clone().unwrap_or_default();
        state.first_messages.insert(thread.id.clone(), first_message);
        state.channels.insert(thread.id.clone(), thread.clone());
        state.active_threads.entry(parent).or_default().push(thread);
    }

    pub fn add_archived_thread(&self, mut thread: ThreadInfo, first_message: ChatMessage) {
        thread.archived = true;
        let mut state = self.state();
        let parent = thread.parent_id.clone().unwrap_or_default();
        state.first_messages.insert(thread.id.clone(), first_message);
        state.channels.insert(thread.id.clone(), thread.clone());
        state.archived_threads.entry(parent).or_default().push(thread);
    }

    /// Makes the thread unknown to the platform, as if it had been deleted.
    pub fn remove_thread(&self, thread_id: &str) {
        let mut state = self.state();
        state.channels.remove(thread_id);
        state.first_messages.remove(thread_id);
        for list in state.active_threads.values_mut() {
            list.retain(|t| t.id != thread_id);
        }
        for list in state.archived_threads.values_mut() {
            list.retain(|t| t.id != thread_id);
        }
    }

    pub fn add_message(&self, message: ChatMessage) {
        self.state()
            .messages
            .insert((message.channel_id.clone(), message.id.clone()), message);
    }

    /// Registers an existing message that edits and deletes can target.
    pub fn add_live_message(&self, channel_id: &str, message_id: &str) {
        self.state().live.insert(
            message_id.to_string(),
            (channel_id.to_string(), MessagePayload::default()),
        );
    }

    pub fn add_member(&self, guild_id: &str, member: MemberInfo) {
        self.state()
            .members
            .insert((guild_id.to_string(), member.user_id.clone()), member);
    }

    pub fn fail_role(&self, role_id: &str) {
        self.state().failing_roles.insert(role_id.to_string());
    }

    pub fn fail_first_message(&self, thread_id: &str) {
        self.state().failing_first_messages.insert(thread_id.to_string());
    }

    pub fn fail_archive_listing(&self, channel_id: &str) {
        self.state().failing_archive_channels.insert(channel_id.to_string());
    }

    /// Lets `n` more sends through, then fails every send until cleared.
    pub fn fail_sends_after(&self, n: usize) {
        self.state().send_budget = Some(n);
    }

    pub fn clear_send_failures(&self) {
        self.state().send_budget = None;
    }

    /// Runs `hook` on every archived-thread listing, before the page is built.
    pub fn on_archive_listing(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.state().archive_hook = Some(Arc::new(hook));
    }

    pub fn set_permissions(&self, user_id: &str, channel_id: &str, bits: u64) {
        self.state()
            .permissions
            .insert((user_id.to_string(), channel_id.to_string()), bits);
    }

    pub fn set_attachment(&self, url: &str, bytes: &[u8]) {
        self.state().attachments.insert(url.to_string(), bytes.to_vec());
    }

    /// Pushes an event to every matching subscriber.
    pub async fn emit(&self, event: GatewayEvent) {
        let senders: Vec<_> = self
            .state()
            .subscribers
            .iter()
            .filter(|(kinds, _)| kinds.contains(event.kind()))
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }

    // --- Inspection ---

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<SentMessage> {
        self.state()
            .sent
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn edits(&self) -> Vec<SentMessage> {
        self.state().edits.clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.state().deletes.clone()
    }

    pub fn live_payload(&self, message_id: &str) -> Option<MessagePayload> {
        self.state().live.get(message_id).map(|(_, p)| p.clone())
    }

    pub fn member(&self, guild_id: &str, user_id: &str) -> Option<MemberInfo> {
        self.state()
            .members
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
    }

    pub fn is_banned(&self, guild_id: &str, user_id: &str) -> bool {
        self.state()
            .bans
            .contains(&(guild_id.to_string(), user_id.to_string()))
    }

    pub fn role_ops(&self) -> Vec<RoleOp> {
        self.state().role_ops.clone()
    }

    pub fn responses(&self) -> Vec<(InteractionHandle, InteractionResponse)> {
        self.state().responses.clone()
    }

    pub fn response_edits(&self) -> Vec<(InteractionHandle, MessagePayload)> {
        self.state().response_edits.clone()
    }

    pub fn deferred(&self) -> Vec<(InteractionHandle, bool)> {
        self.state().deferred.clone()
    }

    pub fn registered_commands(&self, guild_id: &str) -> Vec<CommandSpec> {
        self.state().registered.get(guild_id).cloned().unwrap_or_default()
    }

    pub fn gateway_open(&self) -> bool {
        self.state().gateway_open
    }
}

fn key(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn open_gateway(&self) -> PlatformResult<()> {
        self.hit();
        self.state().gateway_open = true;
        Ok(())
    }

    async fn close_gateway(&self) {
        self.hit();
        let mut state = self.state();
        state.gateway_open = false;
        state.subscribers.clear();
    }

    fn subscribe(&self, kinds: EventKinds) -> mpsc::Receiver<GatewayEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.state().subscribers.push((kinds, tx));
        rx
    }

    async fn list_active_threads(&self, channel_id: &str) -> PlatformResult<Vec<ThreadInfo>> {
        self.hit();
        Ok(self
            .state()
            .active_threads
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_archived_threads(
        &self,
        channel_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> PlatformResult<ArchivedThreadsPage> {
        self.hit();
        let hook = self.state().archive_hook.clone();
        if let Some(hook) = hook {
            hook();
        }
        let state = self.state();
        if state.failing_archive_channels.contains(channel_id) {
            return Err(PlatformError::Transient("archive listing failed".into()));
        }
        let mut all: Vec<ThreadInfo> = state
            .archived_threads
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|t| match before {
                Some(cursor) => t.archive_timestamp.unwrap_or(t.created_at) < cursor,
                None => true,
            })
            .collect();
        all.sort_by_key(|t| std::cmp::Reverse(t.archive_timestamp.unwrap_or(t.created_at)));
        let has_more = all.len() > limit as usize;
        all.truncate(limit as usize);
        Ok(ArchivedThreadsPage { threads: all, has_more })
    }

    async fn get_thread(&self, thread_id: &str) -> PlatformResult<ThreadInfo> {
        self.hit();
        self.state()
            .channels
            .get(thread_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("channel {}", thread_id)))
    }

    async fn get_first_message(&self, thread_id: &str) -> PlatformResult<ChatMessage> {
        self.hit();
        let state = self.state();
        if state.failing_first_messages.contains(thread_id) {
            return Err(PlatformError::Transient("first message fetch failed".into()));
        }
        state
            .first_messages
            .get(thread_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("first message of {}", thread_id)))
    }

    async fn get_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<ChatMessage> {
        self.hit();
        self.state()
            .messages
            .get(&key(channel_id, message_id))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("message {}", message_id)))
    }

    async fn send_message(&self, channel_id: &str, payload: &MessagePayload) -> PlatformResult<String> {
        self.hit();
        let mut state = self.state();
        match state.send_budget {
            Some(0) => return Err(PlatformError::Transient("send failed".into())),
            Some(n) => state.send_budget = Some(n - 1),
            None => {}
        }
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .live
            .insert(id.clone(), (channel_id.to_string(), payload.clone()));
        state.sent.push(SentMessage {
            channel_id: channel_id.to_string(),
            message_id: id.clone(),
            payload: payload.clone(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: &MessagePayload,
    ) -> PlatformResult<()> {
        self.hit();
        let mut state = self.state();
        match state.live.get_mut(message_id) {
            Some((channel, stored)) if channel == channel_id => {
                *stored = payload.clone();
            }
            _ => return Err(PlatformError::NotFound(format!("message {}", message_id))),
        }
        state.edits.push(SentMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        self.hit();
        let mut state = self.state();
        if state.live.remove(message_id).is_none() {
            return Err(PlatformError::NotFound(format!("message {}", message_id)));
        }
        state.deletes.push(key(channel_id, message_id));
        Ok(())
    }

    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()> {
        self.hit();
        let mut state = self.state();
        for id in message_ids {
            if state.live.remove(id).is_some() {
                state.deletes.push(key(channel_id, id));
            }
        }
        Ok(())
    }

    async fn get_member(&self, guild_id: &str, user_id: &str) -> PlatformResult<MemberInfo> {
        self.hit();
        self.member(guild_id, user_id)
            .ok_or_else(|| PlatformError::NotFound(format!("member {}", user_id)))
    }

    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()> {
        self.hit();
        let mut state = self.state();
        if state.failing_roles.contains(role_id) {
            return Err(PlatformError::Forbidden(format!("role {}", role_id)));
        }
        let member = state
            .members
            .get_mut(&key(guild_id, user_id))
            .ok_or_else(|| PlatformError::NotFound(format!("member {}", user_id)))?;
        if !member.roles.iter().any(|r| r == role_id) {
            member.roles.push(role_id.to_string());
        }
        state.role_ops.push(RoleOp::Add {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        Ok(())
    }

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()> {
        self.hit();
        let mut state = self.state();
        if state.failing_roles.contains(role_id) {
            return Err(PlatformError::Forbidden(format!("role {}", role_id)));
        }
        let member = state
            .members
            .get_mut(&key(guild_id, user_id))
            .ok_or_else(|| PlatformError::NotFound(format!("member {}", user_id)))?;
        member.roles.retain(|r| r != role_id);
        state.role_ops.push(RoleOp::Remove {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        Ok(())
    }

    async fn timeout_member(&self, guild_id: &str, user_id: &str, until: Option<i64>) -> PlatformResult<()> {
        self.hit();
        let mut state = self.state();
        let member = state
            .members
            .get_mut(&key(guild_id, user_id))
            .ok_or_else(|| PlatformError::NotFound(format!("member {}", user_id)))?;
        member.timed_out_until = until;
        Ok(())
    }

    async fn ban(&self, guild_id: &str, user_id: &str, _reason: &str) -> PlatformResult<()> {
        self.hit();
        self.state().bans.insert(key(guild_id, user_id));
        Ok(())
    }

    async fn unban(&self, guild_id: &str, user_id: &str) -> PlatformResult<()> {
        self.hit();
        if self.state().bans.remove(&key(guild_id, user_id)) {
            Ok(())
        } else {
            Err(PlatformError::NotFound(format!("ban for {}", user_id)))
        }
    }

    async fn create_direct_channel(&self, user_id: &str) -> PlatformResult<String> {
        self.hit();
        Ok(format!("dm-{}", user_id))
    }

    async fn respond_interaction(
        &self,
        interaction: &InteractionHandle,
        response: &InteractionResponse,
    ) -> PlatformResult<()> {
        self.hit();
        self.state()
            .responses
            .push((interaction.clone(), response.clone()));
        Ok(())
    }

    async fn edit_interaction_response(
        &self,
        interaction: &InteractionHandle,
        payload: &MessagePayload,
    ) -> PlatformResult<()> {
        self.hit();
        self.state()
            .response_edits
            .push((interaction.clone(), payload.clone()));
        Ok(())
    }

    async fn defer_interaction(&self, interaction: &InteractionHandle, ephemeral: bool) -> PlatformResult<()> {
        self.hit();
        self.state().deferred.push((interaction.clone(), ephemeral));
        Ok(())
    }

    async fn member_permissions_in_channel(&self, user_id: &str, channel_id: &str) -> PlatformResult<u64> {
        self.hit();
        Ok(self
            .state()
            .permissions
            .get(&key(user_id, channel_id))
            .copied()
            .unwrap_or(0))
    }

    async fn register_guild_commands(&self, guild_id: &str, commands: &[CommandSpec]) -> PlatformResult<()> {
        self.hit();
        self.state()
            .registered
            .insert(guild_id.to_string(), commands.to_vec());
        Ok(())
    }

    async fn unregister_global_commands(&self) -> PlatformResult<()> {
        self.hit();
        Ok(())
    }

    async fn download_attachment(&self, url: &str) -> PlatformResult<Vec<u8>> {
        self.hit();
        self.state()
            .attachments
            .get(url)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(url.to_string()))
    }
}

/// Thread fixture with sane defaults.
pub fn thread(id: &str, guild_id: &str, parent_id: &str, created_at: i64) -> ThreadInfo {
    ThreadInfo {
        id: id.to_string(),
        guild_id: guild_id.to_string(),
        parent_id: Some(parent_id.to_string()),
        name: format!("Thread {}", id),
        owner_id: Some("author-1".to_string()),
        archived: false,
        locked: false,
        message_count: 1,
        tags: Vec::new(),
        created_at,
        archive_timestamp: None,
        is_thread: true,
    }
}

/// Starter message fixture for [`thread`].
pub fn starter(thread_id: &str, author_id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: thread_id.to_string(),
        channel_id: thread_id.to_string(),
        guild_id: None,
        author_id: author_id.to_string(),
        author_name: format!("user-{}", author_id),
        author_is_bot: false,
        content: content.to_string(),
        attachments: Vec::new(),
        embed_image_urls: Vec::new(),
        created_at: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edit_missing_message_is_not_found() {
        let fake = FakePlatform::new();
        let err = fake
            .edit_message("c1", "404", &MessagePayload::text("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let id = fake.send_message("c1", &MessagePayload::text("a")).await.unwrap();
        fake.edit_message("c1", &id, &MessagePayload::text("b")).await.unwrap();
        assert_eq!(fake.live_payload(&id).unwrap().content.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_archived_pagination_respects_cursor() {
        let fake = FakePlatform::new();
        for i in 0..5 {
            let mut t = thread(&format!("t{}", i), "g", "c", 100 + i);
            t.archive_timestamp = Some(1000 + i);
            fake.add_archived_thread(t, starter(&format!("t{}", i), "u", ""));
        }
        let page = fake.list_archived_threads("c", None, 2).await.unwrap();
        assert!(page.has_more);
        assert_eq!(page.threads[0].id, "t4");
        let page = fake.list_archived_threads("c", Some(1003), 10).await.unwrap();
        assert!(!page.has_more);
        assert_eq!(page.threads.len(), 3);
    }

    #[tokio::test]
    async fn test_edit_or_send_falls_back_on_missing() {
        let fake = FakePlatform::new();
        let id = edit_or_send(&fake, "c1", Some("gone"), &MessagePayload::text("x"))
            .await
            .unwrap();
        assert_ne!(id, "gone");
        assert_eq!(fake.sent().len(), 1);
        assert!(delete_if_present(&fake, "c1", "gone").await.is_ok());
    }
}
