//! Discord implementation of [`PlatformClient`] on top of serenity.

use super::*;
use ::serenity::all::{
    ActionRowComponent, ApplicationId, ButtonStyle as DiscordButtonStyle, Channel, ChannelId, Client, Command,
    CommandDataOption, CommandDataOptionValue, CommandOptionType, ComponentInteractionDataKind,
    Context, CreateActionRow, CreateAllowedMentions, CreateAutocompleteResponse, CreateButton,
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter, CreateInputText,
    CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage, CreateModal,
    CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption, EditInteractionResponse,
    EditMember, EditMessage, EventHandler, GatewayIntents, GetMessages, GuildChannel, GuildId,
    Http, InputTextStyle, Interaction as DiscordInteraction, InteractionId, Message, MessageId,
    PartialGuildChannel, Ready, RoleId, Timestamp, UserId,
};
use ::serenity::gateway::ShardManager;
use ::serenity::http::HttpError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Subscribers = Arc<Mutex<Vec<(EventKinds, mpsc::Sender<GatewayEvent>)>>>;

pub struct DiscordPlatform {
    token: String,
    http: Arc<Http>,
    downloader: reqwest::Client,
    subscribers: Subscribers,
    shard_manager: Mutex<Option<Arc<ShardManager>>>,
    gateway_task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscordPlatform {
    pub fn new(token: &str, application_id: u64, downloader: reqwest::Client) -> Self {
        let http = Http::new(token);
        if application_id != 0 {
            http.set_application_id(ApplicationId::new(application_id));
        }
        Self {
            token: token.to_string(),
            http: Arc::new(http),
            downloader,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            shard_manager: Mutex::new(None),
            gateway_task: Mutex::new(None),
        }
    }

    async fn guild_channel(&self, channel_id: &str) -> PlatformResult<GuildChannel> {
        let channel = ChannelId::new(parse_id(channel_id)?)
            .to_channel(&self.http)
            .await
            .map_err(map_err)?;
        match channel {
            Channel::Guild(gc) => Ok(gc),
            _ => Err(PlatformError::NotFound(format!("guild channel {}", channel_id))),
        }
    }
}

fn parse_id(raw: &str) -> PlatformResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(PlatformError::InvalidId(raw.to_string())),
        Ok(id) => Ok(id),
    }
}

fn map_err(err: ::serenity::Error) -> PlatformError {
    if let ::serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) = &err {
        let message = resp.error.message.clone();
        return match resp.status_code.as_u16() {
            404 => PlatformError::NotFound(message),
            401 | 403 => PlatformError::Forbidden(message),
            429 => PlatformError::RateLimited(message),
            _ => PlatformError::Transient(err.to_string()),
        };
    }
    PlatformError::Transient(err.to_string())
}

fn timestamp(epoch_secs: i64) -> PlatformResult<Timestamp> {
    Timestamp::from_unix_timestamp(epoch_secs)
        .map_err(|_| PlatformError::InvalidId(format!("timestamp {}", epoch_secs)))
}

fn convert_thread(gc: &GuildChannel) -> ThreadInfo {
    let meta = gc.thread_metadata.as_ref();
    ThreadInfo {
        id: gc.id.to_string(),
        guild_id: gc.guild_id.to_string(),
        parent_id: gc.parent_id.map(|p| p.to_string()),
        name: gc.name.clone(),
        owner_id: gc.owner_id.map(|o| o.to_string()),
        archived: meta.map(|m| m.archived).unwrap_or(false),
        locked: meta.map(|m| m.locked).unwrap_or(false),
        message_count: gc.message_count.unwrap_or(0) as i64,
        tags: gc.applied_tags.iter().map(|t| t.to_string()).collect(),
        created_at: meta
            .and_then(|m| m.create_timestamp)
            .map(|t| t.unix_timestamp())
            .unwrap_or_else(|| gc.id.created_at().unix_timestamp()),
        archive_timestamp: meta.and_then(|m| m.archive_timestamp).map(|t| t.unix_timestamp()),
        is_thread: meta.is_some(),
    }
}

fn convert_message(m: &Message) -> ChatMessage {
    ChatMessage {
        id: m.id.to_string(),
        channel_id: m.channel_id.to_string(),
        guild_id: m.guild_id.map(|g| g.to_string()),
        author_id: m.author.id.to_string(),
        author_name: m
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| m.author.name.clone()),
        author_is_bot: m.author.bot,
        content: m.content.clone(),
        attachments: m
            .attachments
            .iter()
            .map(|a| Attachment {
                id: a.id.to_string(),
                filename: a.filename.clone(),
                url: a.url.clone(),
                content_type: a.content_type.clone(),
            })
            .collect(),
        embed_image_urls: m
            .embeds
            .iter()
            .filter_map(|e| e.image.as_ref().map(|i| i.url.clone()))
            .collect(),
        created_at: m.timestamp.unix_timestamp(),
    }
}

fn convert_options(options: &[CommandDataOption]) -> Vec<CommandOption> {
    options
        .iter()
        .filter_map(|o| {
            let value = match &o.value {
                CommandDataOptionValue::String(s) => OptionValue::String(s.clone()),
                CommandDataOptionValue::Integer(i) => OptionValue::Integer(*i),
                CommandDataOptionValue::Number(n) => OptionValue::Number(*n),
                CommandDataOptionValue::Boolean(b) => OptionValue::Boolean(*b),
                CommandDataOptionValue::User(u) => OptionValue::User(u.to_string()),
                CommandDataOptionValue::Channel(c) => OptionValue::Channel(c.to_string()),
                CommandDataOptionValue::Role(r) => OptionValue::Role(r.to_string()),
                _ => return None,
            };
            Some(CommandOption {
                name: o.name.clone(),
                value,
            })
        })
        .collect()
}

fn convert_interaction(interaction: &DiscordInteraction) -> Option<Interaction> {
    match interaction {
        DiscordInteraction::Command(cmd) => Some(Interaction {
            id: cmd.id.to_string(),
            token: cmd.token.clone(),
            guild_id: cmd.guild_id.map(|g| g.to_string()),
            channel_id: cmd.channel_id.to_string(),
            user_id: cmd.user.id.to_string(),
            user_name: cmd.user.name.clone(),
            member_roles: cmd
                .member
                .as_ref()
                .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
                .unwrap_or_default(),
            message_id: None,
            data: InteractionData::Command {
                name: cmd.data.name.clone(),
                options: convert_options(&cmd.data.options),
            },
        }),
        DiscordInteraction::Autocomplete(cmd) => {
            let focused = cmd.data.autocomplete()?;
            Some(Interaction {
                id: cmd.id.to_string(),
                token: cmd.token.clone(),
                guild_id: cmd.guild_id.map(|g| g.to_string()),
                channel_id: cmd.channel_id.to_string(),
                user_id: cmd.user.id.to_string(),
                user_name: cmd.user.name.clone(),
                member_roles: cmd
                    .member
                    .as_ref()
                    .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
                    .unwrap_or_default(),
                message_id: None,
                data: InteractionData::Autocomplete {
                    name: cmd.data.name.clone(),
                    focused: focused.name.to_string(),
                    value: focused.value.to_string(),
                },
            })
        }
        DiscordInteraction::Component(component) => {
            let values = match &component.data.kind {
                ComponentInteractionDataKind::StringSelect { values } => values.clone(),
                _ => Vec::new(),
            };
            Some(Interaction {
                id: component.id.to_string(),
                token: component.token.clone(),
                guild_id: component.guild_id.map(|g| g.to_string()),
                channel_id: component.channel_id.to_string(),
                user_id: component.user.id.to_string(),
                user_name: component.user.name.clone(),
                member_roles: component
                    .member
                    .as_ref()
                    .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
                    .unwrap_or_default(),
                message_id: Some(component.message.id.to_string()),
                data: InteractionData::Component {
                    custom_id: component.data.custom_id.clone(),
                    values,
                },
            })
        }
        DiscordInteraction::Modal(modal) => {
            let mut fields = HashMap::new();
            for row in &modal.data.components {
                for component in &row.components {
                    if let ActionRowComponent::InputText(input) = component {
                        fields.insert(
                            input.custom_id.clone(),
                            input.value.clone().unwrap_or_default(),
                        );
                    }
                }
            }
            Some(Interaction {
                id: modal.id.to_string(),
                token: modal.token.clone(),
                guild_id: modal.guild_id.map(|g| g.to_string()),
                channel_id: modal.channel_id.to_string(),
                user_id: modal.user.id.to_string(),
                user_name: modal.user.name.clone(),
                member_roles: modal
                    .member
                    .as_ref()
                    .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
                    .unwrap_or_default(),
                message_id: modal.message.as_ref().map(|m| m.id.to_string()),
                data: InteractionData::ModalSubmit {
                    custom_id: modal.data.custom_id.clone(),
                    fields,
                },
            })
        }
        _ => None,
    }
}

fn to_embed(embed: &Embed) -> CreateEmbed {
    let mut out = CreateEmbed::new();
    if let Some(title) = &embed.title {
        out = out.title(title);
    }
    if let Some(description) = &embed.description {
        out = out.description(description);
    }
    if let Some(url) = &embed.url {
        out = out.url(url);
    }
    if let Some(color) = embed.color {
        out = out.color(color);
    }
    for field in &embed.fields {
        out = out.field(&field.name, &field.value, field.inline);
    }
    if let Some(footer) = &embed.footer {
        out = out.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(url) = &embed.thumbnail_url {
        out = out.thumbnail(url);
    }
    if let Some(url) = &embed.image_url {
        out = out.image(url);
    }
    if let Some(ts) = embed.timestamp.and_then(|t| Timestamp::from_unix_timestamp(t).ok()) {
        out = out.timestamp(ts);
    }
    out
}

fn to_rows(rows: &[ActionRow]) -> Vec<CreateActionRow> {
    let mut out = Vec::new();
    for row in rows {
        let mut buttons = Vec::new();
        for component in &row.0 {
            match component {
                Component::Button {
                    custom_id,
                    label,
                    style,
                    disabled,
                } => {
                    let style = match style {
                        ButtonStyle::Primary => DiscordButtonStyle::Primary,
                        ButtonStyle::Secondary => DiscordButtonStyle::Secondary,
                        ButtonStyle::Success => DiscordButtonStyle::Success,
                        ButtonStyle::Danger => DiscordButtonStyle::Danger,
                    };
                    buttons.push(
                        CreateButton::new(custom_id)
                            .label(label)
                            .style(style)
                            .disabled(*disabled),
                    );
                }
                Component::LinkButton { url, label } => {
                    buttons.push(CreateButton::new_link(url).label(label));
                }
                Component::Select {
                    custom_id,
                    placeholder,
                    options,
                    min_values,
                    max_values,
                } => {
                    let options = options
                        .iter()
                        .map(|o| {
                            let mut opt = CreateSelectMenuOption::new(&o.label, &o.value)
                                .default_selection(o.default);
                            if let Some(d) = &o.description {
                                opt = opt.description(d);
                            }
                            opt
                        })
                        .collect();
                    let menu = CreateSelectMenu::new(custom_id, CreateSelectMenuKind::String { options })
                        .placeholder(placeholder)
                        .min_values(*min_values)
                        .max_values(*max_values);
                    out.push(CreateActionRow::SelectMenu(menu));
                }
            }
        }
        if !buttons.is_empty() {
            out.push(CreateActionRow::Buttons(buttons));
        }
    }
    out
}

fn allowed_mentions(payload: &MessagePayload) -> CreateAllowedMentions {
    let users: Vec<UserId> = payload
        .mention_users
        .iter()
        .filter_map(|u| parse_id(u).ok().map(UserId::new))
        .collect();
    CreateAllowedMentions::new().users(users)
}

fn to_create_message(payload: &MessagePayload, channel_id: ChannelId) -> CreateMessage {
    let mut builder = CreateMessage::new()
        .embeds(payload.embeds.iter().map(to_embed).collect())
        .components(to_rows(&payload.components))
        .allowed_mentions(allowed_mentions(payload));
    if let Some(content) = &payload.content {
        builder = builder.content(content);
    }
    if let Some(reply) = payload.reply_to.as_deref().and_then(|r| parse_id(r).ok()) {
        builder = builder.reference_message((channel_id, MessageId::new(reply)));
    }
    builder
}

fn to_response_message(payload: &MessagePayload, ephemeral: bool) -> CreateInteractionResponseMessage {
    let mut builder = CreateInteractionResponseMessage::new()
        .embeds(payload.embeds.iter().map(to_embed).collect())
        .components(to_rows(&payload.components))
        .allowed_mentions(allowed_mentions(payload))
        .ephemeral(ephemeral);
    if let Some(content) = &payload.content {
        builder = builder.content(content);
    }
    builder
}

fn to_command(spec: &CommandSpec) -> CreateCommand {
    let mut command = CreateCommand::new(&spec.name).description(&spec.description);
    for option in &spec.options {
        let kind = match option.kind {
            OptionKind::String => CommandOptionType::String,
            OptionKind::Integer => CommandOptionType::Integer,
            OptionKind::Boolean => CommandOptionType::Boolean,
            OptionKind::User => CommandOptionType::User,
            OptionKind::Channel => CommandOptionType::Channel,
            OptionKind::Role => CommandOptionType::Role,
        };
        let mut opt = CreateCommandOption::new(kind, &option.name, &option.description)
            .required(option.required)
            .set_autocomplete(option.autocomplete);
        for choice in &option.choices {
            opt = match (option.kind, choice.value.parse::<i32>()) {
                (OptionKind::Integer, Ok(n)) => opt.add_int_choice(&choice.name, n),
                _ => opt.add_string_choice(&choice.name, &choice.value),
            };
        }
        command = command.add_option(opt);
    }
    command
}

struct Forwarder {
    subscribers: Subscribers,
}

impl Forwarder {
    async fn dispatch(&self, event: GatewayEvent) {
        let senders: Vec<_> = {
            let subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.iter()
                .filter(|(kinds, _)| kinds.contains(event.kind()))
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in senders {
            if tx.send(event.clone()).await.is_err() {
                debug!("Gateway: subscriber dropped, skipping event");
            }
        }
    }
}

#[::serenity::async_trait]
impl EventHandler for Forwarder {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Gateway: connected as {}", ready.user.name);
        self.dispatch(GatewayEvent::Ready {
            user_name: ready.user.name.clone(),
            guild_ids: ready.guilds.iter().map(|g| g.id.to_string()).collect(),
        })
        .await;
    }

    async fn message(&self, _ctx: Context, new_message: Message) {
        self.dispatch(GatewayEvent::MessageCreate(convert_message(&new_message)))
            .await;
    }

    async fn thread_create(&self, _ctx: Context, thread: GuildChannel) {
        self.dispatch(GatewayEvent::ThreadCreate(convert_thread(&thread)))
            .await;
    }

    async fn thread_delete(
        &self,
        _ctx: Context,
        thread: PartialGuildChannel,
        _full_thread_data: Option<GuildChannel>,
    ) {
        self.dispatch(GatewayEvent::ThreadDelete {
            thread_id: thread.id.to_string(),
            parent_id: Some(thread.parent_id.to_string()),
            guild_id: thread.guild_id.to_string(),
        })
        .await;
    }

    async fn interaction_create(&self, _ctx: Context, interaction: DiscordInteraction) {
        if let Some(converted) = convert_interaction(&interaction) {
            self.dispatch(GatewayEvent::InteractionCreate(Box::new(converted)))
                .await;
        }
    }
}

#[async_trait]
impl PlatformClient for DiscordPlatform {
    async fn open_gateway(&self) -> PlatformResult<()> {
        let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
        let mut client = Client::builder(&self.token, intents)
            .event_handler(Forwarder {
                subscribers: self.subscribers.clone(),
            })
            .await
            .map_err(map_err)?;

        *self.shard_manager.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(client.shard_manager.clone());

        let handle = tokio::spawn(async move {
            if let Err(why) = client.start().await {
                error!("Gateway: client error: {:?}", why);
            }
        });
        *self.gateway_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    async fn close_gateway(&self) {
        let manager = self
            .shard_manager
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(manager) = manager {
            manager.shutdown_all().await;
        }
        let task = self
            .gateway_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Gateway: task ended abnormally: {}", e);
            }
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("Gateway: closed");
    }

    fn subscribe(&self, kinds: EventKinds) -> mpsc::Receiver<GatewayEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kinds, tx));
        rx
    }

    async fn list_active_threads(&self, channel_id: &str) -> PlatformResult<Vec<ThreadInfo>> {
        let channel = self.guild_channel(channel_id).await?;
        let data = channel
            .guild_id
            .get_active_threads(&self.http)
            .await
            .map_err(map_err)?;
        Ok(data
            .threads
            .iter()
            .filter(|t| t.parent_id == Some(channel.id))
            .map(convert_thread)
            .collect())
    }

    async fn list_archived_threads(
        &self,
        channel_id: &str,
        before: Option<i64>,
        limit: u32,
    ) -> PlatformResult<ArchivedThreadsPage> {
        let before = before.map(|ts| ts.max(0) as u64);
        let data = ChannelId::new(parse_id(channel_id)?)
            .get_archived_public_threads(&self.http, before, Some(limit as u64))
            .await
            .map_err(map_err)?;
        Ok(ArchivedThreadsPage {
            threads: data.threads.iter().map(convert_thread).collect(),
            has_more: data.has_more,
        })
    }

    async fn get_thread(&self, thread_id: &str) -> PlatformResult<ThreadInfo> {
        let channel = ChannelId::new(parse_id(thread_id)?)
            .to_channel(&self.http)
            .await
            .map_err(map_err)?;
        match channel {
            Channel::Guild(gc) => Ok(convert_thread(&gc)),
            other => Ok(ThreadInfo {
                id: other.id().to_string(),
                ..Default::default()
            }),
        }
    }

    async fn get_first_message(&self, thread_id: &str) -> PlatformResult<ChatMessage> {
        let id = parse_id(thread_id)?;
        let channel = ChannelId::new(id);
        // Forum starter messages share the thread's id.
        match channel.message(&self.http, MessageId::new(id)).await {
            Ok(msg) => return Ok(convert_message(&msg)),
            Err(e) => {
                let err = map_err(e);
                if !err.is_not_found() {
                    return Err(err);
                }
            }
        }
        let messages = channel
            .messages(&self.http, GetMessages::new().after(MessageId::new(1)).limit(1))
            .await
            .map_err(map_err)?;
        messages
            .first()
            .map(convert_message)
            .ok_or_else(|| PlatformError::NotFound(format!("first message of {}", thread_id)))
    }

    async fn get_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<ChatMessage> {
        let msg = ChannelId::new(parse_id(channel_id)?)
            .message(&self.http, MessageId::new(parse_id(message_id)?))
            .await
            .map_err(map_err)?;
        Ok(convert_message(&msg))
    }

    async fn send_message(&self, channel_id: &str, payload: &MessagePayload) -> PlatformResult<String> {
        let channel = ChannelId::new(parse_id(channel_id)?);
        let sent = channel
            .send_message(&self.http, to_create_message(payload, channel))
            .await
            .map_err(map_err)?;
        Ok(sent.id.to_string())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: &MessagePayload,
    ) -> PlatformResult<()> {
        let mut builder = EditMessage::new()
            .embeds(payload.embeds.iter().map(to_embed).collect())
            .components(to_rows(&payload.components));
        if let Some(content) = &payload.content {
            builder = builder.content(content);
        }
        ChannelId::new(parse_id(channel_id)?)
            .edit_message(&self.http, MessageId::new(parse_id(message_id)?), builder)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        ChannelId::new(parse_id(channel_id)?)
            .delete_message(&self.http, MessageId::new(parse_id(message_id)?))
            .await
            .map_err(map_err)
    }

    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()> {
        let ids: Vec<MessageId> = message_ids
            .iter()
            .filter_map(|id| parse_id(id).ok().map(MessageId::new))
            .collect();
        let channel = ChannelId::new(parse_id(channel_id)?);
        match ids.len() {
            0 => Ok(()),
            1 => channel.delete_message(&self.http, ids[0]).await.map_err(map_err),
            _ => channel.delete_messages(&self.http, ids).await.map_err(map_err),
        }
    }

    async fn get_member(&self, guild_id: &str, user_id: &str) -> PlatformResult<MemberInfo> {
        let member = GuildId::new(parse_id(guild_id)?)
            .member(&self.http, UserId::new(parse_id(user_id)?))
            .await
            .map_err(map_err)?;
        Ok(MemberInfo {
            user_id: member.user.id.to_string(),
            display_name: member.display_name().to_string(),
            roles: member.roles.iter().map(|r| r.to_string()).collect(),
            timed_out_until: member.communication_disabled_until.map(|t| t.unix_timestamp()),
        })
    }

    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()> {
        self.http
            .add_member_role(
                GuildId::new(parse_id(guild_id)?),
                UserId::new(parse_id(user_id)?),
                RoleId::new(parse_id(role_id)?),
                Some("moderation"),
            )
            .await
            .map_err(map_err)
    }

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()> {
        self.http
            .remove_member_role(
                GuildId::new(parse_id(guild_id)?),
                UserId::new(parse_id(user_id)?),
                RoleId::new(parse_id(role_id)?),
                Some("moderation"),
            )
            .await
            .map_err(map_err)
    }

    async fn timeout_member(&self, guild_id: &str, user_id: &str, until: Option<i64>) -> PlatformResult<()> {
        let builder = match until {
            Some(ts) => EditMember::new().disable_communication_until_datetime(timestamp(ts)?),
            None => EditMember::new().enable_communication(),
        };
        GuildId::new(parse_id(guild_id)?)
            .edit_member(&self.http, UserId::new(parse_id(user_id)?), builder)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn ban(&self, guild_id: &str, user_id: &str, reason: &str) -> PlatformResult<()> {
        GuildId::new(parse_id(guild_id)?)
            .ban_with_reason(&self.http, UserId::new(parse_id(user_id)?), 0, reason)
            .await
            .map_err(map_err)
    }

    async fn unban(&self, guild_id: &str, user_id: &str) -> PlatformResult<()> {
        GuildId::new(parse_id(guild_id)?)
            .unban(&self.http, UserId::new(parse_id(user_id)?))
            .await
            .map_err(map_err)
    }

    async fn create_direct_channel(&self, user_id: &str) -> PlatformResult<String> {
        let channel = UserId::new(parse_id(user_id)?)
            .create_dm_channel(&self.http)
            .await
            .map_err(map_err)?;
        Ok(channel.id.to_string())
    }

    async fn respond_interaction(
        &self,
        interaction: &InteractionHandle,
        response: &InteractionResponse,
    ) -> PlatformResult<()> {
        let response = match response {
            InteractionResponse::Message { payload, ephemeral } => {
                CreateInteractionResponse::Message(to_response_message(payload, *ephemeral))
            }
            InteractionResponse::UpdateMessage(payload) => {
                CreateInteractionResponse::UpdateMessage(to_response_message(payload, false))
            }
            InteractionResponse::Modal(modal) => {
                let rows = modal
                    .inputs
                    .iter()
                    .map(|input| {
                        let style = if input.long {
                            InputTextStyle::Paragraph
                        } else {
                            InputTextStyle::Short
                        };
                        let mut text = CreateInputText::new(style, &input.label, &input.custom_id)
                            .required(input.required);
                        if let Some(value) = &input.value {
                            text = text.value(value);
                        }
                        CreateActionRow::InputText(text)
                    })
                    .collect();
                CreateInteractionResponse::Modal(
                    CreateModal::new(&modal.custom_id, &modal.title).components(rows),
                )
            }
            InteractionResponse::Autocomplete(choices) => {
                let mut builder = CreateAutocompleteResponse::new();
                for choice in choices {
                    builder = builder.add_string_choice(&choice.name, &choice.value);
                }
                CreateInteractionResponse::Autocomplete(builder)
            }
        };
        self.http
            .create_interaction_response(
                InteractionId::new(parse_id(&interaction.id)?),
                &interaction.token,
                &response,
                Vec::new(),
            )
            .await
            .map_err(map_err)
    }

    async fn edit_interaction_response(
        &self,
        interaction: &InteractionHandle,
        payload: &MessagePayload,
    ) -> PlatformResult<()> {
        let mut builder = EditInteractionResponse::new()
            .embeds(payload.embeds.iter().map(to_embed).collect())
            .components(to_rows(&payload.components));
        if let Some(content) = &payload.content {
            builder = builder.content(content);
        }
        self.http
            .edit_original_interaction_response(&interaction.token, &builder, Vec::new())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn defer_interaction(&self, interaction: &InteractionHandle, ephemeral: bool) -> PlatformResult<()> {
        let response = CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(ephemeral),
        );
        self.http
            .create_interaction_response(
                InteractionId::new(parse_id(&interaction.id)?),
                &interaction.token,
                &response,
                Vec::new(),
            )
            .await
            .map_err(map_err)
    }

    async fn member_permissions_in_channel(&self, user_id: &str, channel_id: &str) -> PlatformResult<u64> {
        let channel = self.guild_channel(channel_id).await?;
        let guild = channel
            .guild_id
            .to_partial_guild(&self.http)
            .await
            .map_err(map_err)?;
        let member = channel
            .guild_id
            .member(&self.http, UserId::new(parse_id(user_id)?))
            .await
            .map_err(map_err)?;
        Ok(guild.user_permissions_in(&channel, &member).bits())
    }

    async fn register_guild_commands(&self, guild_id: &str, commands: &[CommandSpec]) -> PlatformResult<()> {
        let commands: Vec<CreateCommand> = commands.iter().map(to_command).collect();
        let registered = GuildId::new(parse_id(guild_id)?)
            .set_commands(&self.http, commands)
            .await
            .map_err(map_err)?;
        debug!("Registered {} commands in guild {}", registered.len(), guild_id);
        Ok(())
    }

    async fn unregister_global_commands(&self) -> PlatformResult<()> {
        Command::set_global_commands(&self.http, Vec::new())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn download_attachment(&self, url: &str) -> PlatformResult<Vec<u8>> {
        let response = self
            .downloader
            .get(url)
            .send()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;
        if response.status().as_u16() == 404 {
            return Err(PlatformError::NotFound(url.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| PlatformError::Transient(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
