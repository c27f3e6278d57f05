//! Message-create behaviours: the top-channel link rewriter and keyword
//! auto-triggers.

use super::handlers::content::send_preset;
use crate::error::Result;
use crate::platform::{delete_if_present, ChatMessage, MessagePayload};
use crate::App;
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn channel_link_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://(?:(?:ptb|canary)\.)?discord(?:app)?\.com/channels/\d+/\d+(/\d+)?").ok()
    })
    .as_ref()
}

/// Appends `/0` to every channel link lacking a message id. `None` when the
/// content carries no channel link at all.
pub fn rewrite_links(content: &str) -> Option<String> {
    let re = channel_link_pattern()?;
    if !re.is_match(content) {
        return None;
    }
    let rewritten = re.replace_all(content, |caps: &Captures<'_>| {
        let whole = &caps[0];
        if caps.get(1).is_some() {
            whole.to_string()
        } else {
            format!("{}/0", whole)
        }
    });
    Some(rewritten.into_owned())
}

/// Top channels only accept post links: valid links are reposted under the
/// author's mention, anything else is removed.
pub async fn handle_top_channel_message(app: &App, message: &ChatMessage) -> Result<bool> {
    let Some(guild_id) = message.guild_id.as_deref() else {
        return Ok(false);
    };
    let db = app.stores.guild(guild_id)?;
    let channel = message.channel_id.clone();
    if !db.run_blocking(move |db| db.is_top_channel(&channel)).await? {
        return Ok(false);
    }

    match rewrite_links(&message.content) {
        Some(rewritten) => {
            let payload = MessagePayload::text(format!("<@{}> 分享：\n{}", message.author_id, rewritten))
                .mentioning(message.author_id.clone());
            app.platform.send_message(&message.channel_id, &payload).await?;
            delete_if_present(app.platform.as_ref(), &message.channel_id, &message.id).await?;
            debug!("Links: reposted message {} from {}", message.id, message.author_id);
        }
        None => {
            delete_if_present(app.platform.as_ref(), &message.channel_id, &message.id).await?;
            info!("Links: removed message {} without a post link from {}", message.id, message.channel_id);
        }
    }
    Ok(true)
}

/// Fires the first matching auto-trigger. Returns the preset sent, if any.
pub async fn handle_auto_triggers(app: &App, message: &ChatMessage, now: i64) -> Result<Option<String>> {
    let Some(guild_id) = message.guild_id.as_deref() else {
        return Ok(None);
    };
    let db = app.stores.guild(guild_id)?;
    let g = guild_id.to_string();
    let triggers = db.run_blocking(move |db| db.list_auto_triggers(&g)).await?;
    let Some(trigger) = triggers
        .into_iter()
        .find(|t| t.matches(&message.channel_id, &message.content))
    else {
        return Ok(None);
    };

    let preset_id = trigger.preset_id.clone();
    let Some(preset) = db.run_blocking(move |db| db.get_preset(&preset_id)).await? else {
        warn!("Links: trigger {} points at missing preset {}", trigger.id, trigger.preset_id);
        return Ok(None);
    };
    match send_preset(app, &preset, &message.channel_id, Some(&message.id), now).await {
        Ok(_) => Ok(Some(preset.id)),
        Err(e) if e.kind() == crate::error::ErrorKind::InvalidInput => {
            debug!("Links: trigger {} cooling down in {}", trigger.id, message.channel_id);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{Preset, PresetKind, StoreManager, TopChannel};
    use crate::platform::fake::FakePlatform;
    use crate::settings::{ConfigSnapshot, ConfigStore};
    use crate::shutdown::Shutdown;
    use std::sync::Arc;

    fn app() -> (Arc<FakePlatform>, Arc<App>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakePlatform::new());
        let app = App::new(
            Config::for_data_dir(dir.path()),
            Arc::new(ConfigStore::from_snapshot(ConfigSnapshot::default())),
            Arc::new(StoreManager::in_memory()),
            fake.clone(),
            Shutdown::never(),
        );
        let db = app.stores.guild("g").unwrap();
        db.upsert_top_channel(&TopChannel {
            channel_id: "top".into(),
            guild_id: "g".into(),
            message_limit: 10,
            excluded_ids: vec![],
        })
        .unwrap();
        (fake, app, dir)
    }

    fn message(id: &str, channel: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            channel_id: channel.into(),
            guild_id: Some("g".into()),
            author_id: "u".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_top_channel_link_is_reposted_under_author() {
        let (fake, app, _dir) = app();
        fake.add_live_message("top", "m1");
        let msg = message("m1", "top", "https://discord.com/channels/1/2");
        assert!(handle_top_channel_message(&app, &msg).await.unwrap());

        let sent = fake.sent_to("top");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].payload.content.as_deref(),
            Some("<@u> 分享：\nhttps://discord.com/channels/1/2/0")
        );
        assert_eq!(fake.deletes(), vec![("top".to_string(), "m1".to_string())]);
    }

    #[tokio::test]
    async fn test_top_channel_chatter_is_deleted() {
        let (fake, app, _dir) = app();
        fake.add_live_message("top", "m2");
        assert!(handle_top_channel_message(&app, &message("m2", "top", "nice!")).await.unwrap());
        assert!(fake.sent().is_empty());
        assert_eq!(fake.deletes().len(), 1);

        let elsewhere = message("m3", "general", "https://discord.com/channels/1/2");
        assert!(!handle_top_channel_message(&app, &elsewhere).await.unwrap());
        assert_eq!(fake.deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_trigger_matches_keyword_and_cools_down() {
        let (fake, app, _dir) = app();
        let db = app.stores.guild("g").unwrap();
        db.upsert_preset(&Preset {
            id: "g-hi".into(),
            guild_id: "g".into(),
            name: "Hi".into(),
            value: "Welcome!".into(),
            kind: PresetKind::Text,
            description: String::new(),
        })
        .unwrap();
        db.add_auto_trigger("g", &["hello".to_string()], "g-hi", None).unwrap();

        let fired = handle_auto_triggers(&app, &message("m1", "general", "HELLO there"), 100)
            .await
            .unwrap();
        assert_eq!(fired.as_deref(), Some("g-hi"));
        let sent = fake.sent_to("general");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.reply_to.as_deref(), Some("m1"));

        let again = handle_auto_triggers(&app, &message("m2", "general", "hello again"), 110)
            .await
            .unwrap();
        assert!(again.is_none());
        let unrelated = handle_auto_triggers(&app, &message("m3", "general", "bye"), 200)
            .await
            .unwrap();
        assert!(unrelated.is_none());
        assert_eq!(fake.sent_to("general").len(), 1);
    }

    #[test]
    fn test_channel_links_get_zero_message_id() {
        let out = rewrite_links("看这个 https://discord.com/channels/1/2 好帖").unwrap();
        assert_eq!(out, "看这个 https://discord.com/channels/1/2/0 好帖");
    }

    #[test]
    fn test_message_links_are_kept() {
        let input = "https://discord.com/channels/1/2/3 and https://ptb.discord.com/channels/1/5";
        let out = rewrite_links(input).unwrap();
        assert_eq!(out, "https://discord.com/channels/1/2/3 and https://ptb.discord.com/channels/1/5/0");
    }

    #[test]
    fn test_no_link_is_none() {
        assert!(rewrite_links("hello").is_none());
        assert!(rewrite_links("https://example.com/channels/1/2").is_none());
    }
}
