//! Gateway event loop.

use super::{links, router};
use crate::platform::GatewayEvent;
use crate::App;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consumes gateway events until shutdown. Interactions are handled on their
/// own tasks so a slow handler never stalls the stream.
pub async fn run(app: Arc<App>, mut events: mpsc::Receiver<GatewayEvent>) {
    let mut shutdown = app.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Session: event stream closed");
                    break;
                };
                dispatch(&app, event).await;
            }
        }
    }
    info!("Session: event loop stopped");
}

pub async fn dispatch(app: &Arc<App>, event: GatewayEvent) {
    match event {
        GatewayEvent::Ready { user_name, guild_ids } => {
            info!("Session: connected as {} in {} guild(s)", user_name, guild_ids.len());
            app.ready.notify_one();
            let worker = app.clone();
            app.tasks.spawn(async move {
                let app = worker;
                if !app.config.disable_command_unregister {
                    if let Err(e) = app.platform.unregister_global_commands().await {
                        warn!("Commands: removing global commands failed: {}", e);
                    }
                }
                super::handlers::admin::register_commands(&app, super::handlers::admin::REGISTRATION_THROTTLE).await;
            });
        }
        GatewayEvent::ThreadCreate(thread) => match app.scanner.index_thread(&thread).await {
            Ok(Some(post)) => debug!("Session: thread {} indexed", post.id),
            Ok(None) => {}
            Err(e) => warn!("Session: indexing thread {} failed: {}", thread.id, e),
        },
        GatewayEvent::ThreadDelete {
            thread_id,
            parent_id,
            guild_id,
        } => {
            if let Err(e) = app
                .scanner
                .remove_thread(&guild_id, parent_id.as_deref(), &thread_id)
                .await
            {
                warn!("Session: removing thread {} failed: {}", thread_id, e);
            }
        }
        GatewayEvent::MessageCreate(message) => {
            if message.author_is_bot {
                return;
            }
            match links::handle_top_channel_message(app, &message).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!("Session: link rewrite of {} failed: {}", message.id, e),
            }
            if let Err(e) = links::handle_auto_triggers(app, &message, crate::now_epoch()).await {
                warn!("Session: auto-trigger for {} failed: {}", message.id, e);
            }
        }
        GatewayEvent::InteractionCreate(interaction) => {
            let worker = app.clone();
            app.tasks.spawn(async move {
                router::handle_interaction(&worker, &interaction).await;
            });
        }
    }
}
