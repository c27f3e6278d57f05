//! Evidence archival: referenced messages are fetched and their attachments
//! stored under `<root>/<user_id>/<attachment_id>-<name>`.

use crate::db::EvidenceItem;
use crate::error::Result;
use crate::platform::PlatformClient;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

fn link_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://(?:(?:ptb|canary)\.)?discord(?:app)?\.com/channels/(\d+|@me)/(\d+)/(\d+)").ok()
    })
    .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLink {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
}

/// Every message link found in `input`, in order.
pub fn parse_message_links(input: &str) -> Vec<MessageLink> {
    let Some(re) = link_pattern() else {
        return Vec::new();
    };
    re.captures_iter(input)
        .map(|c| MessageLink {
            guild_id: c[1].to_string(),
            channel_id: c[2].to_string(),
            message_id: c[3].to_string(),
        })
        .collect()
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct EvidenceArchive {
    root: PathBuf,
    platform: Arc<dyn PlatformClient>,
}

impl EvidenceArchive {
    pub fn new(root: &Path, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            root: root.to_path_buf(),
            platform,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, user_id: &str, attachment_id: &str, filename: &str) -> PathBuf {
        self.root
            .join(user_id)
            .join(format!("{}-{}", attachment_id, sanitize_file_name(filename)))
    }

    /// Fetches each linked message. Unreachable messages, failed downloads and
    /// failed writes are logged and left out rather than failing the action.
    pub async fn archive(&self, user_id: &str, links: &[MessageLink]) -> Result<Vec<EvidenceItem>> {
        let mut items = Vec::new();
        for link in links {
            let message = match self.platform.get_message(&link.channel_id, &link.message_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("Evidence: message {} unavailable: {}", link.message_id, e);
                    continue;
                }
            };
            let mut paths = Vec::new();
            for attachment in &message.attachments {
                let bytes = match self.platform.download_attachment(&attachment.url).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("Evidence: download of {} failed: {}", attachment.url, e);
                        continue;
                    }
                };
                let path = self.path_for(user_id, &attachment.id, &attachment.filename);
                if let Err(e) = store(&path, &bytes).await {
                    warn!("Evidence: writing {} failed: {}", path.display(), e);
                    continue;
                }
                debug!("Evidence: stored {} ({} bytes)", path.display(), bytes.len());
                paths.push(path.to_string_lossy().into_owned());
            }
            items.push(EvidenceItem {
                content: message.content,
                attachment_paths: paths,
            });
        }
        Ok(items)
    }
}

async fn store(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await
}
