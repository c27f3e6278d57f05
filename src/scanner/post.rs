use crate::db::Post;
use crate::platform::{ChatMessage, ThreadInfo};
use crate::text::truncate_chars;

pub const CONTENT_LIMIT: usize = 512;

/// Normalizes a thread and its starter message into a [`Post`].
pub fn build_post(thread: &ThreadInfo, channel_id: &str, first: &ChatMessage) -> Post {
    let cover_image_url = first
        .attachments
        .iter()
        .find(|a| a.is_image())
        .map(|a| a.url.clone())
        .or_else(|| first.embed_image_urls.first().cloned());

    let created_at = [thread.created_at, first.created_at]
        .into_iter()
        .find(|t| *t > 0)
        .unwrap_or(1);

    let author_id = if first.author_id.is_empty() {
        thread.owner_id.clone().unwrap_or_default()
    } else {
        first.author_id.clone()
    };

    Post {
        id: thread.id.clone(),
        channel_id: thread
            .parent_id
            .clone()
            .unwrap_or_else(|| channel_id.to_string()),
        title: thread.name.clone(),
        author_name: first.author_name.clone(),
        author_id,
        content: truncate_chars(&first.content, CONTENT_LIMIT),
        tags: thread.tags.join(","),
        message_count: thread.message_count,
        created_at,
        cover_image_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::{starter, thread};
    use crate::platform::Attachment;

    #[test]
    fn test_build_post_normalizes_fields() {
        let mut t = thread("t1", "g", "c1", 1000);
        t.tags = vec!["10".into(), "20".into()];
        t.message_count = 4;
        let mut m = starter("t1", "u1", &"字".repeat(600));
        m.attachments.push(Attachment {
            id: "a1".into(),
            filename: "cover.jpg".into(),
            url: "https://cdn/cover.jpg".into(),
            content_type: None,
        });

        let post = build_post(&t, "c1", &m);
        assert_eq!(post.content.chars().count(), CONTENT_LIMIT);
        assert_eq!(post.tags, "10,20");
        assert_eq!(post.created_at, 1000);
        assert_eq!(post.author_id, "u1");
        assert_eq!(post.cover_image_url.as_deref(), Some("https://cdn/cover.jpg"));
    }

    #[test]
    fn test_created_at_is_positive() {
        let t = thread("t1", "g", "c1", 0);
        let post = build_post(&t, "c1", &starter("t1", "u", ""));
        assert!(post.created_at > 0);
    }
}
