//! Turns a user's posts into the embeds of one navigation slot.

use crate::config::EMBED_DESCRIPTION_BUDGET;
use crate::db::Post;
use crate::platform::channel_url;
use crate::platform::message::Embed;
use crate::text::{char_len, ellipsize, escape_link_label, safe_description};

/// Posts per My Works page, whatever their length.
pub const POSTS_PER_PAGE: usize = 20;
pub const RANKING_SIZE: usize = 10;
pub const EMPTY_PARTITION: &str = "暂无作品记录";
const TITLE_LIMIT: usize = 80;

const MY_WORKS_COLOR: u32 = 0x5865F2;
const TOP_WORKS_COLOR: u32 = 0xFEE75C;
const LATEST_WORKS_COLOR: u32 = 0x57F287;

/// Posts of one partition belonging to the navigation owner.
#[derive(Debug, Clone, Default)]
pub struct PartitionWorks {
    pub name: String,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNavigation {
    pub my_works: Vec<Embed>,
    pub top_works: Embed,
    pub latest_works: Embed,
}

pub fn post_line(guild_id: &str, post: &Post) -> String {
    format!(
        "[{}]({}) · 💬 {} · <t:{}:R>",
        escape_link_label(&ellipsize(&post.title, TITLE_LIMIT)),
        channel_url(guild_id, &post.id),
        post.message_count,
        post.created_at
    )
}

/// Splits `lines` into pages bounded by both the description budget and
/// [`POSTS_PER_PAGE`].
fn paginate(lines: &[String]) -> Vec<Vec<String>> {
    let mut pages: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut len = 0;
    for line in lines {
        let line_len = char_len(line) + 1;
        if !current.is_empty() && (len + line_len > EMBED_DESCRIPTION_BUDGET || current.len() >= POSTS_PER_PAGE) {
            pages.push(std::mem::take(&mut current));
            len = 0;
        }
        current.push(line.clone());
        len += line_len;
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

/// One or more embeds for a partition; never an empty embed.
pub fn my_works_pages(guild_id: &str, works: &PartitionWorks) -> Vec<Embed> {
    if works.posts.is_empty() {
        return vec![Embed::new()
            .title(format!("📚 {}", works.name))
            .description(EMPTY_PARTITION)
            .color(MY_WORKS_COLOR)];
    }

    let lines: Vec<String> = works.posts.iter().map(|p| post_line(guild_id, p)).collect();
    let pages = paginate(&lines);
    let total = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(k, page)| {
            let title = if total > 1 {
                format!("📚 {} (第{}/{}页)", works.name, k + 1, total)
            } else {
                format!("📚 {} · 共 {} 篇", works.name, works.posts.len())
            };
            Embed::new()
                .title(title)
                .description(crate::text::truncate_chars(&page.join("\n"), EMBED_DESCRIPTION_BUDGET))
                .color(MY_WORKS_COLOR)
        })
        .collect()
}

fn ranking_embed(guild_id: &str, title: &str, color: u32, posts: &[&Post]) -> Embed {
    let lines: Vec<String> = posts
        .iter()
        .take(RANKING_SIZE)
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, post_line(guild_id, p)))
        .collect();
    let description = if lines.is_empty() {
        EMPTY_PARTITION.to_string()
    } else {
        safe_description(&lines, posts.len(), EMBED_DESCRIPTION_BUDGET)
    };
    Embed::new().title(title).description(description).color(color)
}

/// Renders every embed of a slot. Deterministic for identical input.
pub fn render(guild_id: &str, owner_name: &str, partitions: &[PartitionWorks]) -> RenderedNavigation {
    let mut my_works = Vec::new();
    for works in partitions {
        my_works.extend(my_works_pages(guild_id, works));
    }
    if my_works.is_empty() {
        my_works.push(
            Embed::new()
                .title("📚 我的作品")
                .description(EMPTY_PARTITION)
                .color(MY_WORKS_COLOR),
        );
    }

    let mut all: Vec<&Post> = partitions.iter().flat_map(|w| w.posts.iter()).collect();
    all.sort_by(|a, b| b.message_count.cmp(&a.message_count).then_with(|| a.id.cmp(&b.id)));
    let top_works = ranking_embed(guild_id, &format!("🔥 {} 的热门作品", owner_name), TOP_WORKS_COLOR, &all);

    all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    let latest_works = ranking_embed(guild_id, &format!("🆕 {} 的最新作品", owner_name), LATEST_WORKS_COLOR, &all);

    RenderedNavigation {
        my_works,
        top_works,
        latest_works,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(i: usize, replies: i64, title_len: usize) -> Post {
        Post {
            id: format!("{}", 1000 + i),
            title: "标".repeat(title_len),
            message_count: replies,
            created_at: 1_700_000_000 + i as i64,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_partition_has_placeholder() {
        let pages = my_works_pages("g", &PartitionWorks { name: "art".into(), posts: vec![] });
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].description.as_deref(), Some(EMPTY_PARTITION));
    }

    #[test]
    fn test_single_page_title_has_count() {
        let works = PartitionWorks {
            name: "art".into(),
            posts: (0..3).map(|i| post(i, 1, 5)).collect(),
        };
        let pages = my_works_pages("g", &works);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].title.as_deref().unwrap().contains("共 3 篇"));
    }

    #[test]
    fn test_long_partition_paginates() {
        let works = PartitionWorks {
            name: "art".into(),
            posts: (0..45).map(|i| post(i, 1, 78)).collect(),
        };
        let pages = my_works_pages("g", &works);
        assert_eq!(pages.len(), 3);
        for (k, page) in pages.iter().enumerate() {
            assert!(char_len(page.description.as_deref().unwrap()) <= EMBED_DESCRIPTION_BUDGET);
            assert!(page
                .title
                .as_deref()
                .unwrap()
                .contains(&format!("(第{}/{}页)", k + 1, pages.len())));
        }
    }

    #[test]
    fn test_rankings_order_and_limit() {
        let works = PartitionWorks {
            name: "art".into(),
            posts: (0..15).map(|i| post(i, i as i64, 4)).collect(),
        };
        let rendered = render("g", "Ann", &[works]);
        let top = rendered.top_works.description.unwrap();
        assert!(top.starts_with("1. [标标标标](https://discord.com/channels/g/1014)"));
        assert!(top.contains("（显示前 10 个，共 15 个）"));
        let latest = rendered.latest_works.description.unwrap();
        assert!(latest.starts_with("1. [标标标标](https://discord.com/channels/g/1014)"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let works = vec![PartitionWorks {
            name: "art".into(),
            posts: (0..25).map(|i| post(i, 2, 6)).collect(),
        }];
        assert_eq!(render("g", "Ann", &works), render("g", "Ann", &works));
        assert_eq!(render("g", "Ann", &works).my_works.len(), 2);
    }
}
