//! Codepoint-aware truncation and embed description helpers.

/// First `max` codepoints of `input`.
pub fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

/// Like [`truncate_chars`] but marks the cut with `…`.
pub fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let mut out = truncate_chars(input, max.saturating_sub(1));
    out.push('…');
    out
}

pub fn char_len(input: &str) -> usize {
    input.chars().count()
}

/// Joins `lines` with newlines, dropping trailing lines until the result
/// (plus a `（显示前 m 个，共 n 个）` note when lines were dropped) fits in
/// `budget` codepoints.
pub fn safe_description(lines: &[String], total: usize, budget: usize) -> String {
    let mut shown = lines.len();
    loop {
        let mut body = lines[..shown].join("\n");
        if shown < total {
            body.push_str(&format!("\n（显示前 {} 个，共 {} 个）", shown, total));
        }
        if char_len(&body) <= budget || shown == 0 {
            return truncate_chars(&body, budget);
        }
        shown -= 1;
    }
}

/// Escapes characters that would break a markdown link label.
pub fn escape_link_label(input: &str) -> String {
    input
        .replace('[', "［")
        .replace(']', "］")
        .replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_codepoints() {
        assert_eq!(truncate_chars("你好世界", 2), "你好");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(ellipsize("abcdef", 4), "abc…");
        assert_eq!(ellipsize("abc", 4), "abc");
    }

    #[test]
    fn test_safe_description_drops_trailing_lines() {
        let lines: Vec<String> = (0..10).map(|i| format!("line-{:02}", i)).collect();
        let full = safe_description(&lines, 10, 1000);
        assert!(!full.contains("显示前"));

        let partial = safe_description(&lines[..3], 12, 1000);
        assert!(partial.ends_with("（显示前 3 个，共 12 个）"));

        let tight = safe_description(&lines, 10, 40);
        assert!(char_len(&tight) <= 40);
        assert!(tight.contains("共 10 个"));
    }

    #[test]
    fn test_escape_link_label() {
        assert_eq!(escape_link_label("[WIP]\nart"), "［WIP］ art");
    }
}
