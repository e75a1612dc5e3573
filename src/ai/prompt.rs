use crate::models::CanonicalItem;

pub(crate) const STYLE_DIRECTIVE: &str = r#"Summarise the following tech news in British English (5-7 sentences).
If the provided content is sparse, rely on the title and URL.
Include:
1. Key insights for software developers
2. Actionable recommendations
3. For difficult vocabulary, add short definitions

Format:
## Summary
[summary text]

## Insights
- [insight 1]
- [insight 2]

## Action Items
- [action 1]
- [action 2]

## Vocabulary
- [word]: [definition]"#;

/// Cut `text` to at most `max_chars` characters without splitting one.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(item: &CanonicalItem, max_content_chars: usize) -> String {
    let content = item.body.as_deref().unwrap_or("");
    format!(
        "{STYLE_DIRECTIVE}\n\nArticle:\nTitle: {}\nURL: {}\nContent: {}\n",
        item.title,
        item.source_url,
        truncate_chars(content, max_content_chars)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("한국어 뉴스", 3), "한국어");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn prompt_carries_item_fields() {
        let item = CanonicalItem {
            source: SourceKind::HackerNews,
            url: "https://a.example/x".into(),
            source_url: "https://a.example/x/".into(),
            title: "Tokio 2.0".into(),
            body: Some("x".repeat(50)),
            published_at: None,
            duplicates: vec![],
            related: vec![],
        };
        let prompt = build_prompt(&item, 10);
        assert!(prompt.starts_with("Summarise the following tech news in British English"));
        assert!(prompt.contains("Title: Tokio 2.0"));
        assert!(prompt.contains("URL: https://a.example/x/"));
        assert!(prompt.contains(&format!("Content: {}\n", "x".repeat(10))));
        assert!(!prompt.contains(&"x".repeat(11)));
    }
}
