use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::TelegramConfig;
use crate::error::{AppError, Result};

use super::{Digest, DigestEntry, Notifier};

const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

/// Sends digests through the Telegram Bot API as HTML messages.
pub struct TelegramNotifier {
    client: Client,
    api_base_url: String,
    bot_token: String,
    chat_id: String,
    pause: Duration,
}

impl TelegramNotifier {
    pub fn new(api_base_url: &str, bot_token: String, chat_id: String, pause: Duration) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
            pause,
        })
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .clone()
            .ok_or_else(|| AppError::Config("telegram.bot_token is required".into()))?;
        let chat_id = config
            .chat_id
            .clone()
            .ok_or_else(|| AppError::Config("telegram.chat_id is required".into()))?;
        Self::new(
            &config.api_base_url,
            token,
            chat_id,
            Duration::from_millis(config.message_pause_ms),
        )
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base_url, self.bot_token)
    }

    pub async fn send_html_message(&self, html: &str) -> Result<()> {
        let message = SendMessage {
            chat_id: &self.chat_id,
            text: html,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        let body: TelegramResponse = match response.json().await {
            Ok(body) => body,
            Err(_) => return Err(AppError::Delivery(format!("Telegram API error: HTTP {status}"))),
        };

        if !status.is_success() || !body.ok {
            let error_msg = body
                .description
                .unwrap_or_else(|| "Unknown Telegram API error".to_string());
            return Err(AppError::Delivery(error_msg));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, digest: &Digest) -> Result<()> {
        let mut messages = vec![format_header(digest)];
        let total = digest.entries.len();
        for (idx, entry) in digest.entries.iter().enumerate() {
            messages.extend(entry_messages(entry, idx + 1, total, MAX_MESSAGE_CHARS));
        }

        let mut failed = 0;
        for (idx, message) in messages.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.pause).await;
            }
            if let Err(e) = self.send_html_message(message).await {
                tracing::warn!(batch = %digest.label, error = %e, "failed to send message");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(AppError::Delivery(format!(
                "{failed} of {} messages failed",
                messages.len()
            )));
        }
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_html(text).replace('"', "&quot;")
}

fn format_header(digest: &Digest) -> String {
    match digest.entries.len() {
        0 => format!("<b>Tech Digest</b> ({})\nNo new articles this time.", escape_html(digest.label.as_str())),
        n => format!(
            "<b>Tech Digest</b> ({})\n{n} new article{}.",
            escape_html(digest.label.as_str()),
            if n == 1 { "" } else { "s" }
        ),
    }
}

/// Render one entry as HTML messages of at most `max_chars` characters.
/// The summary is split as plain text and escaped per chunk, so no cut
/// lands inside a tag or an entity.
fn entry_messages(entry: &DigestEntry, index: usize, total: usize, max_chars: usize) -> Vec<String> {
    let article = &entry.article;
    let head = format!(
        "<b>[{index}/{total}] {}</b>\n<i>{}</i>\n\n",
        escape_html(&article.title),
        article.source.label()
    );

    let mut tail = String::from("\n");
    if !entry.duplicates.is_empty() {
        let sources: Vec<&str> = entry.duplicates.iter().map(|d| d.source.label()).collect();
        tail.push_str(&format!("\nAlso on: {}", sources.join(", ")));
    }
    for related in &entry.related {
        tail.push_str(&format!(
            "\nRelated: <a href=\"{}\">{}</a> ({})",
            escape_attr(&related.url),
            escape_html(&related.title),
            related.source.label()
        ));
    }
    tail.push_str(&format!(
        "\n<a href=\"{}\">Read the original</a> (#{})",
        escape_attr(&article.source_url),
        article.id
    ));

    let budget = max_chars.saturating_sub(head.chars().count()).max(1);
    let mut messages: Vec<String> = split_message(entry.summary.text.trim(), budget)
        .iter()
        .map(|chunk| escape_html(chunk))
        .collect();
    match messages.first_mut() {
        Some(first) => first.insert_str(0, &head),
        None => messages.push(head),
    }

    let tail_chars = tail.chars().count();
    match messages.last_mut() {
        Some(last) if last.chars().count() + tail_chars <= max_chars => last.push_str(&tail),
        _ => messages.push(tail.trim_start_matches('\n').to_string()),
    }
    messages
}

/// Characters `c` takes once HTML-escaped.
fn escaped_width(c: char) -> usize {
    match c {
        '&' => 5,
        '<' | '>' => 4,
        _ => 1,
    }
}

/// Byte offset where the escaped form of `text` would pass `max_chars`, or
/// `None` if all of it fits. Always past the first character.
fn window_end(text: &str, max_chars: usize) -> Option<usize> {
    let mut width = 0;
    for (i, c) in text.char_indices() {
        width += escaped_width(c);
        if width > max_chars {
            return Some(if i == 0 { c.len_utf8() } else { i });
        }
    }
    None
}

/// Split plain `text` into chunks whose HTML-escaped form is at most
/// `max_chars` characters, preferring paragraph breaks, then line breaks,
/// then spaces.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some(window_end) = window_end(remaining, max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };
        let window = &remaining[..window_end];

        let (cut, skip) = if let Some(i) = window.rfind("\n\n").filter(|&i| i > 0) {
            (i, 2)
        } else if let Some(i) = window.rfind('\n').filter(|&i| i > 0) {
            (i, 1)
        } else if let Some(i) = window.rfind(' ').filter(|&i| i > 0) {
            (i, 1)
        } else {
            (window_end, 0)
        };

        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut + skip..];
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, BatchKind, BatchLabel, DuplicateRef, RelatedRef, SourceKind, Summary};
    use chrono::{NaiveDate, Utc};

    fn entry() -> DigestEntry {
        DigestEntry {
            article: Article {
                id: 7,
                source: SourceKind::HackerNews,
                url: "https://a.example/x".into(),
                source_url: "https://a.example/x?a=1&b=2".into(),
                title: "Generics <T> & you".into(),
                content: None,
                created_at: Utc::now(),
            },
            summary: Summary {
                id: 1,
                article_id: 7,
                text: "## Summary\nUse <T> wisely.".into(),
                batch: "morning:2026-10-18".into(),
                kind: BatchKind::Morning,
                created_at: Utc::now(),
            },
            duplicates: vec![DuplicateRef {
                source: SourceKind::GeekNews,
                url: "https://a.example/x/".into(),
            }],
            related: vec![RelatedRef {
                source: SourceKind::GitHub,
                url: "https://github.com/a/x".into(),
                title: "a/x".into(),
            }],
        }
    }

    #[test]
    fn entry_is_escaped_and_cross_referenced() {
        let messages = entry_messages(&entry(), 1, 3, MAX_MESSAGE_CHARS);
        assert_eq!(messages.len(), 1);
        let text = &messages[0];
        assert!(text.starts_with("<b>[1/3] Generics &lt;T&gt; &amp; you</b>"));
        assert!(text.contains("Use &lt;T&gt; wisely."));
        assert!(text.contains("Also on: GeekNews"));
        assert!(text.contains("Related: <a href=\"https://github.com/a/x\">a/x</a> (GitHub Trending)"));
        assert!(text.contains("href=\"https://a.example/x?a=1&amp;b=2\""));
    }

    fn entities_are_whole(html: &str) -> bool {
        html.match_indices('&').all(|(i, _)| {
            ["&amp;", "&lt;", "&gt;", "&quot;"]
                .iter()
                .any(|entity| html[i..].starts_with(entity))
        })
    }

    #[test]
    fn long_summaries_split_outside_tags_and_entities() {
        let mut long = entry();
        long.summary.text = "a&b <T> c&&d ".repeat(600);

        let messages = entry_messages(&long, 2, 5, MAX_MESSAGE_CHARS);
        assert!(messages.len() > 1);
        assert!(messages[0].starts_with("<b>[2/5] "));
        for message in &messages {
            assert!(message.chars().count() <= MAX_MESSAGE_CHARS);
            assert!(entities_are_whole(message), "broken entity in {message:?}");
            assert_eq!(message.matches("<a ").count(), message.matches("</a>").count());
            assert_eq!(message.matches("<b>").count(), message.matches("</b>").count());
        }
        let last = messages.last().unwrap();
        assert!(last.contains("Read the original</a> (#7)"));
        assert_eq!(messages.iter().filter(|m| m.contains("Also on: GeekNews")).count(), 1);
    }

    #[test]
    fn tail_moves_to_its_own_message_when_it_does_not_fit() {
        let mut full = entry();
        full.summary.text = "x".repeat(60);

        let messages = entry_messages(&full, 1, 1, 200);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].ends_with(&"x".repeat(20)));
        assert!(messages[1].starts_with("Also on: GeekNews"));
        assert!(messages.iter().all(|m| m.chars().count() <= 200));
    }

    #[test]
    fn split_counts_escaped_width() {
        assert_eq!(split_message("&&&&", 10), vec!["&&", "&&"]);
        assert_eq!(split_message("ab <c>", 9), vec!["ab", "<c>"]);
        assert_eq!(split_message("&", 1), vec!["&"]);
    }

    #[test]
    fn header_reports_empty_batches() {
        let label = BatchLabel::scheduled(BatchKind::Evening, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        let digest = Digest { label, entries: vec![] };
        assert!(format_header(&digest).contains("No new articles"));
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert!(split_message("", 10).is_empty());
    }

    #[test]
    fn prefers_paragraph_then_line_then_space() {
        assert_eq!(split_message("aaaa\n\nbbbb", 8), vec!["aaaa", "bbbb"]);
        assert_eq!(split_message("aaaa\nbbbb", 8), vec!["aaaa", "bbbb"]);
        assert_eq!(split_message("aaaa bbbb", 8), vec!["aaaa", "bbbb"]);
        assert_eq!(split_message("aaaaaaaaaa", 4), vec!["aaaa", "aaaa", "aa"]);
    }

    #[test]
    fn chunks_respect_the_limit_for_multibyte_text() {
        let text = "가나다 ".repeat(2000);
        let chunks = split_message(&text, 4000);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4000));
    }
}
