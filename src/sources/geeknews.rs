use async_trait::async_trait;
use feed_rs::parser;

use crate::models::{CandidateItem, SourceKind};

use super::{FetchError, FetchResult, HttpClient, Source};

const GEEKNEWS_RSS_URL: &str = "https://news.hada.io/rss/news";

/// GeekNews (news.hada.io) through its syndication feed.
pub struct GeekNewsSource {
    client: HttpClient,
    feed_url: String,
}

impl GeekNewsSource {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            feed_url: GEEKNEWS_RSS_URL.to_string(),
        }
    }
}

#[async_trait]
impl Source for GeekNewsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::GeekNews
    }

    async fn fetch(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
        let body = self.client.get_text(SourceKind::GeekNews, &self.feed_url).await?;
        parse_feed(body.as_bytes(), limit)
    }
}

fn parse_feed(bytes: &[u8], limit: usize) -> FetchResult<Vec<CandidateItem>> {
    let feed = parser::parse(bytes)
        .map_err(|e| FetchError::malformed(SourceKind::GeekNews, format!("feed parse error: {e}")))?;

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone())?;
            let title = entry.title.map(|t| t.content)?;

            // Try content first, then fall back to summary
            let html = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));
            let body = html.and_then(|html| html2text::from_read(html.as_bytes(), 80).ok());

            let mut item = CandidateItem::new(SourceKind::GeekNews, url, title).with_body(body);
            item.published_at = entry.published.or(entry.updated);
            Some(item)
        })
        .take(limit)
        .collect();

    Ok(items)
}
