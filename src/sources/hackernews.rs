use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use crate::models::{CandidateItem, SourceKind};

use super::{FetchResult, HttpClient, Source};

const HN_API_BASE: &str = "https://hacker-news.firebaseio.com/v0";

#[derive(Debug, Deserialize)]
struct HnItem {
    id: u64,
    title: Option<String>,
    url: Option<String>,
    text: Option<String>,
    time: Option<i64>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    dead: bool,
}

/// Top stories from the Hacker News Firebase API.
pub struct HackerNewsSource {
    client: HttpClient,
    base_url: String,
}

impl HackerNewsSource {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            base_url: HN_API_BASE.to_string(),
        }
    }

    async fn fetch_item(&self, id: u64) -> FetchResult<Option<HnItem>> {
        let url = format!("{}/item/{}.json", self.base_url, id);
        self.client.get_json(SourceKind::HackerNews, &url).await
    }
}

#[async_trait]
impl Source for HackerNewsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::HackerNews
    }

    async fn fetch(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
        let url = format!("{}/topstories.json", self.base_url);
        let ids: Vec<u64> = self.client.get_json(SourceKind::HackerNews, &url).await?;

        // Story lookups fail individually; order follows the top-stories list.
        let items: Vec<CandidateItem> = stream::iter(ids.into_iter().take(limit))
            .map(|id| async move {
                match self.fetch_item(id).await {
                    Ok(item) => item.and_then(to_candidate),
                    Err(e) => {
                        tracing::warn!(story = id, error = %e, "failed to fetch story");
                        None
                    }
                }
            })
            .buffered(5)
            .filter_map(|item| async { item })
            .collect()
            .await;

        Ok(items)
    }
}

fn to_candidate(item: HnItem) -> Option<CandidateItem> {
    if item.deleted || item.dead {
        return None;
    }
    let title = item.title.filter(|t| !t.trim().is_empty())?;
    let url = item
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={}", item.id));
    let body = item
        .text
        .and_then(|html| html2text::from_read(html.as_bytes(), 80).ok());

    let mut candidate = CandidateItem::new(SourceKind::HackerNews, url, title).with_body(body);
    candidate.published_at = item
        .time
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0));
    Some(candidate)
}
