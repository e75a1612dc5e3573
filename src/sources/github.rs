use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::models::{CandidateItem, SourceKind};

use super::{join_parts, FetchError, FetchResult, HttpClient, Source};

const OSSINSIGHT_API_URL: &str = "https://api.ossinsight.io/v1/trends/repos?period=past_week&language=All";
const GITHUB_TRENDING_URL: &str = "https://github.com/trending";

#[derive(Debug, Deserialize)]
struct TrendsResponse {
    data: Option<TrendsData>,
}

#[derive(Debug, Deserialize)]
struct TrendsData {
    #[serde(default)]
    rows: Vec<TrendRow>,
}

#[derive(Debug, Deserialize)]
struct TrendRow {
    repo_name: Option<String>,
    description: Option<String>,
    primary_language: Option<String>,
    // Reported as a string by the API, tolerated as a number too.
    stars: Option<serde_json::Value>,
}

/// Trending repositories. Uses the OSS Insight trends API and falls back to
/// the GitHub trending page when the API fails or comes back empty.
pub struct GitHubSource {
    client: HttpClient,
}

impl GitHubSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    async fn fetch_from_api(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
        let response: TrendsResponse = self
            .client
            .get_json(SourceKind::GitHub, OSSINSIGHT_API_URL)
            .await?;
        let items = parse_trends(response, limit);
        if items.is_empty() {
            return Err(FetchError::malformed(SourceKind::GitHub, "trends API returned no rows"));
        }
        Ok(items)
    }

    async fn fetch_from_page(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
        let html = self.client.get_text(SourceKind::GitHub, GITHUB_TRENDING_URL).await?;
        parse_trending_page(&html, limit)
    }
}

#[async_trait]
impl Source for GitHubSource {
    fn kind(&self) -> SourceKind {
        SourceKind::GitHub
    }

    async fn fetch(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
        match self.fetch_from_api(limit).await {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(error = %e, "trends API failed, scraping trending page");
                self.fetch_from_page(limit).await
            }
        }
    }
}

fn parse_trends(response: TrendsResponse, limit: usize) -> Vec<CandidateItem> {
    response
        .data
        .map(|d| d.rows)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let name = row.repo_name.filter(|n| !n.trim().is_empty())?;
            let stars = match row.stars {
                Some(serde_json::Value::String(s)) if s != "0" => Some(format!("Stars: {s}")),
                Some(serde_json::Value::Number(n)) if n.as_u64() != Some(0) => Some(format!("Stars: {n}")),
                _ => None,
            };
            let body = join_parts(&[
                row.description,
                row.primary_language.map(|l| format!("Language: {l}")),
                stars,
            ]);
            Some(CandidateItem::new(SourceKind::GitHub, format!("https://github.com/{name}"), name).with_body(body))
        })
        .take(limit)
        .collect()
}

fn parse_trending_page(html: &str, limit: usize) -> FetchResult<Vec<CandidateItem>> {
    let regex = |pattern: &str| {
        Regex::new(pattern).map_err(|e| FetchError::malformed(SourceKind::GitHub, e.to_string()))
    };
    let repo_re = regex(r#"(?s)<h2[^>]*>\s*<a[^>]*href="(/[^"]+)""#)?;
    let desc_re = regex(r#"(?s)<p[^>]*>(.*?)</p>"#)?;
    let lang_re = regex(r#"itemprop="programmingLanguage"[^>]*>([^<]+)<"#)?;
    let stars_re = regex(r#"(?s)href="[^"]*/stargazers"[^>]*>(.*?)</a>"#)?;
    let tag_re = regex(r"<[^>]+>")?;

    let text_of = |re: &Regex, chunk: &str| -> Option<String> {
        let raw = re.captures(chunk)?.get(1)?.as_str();
        let text = tag_re.replace_all(raw, "");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    };

    let items: Vec<CandidateItem> = html
        .split(r#"<article class="Box-row""#)
        .skip(1)
        .filter_map(|chunk| {
            let href = repo_re.captures(chunk)?.get(1)?.as_str().trim().to_string();
            let name = href.trim_start_matches('/').to_string();
            let body = join_parts(&[
                text_of(&desc_re, chunk),
                text_of(&lang_re, chunk).map(|l| format!("Language: {l}")),
                text_of(&stars_re, chunk).map(|s| format!("Stars: {s}")),
            ]);
            Some(CandidateItem::new(SourceKind::GitHub, format!("https://github.com{href}"), name).with_body(body))
        })
        .take(limit)
        .collect();

    if items.is_empty() {
        return Err(FetchError::malformed(SourceKind::GitHub, "no repositories on trending page"));
    }
    Ok(items)
}
