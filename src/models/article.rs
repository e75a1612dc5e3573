use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SourceKind, Summary};

/// Normalized adapter output. Never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub source: SourceKind,
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl CandidateItem {
    pub fn new(source: SourceKind, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            url: url.into(),
            title: title.into(),
            body: None,
            published_at: None,
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body.filter(|b| !b.trim().is_empty());
        self
    }
}

/// Another source that reported the exact same canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRef {
    pub source: SourceKind,
    pub url: String,
}

/// A same-topic item from a different source with its own canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedRef {
    pub source: SourceKind,
    pub url: String,
    pub title: String,
}

/// One real-world article after cross-source matching.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalItem {
    pub source: SourceKind,
    /// Canonicalized URL, the persisted dedup key.
    pub url: String,
    /// URL as the source reported it.
    pub source_url: String,
    pub title: String,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub duplicates: Vec<DuplicateRef>,
    pub related: Vec<RelatedRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source: SourceKind,
    pub url: String,
    pub source_url: String,
    pub title: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub source: SourceKind,
    pub url: String,
    pub source_url: String,
    pub title: String,
    pub content: Option<String>,
}

impl From<&CanonicalItem> for NewArticle {
    fn from(item: &CanonicalItem) -> Self {
        Self {
            source: item.source,
            url: item.url.clone(),
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            content: item.body.clone(),
        }
    }
}

/// Article with its latest summary and cross-referenced articles.
#[derive(Debug, Clone)]
pub struct ArticleDetail {
    pub article: Article,
    pub summary: Option<Summary>,
    pub related: Vec<Article>,
}
