use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SourceKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bookmark {
    pub id: i64,
    pub user_id: String,
    pub article_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Bookmark joined with its article and the article's latest summary.
#[derive(Debug, Clone, Serialize)]
pub struct BookmarkEntry {
    pub bookmark_id: i64,
    pub bookmarked_at: DateTime<Utc>,
    pub article_id: i64,
    pub source: SourceKind,
    pub url: String,
    pub title: String,
    pub summary_text: Option<String>,
}
