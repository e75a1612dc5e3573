use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchKind, SourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub article_id: i64,
    pub text: String,
    pub batch: String,
    pub kind: BatchKind,
    pub created_at: DateTime<Utc>,
}

/// Row returned by summary search, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub article_id: i64,
    pub source: SourceKind,
    pub url: String,
    pub title: String,
    pub summary_text: String,
    pub batch: String,
    pub created_at: DateTime<Utc>,
}
