//! Content source adapters.
//!
//! Every source implements [`Source`]: produce up to `limit` candidate items.
//! Adapters only talk to the network; they never touch the store. The
//! [`SourceRegistry`] holds the enabled adapters in priority order and fans a
//! fetch out across all of them.

mod geeknews;
mod github;
mod hackernews;
mod http;
mod producthunt;

use std::fmt;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;

use crate::config::Config;
use crate::error::Result;
use crate::models::{CandidateItem, SourceKind};

pub use geeknews::GeekNewsSource;
pub use github::GitHubSource;
pub use hackernews::HackerNewsSource;
pub use http::{retry, HttpClient, RetryPolicy};
pub use producthunt::ProductHuntSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeout, connection failure, 429 or 5xx. Retried.
    Transient,
    /// Rejected credentials or any other 4xx. Not retried.
    Auth,
    /// The response could not be understood. Not retried.
    Malformed,
    /// Transient failures used up every attempt.
    Exhausted,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::Auth => "auth",
            FetchErrorKind::Malformed => "malformed",
            FetchErrorKind::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{source_kind} fetch failed ({kind}) after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub source_kind: SourceKind,
    pub kind: FetchErrorKind,
    pub attempts: u32,
    pub message: String,
}

impl FetchError {
    pub fn new(source_kind: SourceKind, kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            source_kind,
            kind,
            attempts: 1,
            message: message.into(),
        }
    }

    pub fn malformed(source_kind: SourceKind, message: impl Into<String>) -> Self {
        Self::new(source_kind, FetchErrorKind::Malformed, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[async_trait]
pub trait Source: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Fetch up to `limit` items, retrying transient failures internally.
    async fn fetch(&self, limit: usize) -> FetchResult<Vec<CandidateItem>>;
}

/// Per-source outcome of one fan-out.
#[derive(Debug)]
pub struct SourceBatch {
    pub source: SourceKind,
    pub result: FetchResult<Vec<CandidateItem>>,
}

pub struct SourceRegistry {
    sources: Vec<Box<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Register an adapter. Sources are kept sorted by priority so callers
    /// can register in any order.
    pub fn register(&mut self, source: Box<dyn Source>) {
        self.sources.push(source);
        self.sources.sort_by_key(|s| s.kind().priority());
    }

    /// Build the adapters enabled in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = HttpClient::new(
            RetryPolicy::from_config(&config.sources),
            config.sources.request_timeout_secs,
        )?;

        let mut registry = Self::new();
        for kind in &config.sources.enabled {
            let source: Box<dyn Source> = match kind {
                SourceKind::HackerNews => Box::new(HackerNewsSource::new(client.clone())),
                SourceKind::GeekNews => Box::new(GeekNewsSource::new(client.clone())),
                SourceKind::GitHub => Box::new(GitHubSource::new(client.clone())),
                SourceKind::ProductHunt => Box::new(ProductHuntSource::new(
                    client.clone(),
                    config.sources.producthunt_client_id.clone().unwrap_or_default(),
                    config.sources.producthunt_client_secret.clone().unwrap_or_default(),
                )),
            };
            registry.register(source);
        }
        Ok(registry)
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Run every adapter concurrently. Results come back in priority order
    /// regardless of completion order.
    pub async fn fetch_all(&self, limit: usize) -> Vec<SourceBatch> {
        let futures = self.sources.iter().map(|source| async move {
            let kind = source.kind();
            let result = source.fetch(limit).await;
            match &result {
                Ok(items) => tracing::info!(source = %kind, count = items.len(), "fetched items"),
                Err(e) => tracing::warn!(source = %kind, error = %e, "source failed"),
            }
            SourceBatch {
                source: kind,
                result,
            }
        });
        join_all(futures).await
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Join non-empty parts with " | ", the body format shared by the list-style
/// sources.
pub(crate) fn join_parts(parts: &[Option<String>]) -> Option<String> {
    let parts: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(SourceKind, usize);

    #[async_trait]
    impl Source for Fixed {
        fn kind(&self) -> SourceKind {
            self.0
        }

        async fn fetch(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
            Ok((0..self.1.min(limit))
                .map(|i| CandidateItem::new(self.0, format!("https://{}.test/{i}", self.0), "t"))
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl Source for Broken {
        fn kind(&self) -> SourceKind {
            SourceKind::GeekNews
        }

        async fn fetch(&self, _limit: usize) -> FetchResult<Vec<CandidateItem>> {
            Err(FetchError::new(SourceKind::GeekNews, FetchErrorKind::Exhausted, "down").with_attempts(3))
        }
    }

    #[tokio::test]
    async fn registry_orders_by_priority_and_isolates_failures() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(Fixed(SourceKind::ProductHunt, 2)));
        registry.register(Box::new(Broken));
        registry.register(Box::new(Fixed(SourceKind::HackerNews, 5)));

        assert_eq!(
            registry.kinds(),
            vec![SourceKind::HackerNews, SourceKind::GeekNews, SourceKind::ProductHunt]
        );

        let batches = registry.fetch_all(3).await;
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].result.as_ref().unwrap().len(), 3);
        let err = batches[1].result.as_ref().unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(batches[2].result.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn join_parts_skips_blanks() {
        let joined = join_parts(&[Some("A tool".into()), None, Some("  ".into()), Some("Stars: 5".into())]);
        assert_eq!(joined.as_deref(), Some("A tool | Stars: 5"));
        assert_eq!(join_parts(&[None]), None);
    }
}
