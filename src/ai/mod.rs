mod command;
mod prompt;
mod summarizer;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{SummarizerBackend, SummarizerConfig};
use crate::error::{AppError, Result};
use crate::models::CanonicalItem;

pub use command::CommandSummarizer;
pub use prompt::{build_prompt, truncate_chars};
pub use summarizer::ApiSummarizer;

/// Turns one canonical item into summary text. Callers invoke it one item
/// at a time; implementations need not support concurrent calls.
#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, item: &CanonicalItem) -> Result<String>;
}

/// Retries a backend after each listed pause.
pub struct Retrying<S> {
    inner: S,
    delays: Vec<Duration>,
}

impl<S: Summarize> Retrying<S> {
    pub fn new(inner: S, delays: Vec<Duration>) -> Self {
        Self { inner, delays }
    }
}

#[async_trait]
impl<S: Summarize> Summarize for Retrying<S> {
    async fn summarize(&self, item: &CanonicalItem) -> Result<String> {
        let attempts = self.delays.len() + 1;
        let mut attempt = 1;
        loop {
            match self.inner.summarize(item).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, attempts, error = %e, url = %item.url, "summarization attempt failed");
                    tokio::time::sleep(self.delays[attempt - 1]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Build the configured backend, wrapped with its retry schedule.
pub fn from_config(config: &SummarizerConfig) -> Result<Box<dyn Summarize>> {
    let delays = config
        .retry_delays_secs
        .iter()
        .map(|s| Duration::from_secs(*s))
        .collect();

    let summarizer: Box<dyn Summarize> = match config.backend {
        SummarizerBackend::Api => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AppError::Config("summarizer.api_key is required for the api backend".into()))?;
            let api = ApiSummarizer::new(
                api_key,
                config.model.clone(),
                config.timeout_secs,
                config.max_content_chars,
            )?;
            Box::new(Retrying::new(api, delays))
        }
        SummarizerBackend::Command => {
            let command =
                CommandSummarizer::new(&config.command, config.timeout_secs, config.max_content_chars)?;
            Box::new(Retrying::new(command, delays))
        }
    };
    Ok(summarizer)
}
