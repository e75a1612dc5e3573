use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SourcesConfig;
use crate::error::Result;
use crate::models::SourceKind;

use super::{FetchError, FetchErrorKind, FetchResult};

/// Bounded exponential backoff: `base`, `2 * base`, `4 * base`, ...
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &SourcesConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_base_ms))
    }

    /// Delay before the attempt that follows failed attempt number `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
/// `op` receives the 1-based attempt number.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, source: SourceKind, mut op: F) -> FetchResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(source = %source, attempt, ?delay, error = %e.message, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(FetchError {
                    kind: FetchErrorKind::Exhausted,
                    ..e.with_attempts(attempt)
                });
            }
            Err(e) => return Err(e.with_attempts(attempt)),
        }
    }
}

fn classify_status(status: StatusCode) -> Option<FetchErrorKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FetchErrorKind::Transient)
    } else {
        Some(FetchErrorKind::Auth)
    }
}

fn classify_transport(e: &reqwest::Error) -> FetchErrorKind {
    if e.is_decode() {
        FetchErrorKind::Malformed
    } else if e.is_builder() {
        FetchErrorKind::Auth
    } else {
        FetchErrorKind::Transient
    }
}

/// Shared HTTP client for all adapters. Cheap to clone.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(policy: RetryPolicy, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("tech-digest/1.0")
            .build()?;

        Ok(Self { client, policy })
    }

    pub async fn get_text(&self, source: SourceKind, url: &str) -> FetchResult<String> {
        self.send(source, |client| client.get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, source: SourceKind, url: &str) -> FetchResult<T> {
        let body = self.get_text(source, url).await?;
        decode(source, &body)
    }

    pub async fn post_json<B, T>(
        &self,
        source: SourceKind,
        url: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> FetchResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self
            .send(source, |client| {
                let request = client.post(url).json(body);
                match bearer {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;
        decode(source, &text)
    }

    async fn send<F>(&self, source: SourceKind, build: F) -> FetchResult<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = &self.client;
        let build = &build;
        retry(&self.policy, source, |_| async move {
            let response = build(client)
                .send()
                .await
                .map_err(|e| FetchError::new(source, classify_transport(&e), e.to_string()))?;

            let status = response.status();
            if let Some(kind) = classify_status(status) {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                return Err(FetchError::new(source, kind, format!("HTTP {status}: {snippet}")));
            }

            response
                .text()
                .await
                .map_err(|e| FetchError::new(source, classify_transport(&e), e.to_string()))
        })
        .await
    }
}

fn decode<T: DeserializeOwned>(source: SourceKind, body: &str) -> FetchResult<T> {
    serde_json::from_str(body).map_err(|e| FetchError::malformed(source, format!("invalid JSON: {e}")))
}
