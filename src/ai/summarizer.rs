use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::CanonicalItem;

use super::prompt::build_prompt;
use super::Summarize;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// Summaries from the Anthropic messages API.
pub struct ApiSummarizer {
    client: Client,
    api_key: String,
    model: String,
    max_content_chars: usize,
}

impl ApiSummarizer {
    pub fn new(api_key: String, model: String, timeout_secs: u64, max_content_chars: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            max_content_chars,
        })
    }
}

#[async_trait]
impl Summarize for ApiSummarizer {
    async fn summarize(&self, item: &CanonicalItem) -> Result<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: 1024,
            messages: vec![Message {
                role: "user".to_string(),
                content: build_prompt(item, self.max_content_chars),
            }],
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Summarization(format!("API error {status}: {error_text}")));
        }

        let message_response: MessageResponse = response.json().await?;
        extract_text(message_response)
    }
}

fn extract_text(response: MessageResponse) -> Result<String> {
    let summary = response
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(AppError::Summarization("empty response".to_string()));
    }
    Ok(summary.to_string())
}
