use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CallError;

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

/// A single prompt-in, text-out language model call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String, CallError>;
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    text: String,
}

pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
}

impl ClaudeClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_endpoint(api_key, model, ANTHROPIC_URL)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            max_tokens: 1024,
        })
    }
}

impl std::fmt::Debug for ClaudeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeClient")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl LanguageModel for ClaudeClient {
    async fn invoke(&self, prompt: &str) -> Result<String, CallError> {
        let request = ClaudeRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.2,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(classify_status(status, message));
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .map_err(|e| CallError::InvalidResponse(e.to_string()))?;

        let text = claude_response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(CallError::InvalidResponse("empty completion".to_string()));
        }

        Ok(text)
    }
}

fn classify_status(status: StatusCode, message: String) -> CallError {
    if status == StatusCode::TOO_MANY_REQUESTS || message.contains("rate_limit") {
        CallError::RateLimited(message)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        CallError::Timeout
    } else {
        CallError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pulls a JSON object out of a reply that may wrap it in code fences or prose.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned replies in order and records every prompt it sees.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, CallError>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<String, CallError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn invoke(&self, prompt: &str) -> Result<String, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CallError::InvalidResponse("script exhausted".to_string())))
        }
    }
}
