//! LLM collaborator.
//!
//! [`LlmClient`] is the seam between generative stages and the provider.
//! [`AnthropicClient`] talks to the Messages API with a blocking client;
//! tests use a scripted client instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::ProviderError;
use crate::io::config::{LlmConfig, ModelConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One prior conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A single completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: ModelConfig,
    pub system: String,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
}

/// Abstraction over LLM providers.
pub trait LlmClient {
    /// Return the response text for `request`.
    fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    /// Build a client from config. Fails when no API key is configured.
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)?;
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

impl LlmClient for AnthropicClient {
    #[instrument(skip_all, fields(model = %request.model.model, prompt_chars = request.prompt.len()))]
    fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        let timeout = Duration::from_secs(request.model.timeout_secs);
        let mut messages = request.history.clone();
        messages.push(ChatMessage::user(request.prompt.clone()));
        let body = MessagesRequest {
            model: &request.model.model,
            max_tokens: request.model.max_tokens,
            temperature: request.model.temperature,
            system: &request.system,
            messages,
        };

        debug!("sending messages request");
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .timeout(timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .map_err(|err| transport_error(err, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "messages request failed");
            return Err(status_error(status.as_u16(), body));
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|err| transport_error(err, timeout))?;
        response_text(parsed)
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Transport(err.to_string())
    }
}

fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth { status },
        429 => ProviderError::RateLimited,
        _ => ProviderError::Api { status, body },
    }
}

fn response_text(response: MessagesResponse) -> Result<String, ProviderError> {
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text.join(""))
}
