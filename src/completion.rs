//! Completion provider boundary for the generation path.
//!
//! The language model is an opaque text-completion service reached over a
//! request/response boundary; [`CompletionProvider`] is that boundary, and
//! [`OpenAiChatProvider`] is the production implementation over the chat
//! completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};

/// The OpenAI chat completions API endpoint.
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The default model for answer generation.
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default timeout for completion requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A synchronous request/response text-completion service.
///
/// Failures are surfaced as errors; the pipeline's degradation chain decides
/// what the user sees.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate text from a system instruction and a user message, bounded
    /// by `max_tokens` and `temperature`.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;

    /// The model identifier reported in responses.
    fn model_name(&self) -> &str;
}

/// A [`CompletionProvider`] backed by the OpenAI chat completions API.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiChatProvider {
    /// Create a new provider with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::CompletionError {
                provider: "OpenAI".into(),
                message: "API key must not be empty".into(),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.into(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the model name (e.g. `gpt-4o-mini`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl CompletionProvider for OpenAiChatProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        debug!(model = %self.model, max_tokens, temperature, "completion request");

        let request_body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = "OpenAI", error = %e, "completion request failed");
                RagError::CompletionError {
                    provider: "OpenAI".into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(provider = "OpenAI", %status, "completion API error");
            return Err(RagError::CompletionError {
                provider: "OpenAI".into(),
                message: format!("API returned {status}: {body}"),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "failed to parse completion response");
            RagError::CompletionError {
                provider: "OpenAI".into(),
                message: format!("failed to parse response: {e}"),
            }
        })?;

        chat.choices.into_iter().next().map(|c| c.message.content).ok_or_else(|| {
            RagError::CompletionError {
                provider: "OpenAI".into(),
                message: "API returned no choices".into(),
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
