//! OpenAI embedding provider using the OpenAI embeddings API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// The OpenAI embeddings API endpoint.
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// The default model for OpenAI embeddings.
const DEFAULT_MODEL: &str = "text-embedding-3-large";

/// Maximum input tokens the API accepts per item; longer texts are truncated.
const MAX_INPUT_TOKENS: usize = 8000;

/// Default timeout for embedding requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed dimensionality per embedding model.
fn model_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        _ => 1536,
    }
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// Inputs exceeding the 8000-token budget are truncated at the token level
/// using the model's own vocabulary (`cl100k_base`), so truncation never
/// splits a token the model would see differently.
///
/// # Example
///
/// ```rust,ignore
/// use edu_rag::OpenAiEmbeddingProvider;
///
/// let provider = OpenAiEmbeddingProvider::new("sk-...")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    tokenizer: CoreBPE,
}

impl OpenAiEmbeddingProvider {
    /// Create a new provider with the given API key.
    ///
    /// Uses the default model (`text-embedding-3-large`, 3072 dimensions).
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::EmbeddingError {
                provider: "OpenAI".into(),
                message: "API key must not be empty".into(),
            });
        }
        let tokenizer = tiktoken_rs::cl100k_base().map_err(|e| RagError::EmbeddingError {
            provider: "OpenAI".into(),
            message: format!("failed to load tokenizer: {e}"),
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.into(),
            dimensions: model_dimensions(DEFAULT_MODEL),
            timeout: DEFAULT_TIMEOUT,
            tokenizer,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| RagError::EmbeddingError {
            provider: "OpenAI".into(),
            message: "OPENAI_API_KEY environment variable not set".into(),
        })?;
        Self::new(api_key)
    }

    /// Set the model name, updating the reported dimensionality.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.dimensions = model_dimensions(&self.model);
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Truncate a text to the input token budget using the model vocabulary.
    fn truncate_to_budget<'a>(&self, text: &'a str) -> Result<std::borrow::Cow<'a, str>> {
        let tokens = self.tokenizer.encode_ordinary(text);
        if tokens.len() <= MAX_INPUT_TOKENS {
            return Ok(std::borrow::Cow::Borrowed(text));
        }
        debug!(token_count = tokens.len(), "truncating embedding input to token budget");
        let truncated = self
            .tokenizer
            .decode(tokens[..MAX_INPUT_TOKENS].to_vec())
            .map_err(|e| RagError::EmbeddingError {
                provider: "OpenAI".into(),
                message: format!("token truncation failed: {e}"),
            })?;
        Ok(std::borrow::Cow::Owned(truncated))
    }
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::EmbeddingError {
            provider: "OpenAI".into(),
            message: "API returned empty response".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = "OpenAI",
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let truncated: Vec<std::borrow::Cow<'_, str>> =
            texts.iter().map(|t| self.truncate_to_budget(t)).collect::<Result<_>>()?;
        let input: Vec<&str> = truncated.iter().map(|t| t.as_ref()).collect();

        let request_body = EmbeddingRequest { model: &self.model, input };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = "OpenAI", error = %e, "embedding request failed");
                RagError::EmbeddingError {
                    provider: "OpenAI".into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = "OpenAI", %status, "embedding API error");
            return Err(RagError::EmbeddingError {
                provider: "OpenAI".into(),
                message: format!("API returned {status}: {detail}"),
            });
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "failed to parse embedding response");
            RagError::EmbeddingError {
                provider: "OpenAI".into(),
                message: format!("failed to parse response: {e}"),
            }
        })?;

        Ok(embedding_response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            OpenAiEmbeddingProvider::new(""),
            Err(RagError::EmbeddingError { .. })
        ));
    }

    #[test]
    fn model_selection_updates_dimensions() {
        let provider = OpenAiEmbeddingProvider::new("sk-test").unwrap();
        assert_eq!(provider.dimensions(), 3072);
        let provider = provider.with_model("text-embedding-3-small");
        assert_eq!(provider.dimensions(), 1536);
    }

    #[test]
    fn short_input_is_not_truncated() {
        let provider = OpenAiEmbeddingProvider::new("sk-test").unwrap();
        let text = "A háromszög szögeinek összege 180 fok.";
        let out = provider.truncate_to_budget(text).unwrap();
        assert_eq!(out.as_ref(), text);
    }

    #[test]
    fn oversized_input_is_truncated_to_token_budget() {
        let provider = OpenAiEmbeddingProvider::new("sk-test").unwrap();
        let text = "szó ".repeat(20_000);
        let out = provider.truncate_to_budget(&text).unwrap();
        let tokens = provider.tokenizer.encode_ordinary(out.as_ref());
        assert!(tokens.len() <= MAX_INPUT_TOKENS);
        assert!(out.len() < text.len());
    }
}
