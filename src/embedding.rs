//! Embedding provider trait and the local/remote embedding service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (the local model, the
/// OpenAI API, etc.) behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// Results preserve input order. The default implementation calls
    /// [`embed`](EmbeddingProvider::embed) sequentially for each input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    ///
    /// Must be knowable without performing an embedding call.
    fn dimensions(&self) -> usize;

    /// A short name identifying the provider, used in logs.
    fn name(&self) -> &str;
}

/// Embedding service composing a locally-resident model with an optional
/// remote provider.
///
/// The remote provider is used only when configured and requested; on any
/// remote failure the service transparently falls back to the local model,
/// so the caller never sees the remote error — only a (possibly
/// different-dimension) vector. Mixing the two embedding spaces inside one
/// collection breaks distance semantics; the vector store's write-time
/// dimension check is the guard against that.
pub struct EmbeddingService {
    local: Arc<dyn EmbeddingProvider>,
    remote: Option<Arc<dyn EmbeddingProvider>>,
    request_timeout: Option<Duration>,
}

impl EmbeddingService {
    /// Create a service with a local provider and an optional remote one.
    pub fn new(
        local: Arc<dyn EmbeddingProvider>,
        remote: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self { local, remote, request_timeout: None }
    }

    /// Bound each remote embedding call to `timeout`.
    ///
    /// An elapsed timeout counts as a remote failure and triggers the local
    /// fallback like any other remote error.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Embed a batch of texts, using the remote provider when requested.
    ///
    /// Remote failures degrade to the local model with a logged warning.
    pub async fn embed_text(&self, texts: &[&str], use_remote: bool) -> Result<Vec<Vec<f32>>> {
        if use_remote {
            if let Some(remote) = &self.remote {
                match self.embed_remote(remote, texts).await {
                    Ok(embeddings) => return Ok(embeddings),
                    Err(e) => {
                        warn!(
                            provider = remote.name(),
                            error = %e,
                            "remote embedding failed, falling back to local model"
                        );
                    }
                }
            }
        }
        self.local.embed_batch(texts).await
    }

    /// Call the remote provider, bounded by the configured timeout.
    async fn embed_remote(
        &self,
        remote: &Arc<dyn EmbeddingProvider>,
        texts: &[&str],
    ) -> Result<Vec<Vec<f32>>> {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, remote.embed_batch(texts))
                .await
                .unwrap_or_else(|_| {
                    Err(RagError::EmbeddingError {
                        provider: remote.name().to_string(),
                        message: format!("request timed out after {limit:?}"),
                    })
                }),
            None => remote.embed_batch(texts).await,
        }
    }

    /// Embed a single search query.
    pub async fn embed_query(&self, query: &str, use_remote: bool) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_text(&[query], use_remote).await?;
        Ok(embeddings.pop().unwrap_or_default())
    }

    /// Embed a list of documents in sequential batches of `batch_size`.
    ///
    /// Batching bounds any single request's size; output order matches
    /// input order.
    pub async fn embed_documents(
        &self,
        documents: &[String],
        use_remote: bool,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let batch_size = batch_size.max(1);
        let mut embeddings = Vec::with_capacity(documents.len());
        for batch in documents.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
            let batch_embeddings = self.embed_text(&texts, use_remote).await?;
            embeddings.extend(batch_embeddings);
        }
        debug!(document_count = documents.len(), "embedded document batch");
        Ok(embeddings)
    }

    /// Return the embedding dimension of the active provider.
    pub fn dimension(&self, use_remote: bool) -> usize {
        if use_remote {
            if let Some(remote) = &self.remote {
                return remote.dimensions();
            }
        }
        self.local.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::EmbeddingError {
                provider: "failing".to_string(),
                message: "unreachable endpoint".to_string(),
            })
        }

        fn dimensions(&self) -> usize {
            1536
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct ConstantProvider(usize);

    #[async_trait]
    impl EmbeddingProvider for ConstantProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; self.0])
        }

        fn dimensions(&self) -> usize {
            self.0
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    struct StalledProvider(usize);

    #[async_trait]
    impl EmbeddingProvider for StalledProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![1.0; self.0])
        }

        fn dimensions(&self) -> usize {
            self.0
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn remote_timeout_falls_back_to_local() {
        let service = EmbeddingService::new(
            Arc::new(ConstantProvider(8)),
            Some(Arc::new(StalledProvider(16))),
        )
        .with_request_timeout(Duration::from_millis(50));

        let embedding = service.embed_query("kérdés", true).await.unwrap();
        assert_eq!(embedding.len(), 8);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local() {
        let service =
            EmbeddingService::new(Arc::new(ConstantProvider(8)), Some(Arc::new(FailingProvider)));
        let embedding = service.embed_query("kérdés", true).await.unwrap();
        assert_eq!(embedding.len(), 8);
    }

    #[tokio::test]
    async fn remote_requested_but_unconfigured_uses_local() {
        let service = EmbeddingService::new(Arc::new(ConstantProvider(8)), None);
        let embedding = service.embed_query("kérdés", true).await.unwrap();
        assert_eq!(embedding.len(), 8);
    }

    #[tokio::test]
    async fn document_batches_preserve_order_and_count() {
        let service = EmbeddingService::new(Arc::new(ConstantProvider(4)), None);
        let docs: Vec<String> = (0..7).map(|i| format!("dokumentum {i}")).collect();
        let embeddings = service.embed_documents(&docs, false, 3).await.unwrap();
        assert_eq!(embeddings.len(), 7);
    }

    #[test]
    fn dimension_reflects_active_provider() {
        let service =
            EmbeddingService::new(Arc::new(ConstantProvider(384)), Some(Arc::new(FailingProvider)));
        assert_eq!(service.dimension(false), 384);
        assert_eq!(service.dimension(true), 1536);
    }
}
