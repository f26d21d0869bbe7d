//! Configuration for the RAG pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Name of the persisted knowledge-base collection.
    pub collection_name: String,
    /// Directory where the vector store persists its collection.
    pub persist_path: PathBuf,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Minimum stripped length for a chunk to be kept.
    pub min_chunk_size: usize,
    /// Default number of documents to retrieve per query.
    pub default_k: usize,
    /// Minimum similarity score for retrieved results (results below are dropped).
    pub score_threshold: f32,
    /// Whether document and query embeddings use the remote provider.
    ///
    /// Switching this after a collection already holds vectors from the
    /// other provider mixes embedding spaces; the store rejects writes of
    /// a mismatched dimension rather than silently corrupting distances.
    pub use_remote_embeddings: bool,
    /// Batch size for document embedding requests.
    pub embed_batch_size: usize,
    /// Timeout applied to embedding and completion network calls.
    pub request_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection_name: "school_knowledge".to_string(),
            persist_path: PathBuf::from("./knowledge_db"),
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            default_k: 5,
            score_threshold: 0.2,
            use_remote_embeddings: false,
            embed_batch_size: 32,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the collection name.
    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = name.into();
        self
    }

    /// Set the directory where the collection is persisted.
    pub fn persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.persist_path = path.into();
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the minimum stripped length for a chunk to be kept.
    pub fn min_chunk_size(mut self, size: usize) -> Self {
        self.config.min_chunk_size = size;
        self
    }

    /// Set the default number of documents retrieved per query.
    pub fn default_k(mut self, k: usize) -> Self {
        self.config.default_k = k;
        self
    }

    /// Set the minimum similarity score for retrieved results.
    pub fn score_threshold(mut self, threshold: f32) -> Self {
        self.config.score_threshold = threshold;
        self
    }

    /// Route document and query embeddings through the remote provider.
    pub fn use_remote_embeddings(mut self, remote: bool) -> Self {
        self.config.use_remote_embeddings = remote;
        self
    }

    /// Set the batch size for document embedding requests.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the timeout for embedding and completion network calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `min_chunk_size > chunk_size`
    /// - `default_k == 0` or `embed_batch_size == 0`
    pub fn build(self) -> Result<RagConfig> {
        let c = &self.config;
        if c.chunk_overlap >= c.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.min_chunk_size > c.chunk_size {
            return Err(RagError::ConfigError(format!(
                "min_chunk_size ({}) must not exceed chunk_size ({})",
                c.min_chunk_size, c.chunk_size
            )));
        }
        if c.default_k == 0 {
            return Err(RagError::ConfigError("default_k must be greater than zero".to_string()));
        }
        if c.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}
