//! Locally-resident embedding provider.
//!
//! [`LocalEmbeddingProvider`] produces deterministic 384-dimension vectors by
//! feature-hashing word tokens into a fixed-size vector and L2-normalizing
//! the result. Texts sharing vocabulary land near each other under cosine
//! similarity, which is enough to ground retrieval when no remote model is
//! configured, and it is the always-available fallback target when the
//! remote provider fails.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Default dimensionality, matching the MiniLM-class sentence models this
/// provider stands in for.
const DEFAULT_DIMENSIONS: usize = 384;

/// A deterministic, dependency-free local embedding provider.
#[derive(Debug, Clone)]
pub struct LocalEmbeddingProvider {
    dimensions: usize,
}

impl Default for LocalEmbeddingProvider {
    fn default() -> Self {
        Self { dimensions: DEFAULT_DIMENSIONS }
    }
}

impl LocalEmbeddingProvider {
    /// Create a provider with the default 384 dimensions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider with a custom dimensionality.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = token
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                    (acc ^ u64::from(b)).wrapping_mul(0x100_0000_01b3)
                });
            let index = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        // L2-normalize so cosine similarity is the plain dot product.
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "local"
    }
}
