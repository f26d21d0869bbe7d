//! Data types for document chunks and retrieval results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Key-value metadata attached to a chunk. Values are scalars or strings.
pub type Metadata = HashMap<String, Value>;

/// A unit of indexed knowledge: a bounded span of source-document text with
/// its metadata.
///
/// Standard metadata keys are `source`, `filename`, `file_type`, `file_size`,
/// `chunk_index`, `chunk_count`, `char_count` and `word_count`; domain fields
/// such as `subject`, `class_grade`, `uploaded_by` and `description` may be
/// present. Chunks are immutable once embedded and stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    /// Stable identifier, derived from the content hash unless supplied.
    pub chunk_id: String,
    /// The normalized text content of the chunk.
    pub content: String,
    /// Key-value metadata for the chunk.
    pub metadata: Metadata,
}

impl DocumentChunk {
    /// Create a chunk with a content-hash derived ID.
    ///
    /// Re-processing identical content always yields the same ID, so
    /// re-ingesting the same text is idempotent at the store level.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        let content = content.into();
        let chunk_id = Self::content_id(&content);
        Self { chunk_id, content, metadata }
    }

    /// Create a chunk with a caller-supplied ID (e.g. an upload-assigned UUID).
    pub fn with_id(chunk_id: impl Into<String>, content: impl Into<String>, metadata: Metadata) -> Self {
        Self { chunk_id: chunk_id.into(), content: content.into(), metadata }
    }

    /// Derive the deterministic chunk ID for a piece of content.
    pub fn content_id(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        format!("chunk_{hex}")
    }
}

/// A transient, per-query projection of a stored chunk with its relevance
/// score. Never persisted; exists only for the duration of a retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// The chunk text.
    pub content: String,
    /// The chunk metadata.
    pub metadata: Metadata,
    /// Similarity score in `[0, 1]`, derived from the stored distance.
    pub score: f32,
    /// The originating source, defaulted from metadata.
    pub source: String,
}

impl RetrievedDocument {
    /// Build a retrieved document, defaulting `source` from the metadata
    /// `source` key ("unknown" when absent).
    pub fn new(content: String, metadata: Metadata, score: f32) -> Self {
        let source = metadata
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Self { content, metadata, score, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_deterministic() {
        let a = DocumentChunk::new("A háromszög szögeinek összege 180 fok.", Metadata::new());
        let b = DocumentChunk::new("A háromszög szögeinek összege 180 fok.", Metadata::new());
        assert_eq!(a.chunk_id, b.chunk_id);
        assert!(a.chunk_id.starts_with("chunk_"));
    }

    #[test]
    fn distinct_content_distinct_ids() {
        let a = DocumentChunk::new("alpha", Metadata::new());
        let b = DocumentChunk::new("beta", Metadata::new());
        assert_ne!(a.chunk_id, b.chunk_id);
    }

    #[test]
    fn source_defaults_from_metadata() {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), serde_json::json!("tananyag.pdf"));
        let doc = RetrievedDocument::new("text".to_string(), meta, 0.9);
        assert_eq!(doc.source, "tananyag.pdf");

        let doc = RetrievedDocument::new("text".to_string(), Metadata::new(), 0.9);
        assert_eq!(doc.source, "unknown");
    }
}
