//! Vector store trait for persisting and searching chunk embeddings.

use async_trait::async_trait;

use crate::document::Metadata;
use crate::error::Result;

/// Results of a similarity search.
///
/// Each field is a batch of batches: the outer list is indexed by query, the
/// inner list by rank. A single-query search returns outer lists of length
/// one.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Chunk texts, most similar first.
    pub documents: Vec<Vec<String>>,
    /// Metadata for each returned chunk.
    pub metadatas: Vec<Vec<Metadata>>,
    /// Cosine distances for each returned chunk (lower is closer).
    pub distances: Vec<Vec<f32>>,
}

/// Results of a metadata-filtered scan.
#[derive(Debug, Clone, Default)]
pub struct GetResult {
    /// IDs of the matching chunks.
    pub ids: Vec<String>,
    /// Texts of the matching chunks.
    pub documents: Vec<String>,
    /// Metadata of the matching chunks.
    pub metadatas: Vec<Metadata>,
}

/// A storage backend for chunk text, metadata, and embeddings with
/// cosine-distance similarity search.
///
/// The store exclusively owns persisted chunk state. All vectors in one
/// collection share a single embedding space; implementations reject writes
/// whose dimension differs from the collection's recorded dimension.
///
/// Metadata filters are conjunctive equality filters. `None` means "no
/// restriction" — the explicit no-filter value, never an empty filter map.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add documents with their embeddings.
    ///
    /// IDs default to freshly generated UUIDs when not supplied. Caller
    /// IDs must be unique within the collection; on collision the last
    /// write wins. Returns the IDs under which the documents were stored.
    async fn add_documents(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        embeddings: Vec<Vec<f32>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>>;

    /// Search for the `n_results` chunks closest to `query_embedding`,
    /// optionally restricted by a metadata filter.
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        n_results: usize,
        filter: Option<&Metadata>,
    ) -> Result<QueryResult>;

    /// Scan documents by metadata filter, up to `limit` when given.
    async fn get_by_metadata(
        &self,
        filter: Option<&Metadata>,
        limit: Option<usize>,
    ) -> Result<GetResult>;

    /// Update an existing document's text, metadata, and/or embedding.
    async fn update_document(
        &self,
        id: &str,
        document: Option<String>,
        metadata: Option<Metadata>,
        embedding: Option<Vec<f32>>,
    ) -> Result<()>;

    /// Delete documents by ID. Unknown IDs are ignored.
    async fn delete_documents(&self, ids: &[String]) -> Result<()>;

    /// Delete all documents matching a metadata filter.
    async fn delete_by_metadata(&self, filter: &Metadata) -> Result<()>;

    /// Total number of documents in the collection.
    async fn count(&self) -> Result<usize>;

    /// Drop and recreate the empty collection under the same name and
    /// distance metric. Destructive and irreversible.
    async fn reset(&self) -> Result<()>;
}

/// True when every key in `filter` equals the corresponding metadata value.
pub(crate) fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter.iter().all(|(key, value)| metadata.get(key) == Some(value)),
    }
}
