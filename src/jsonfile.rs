//! On-disk vector store persisting one collection to a JSON snapshot.
//!
//! [`JsonFileStore`] keeps the collection in memory behind a
//! `tokio::sync::RwLock` and writes a snapshot to
//! `<persist_path>/<collection>.json` after every mutation, via a temp file
//! and rename so each write lands atomically. Reads are concurrent; writes
//! (including the snapshot) are serialized by the write lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::document::Metadata;
use crate::error::{RagError, Result};
use crate::vectorstore::{GetResult, QueryResult, VectorStore, matches_filter};

const BACKEND: &str = "JsonFile";

/// One persisted chunk: text, metadata, and embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

/// The collection snapshot written to disk.
///
/// `dimension` records the collection's embedding space; it is set by the
/// first write and checked by every later one, so vectors from a
/// different-dimension provider cannot silently corrupt distances.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionState {
    dimension: Option<usize>,
    documents: BTreeMap<String, StoredDocument>,
}

/// A persistent, single-collection vector store using cosine distance.
///
/// # Example
///
/// ```rust,ignore
/// use edu_rag::JsonFileStore;
///
/// let store = JsonFileStore::open("./knowledge_db", "school_knowledge")?;
/// let ids = store.add_documents(texts, metadatas, embeddings, None).await?;
/// ```
pub struct JsonFileStore {
    collection_name: String,
    file_path: PathBuf,
    state: RwLock<CollectionState>,
}

impl JsonFileStore {
    /// Open (or create) the collection persisted under `persist_path`.
    pub fn open(persist_path: impl AsRef<Path>, collection_name: impl Into<String>) -> Result<Self> {
        let collection_name = collection_name.into();
        let persist_path = persist_path.as_ref();
        std::fs::create_dir_all(persist_path)?;
        let file_path = persist_path.join(format!("{collection_name}.json"));

        let state = if file_path.exists() {
            let bytes = std::fs::read(&file_path)?;
            let state: CollectionState =
                serde_json::from_slice(&bytes).map_err(|e| RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: format!("corrupt collection file {}: {e}", file_path.display()),
                })?;
            info!(
                collection = %collection_name,
                document_count = state.documents.len(),
                "loaded existing collection"
            );
            state
        } else {
            info!(collection = %collection_name, "created new collection");
            CollectionState::default()
        };

        Ok(Self { collection_name, file_path, state: RwLock::new(state) })
    }

    /// Write the current state to disk. Called with the write lock held so
    /// snapshots land in mutation order.
    async fn persist(&self, state: &CollectionState) -> Result<()> {
        let json = serde_json::to_vec(state).map_err(|e| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("failed to serialize collection: {e}"),
        })?;
        let path = self.file_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, &json)?;
            std::fs::rename(&tmp, &path)
        })
        .await
        .map_err(|e| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("persist task failed: {e}"),
        })??;
        Ok(())
    }

    /// Validate a batch of embeddings against the collection's recorded
    /// dimension and return the dimension the collection will have once the
    /// write commits.
    ///
    /// Pure validation: the caller commits the returned dimension together
    /// with the documents, so a rejected batch never leaves a dimension
    /// claim behind.
    fn batch_dimension(
        current: Option<usize>,
        embeddings: &[Vec<f32>],
    ) -> Result<Option<usize>> {
        let mut dimension = current;
        for embedding in embeddings {
            match dimension {
                Some(dimension) if dimension != embedding.len() => {
                    return Err(RagError::VectorStoreError {
                        backend: BACKEND.to_string(),
                        message: format!(
                            "embedding dimension {} does not match collection dimension \
                             {dimension}; refusing to mix embedding spaces",
                            embedding.len()
                        ),
                    });
                }
                Some(_) => {}
                None => dimension = Some(embedding.len()),
            }
        }
        Ok(dimension)
    }
}

/// Cosine distance between two vectors; `1.0` when either has zero magnitude.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for JsonFileStore {
    async fn add_documents(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        embeddings: Vec<Vec<f32>>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        if documents.len() != metadatas.len() || documents.len() != embeddings.len() {
            return Err(RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!(
                    "mismatched batch lengths: {} documents, {} metadatas, {} embeddings",
                    documents.len(),
                    metadatas.len(),
                    embeddings.len()
                ),
            });
        }
        let ids = match ids {
            Some(ids) if ids.len() != documents.len() => {
                return Err(RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: format!(
                        "mismatched batch lengths: {} documents, {} ids",
                        documents.len(),
                        ids.len()
                    ),
                });
            }
            Some(ids) => ids,
            None => documents.iter().map(|_| Uuid::new_v4().to_string()).collect(),
        };

        let mut state = self.state.write().await;
        let dimension = Self::batch_dimension(state.dimension, &embeddings)?;
        for ((id, content), (metadata, embedding)) in
            ids.iter().zip(documents).zip(metadatas.into_iter().zip(embeddings))
        {
            state
                .documents
                .insert(id.clone(), StoredDocument { content, metadata, embedding });
        }
        state.dimension = dimension;
        self.persist(&state).await?;

        info!(
            collection = %self.collection_name,
            document_count = ids.len(),
            "added documents to vector store"
        );
        Ok(ids)
    }

    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        n_results: usize,
        filter: Option<&Metadata>,
    ) -> Result<QueryResult> {
        let state = self.state.read().await;
        if let Some(dimension) = state.dimension {
            if query_embedding.len() != dimension {
                return Err(RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: format!(
                        "query dimension {} does not match collection dimension {dimension}",
                        query_embedding.len()
                    ),
                });
            }
        }

        let mut scored: Vec<(&StoredDocument, f32)> = state
            .documents
            .values()
            .filter(|doc| matches_filter(&doc.metadata, filter))
            .map(|doc| (doc, cosine_distance(&doc.embedding, query_embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);

        let mut documents = Vec::with_capacity(scored.len());
        let mut metadatas = Vec::with_capacity(scored.len());
        let mut distances = Vec::with_capacity(scored.len());
        for (doc, distance) in scored {
            documents.push(doc.content.clone());
            metadatas.push(doc.metadata.clone());
            distances.push(distance);
        }

        Ok(QueryResult {
            documents: vec![documents],
            metadatas: vec![metadatas],
            distances: vec![distances],
        })
    }

    async fn get_by_metadata(
        &self,
        filter: Option<&Metadata>,
        limit: Option<usize>,
    ) -> Result<GetResult> {
        let state = self.state.read().await;
        let limit = limit.unwrap_or(usize::MAX);

        let mut result = GetResult::default();
        for (id, doc) in state.documents.iter() {
            if result.ids.len() >= limit {
                break;
            }
            if matches_filter(&doc.metadata, filter) {
                result.ids.push(id.clone());
                result.documents.push(doc.content.clone());
                result.metadatas.push(doc.metadata.clone());
            }
        }
        Ok(result)
    }

    async fn update_document(
        &self,
        id: &str,
        document: Option<String>,
        metadata: Option<Metadata>,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let dimension = match &embedding {
            Some(embedding) => {
                Self::batch_dimension(state.dimension, std::slice::from_ref(embedding))?
            }
            None => state.dimension,
        };
        let stored = state.documents.get_mut(id).ok_or_else(|| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("document '{id}' does not exist"),
        })?;
        if let Some(document) = document {
            stored.content = document;
        }
        if let Some(metadata) = metadata {
            stored.metadata = metadata;
        }
        if let Some(embedding) = embedding {
            stored.embedding = embedding;
        }
        state.dimension = dimension;
        self.persist(&state).await?;
        info!(collection = %self.collection_name, id, "updated document");
        Ok(())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        for id in ids {
            state.documents.remove(id);
        }
        self.persist(&state).await?;
        info!(collection = %self.collection_name, deleted = ids.len(), "deleted documents");
        Ok(())
    }

    async fn delete_by_metadata(&self, filter: &Metadata) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.documents.len();
        state.documents.retain(|_, doc| !matches_filter(&doc.metadata, Some(filter)));
        let deleted = before - state.documents.len();
        self.persist(&state).await?;
        info!(collection = %self.collection_name, deleted, "deleted documents by metadata filter");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.documents.len())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = CollectionState::default();
        self.persist(&state).await?;
        warn!(collection = %self.collection_name, "reset collection");
        Ok(())
    }
}
