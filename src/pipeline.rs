//! The RAG pipeline: ingestion and grounded answer generation.
//!
//! [`RagPipeline`] composes the document processor, embedding service,
//! vector store, retriever and completion provider into the two top-level
//! flows: ingesting source documents into the knowledge base, and answering
//! queries grounded in retrieved context.
//!
//! # Example
//!
//! ```rust,ignore
//! use edu_rag::{GenerationOptions, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder().config(RagConfig::default()).build()?;
//!
//! pipeline.ingest_document("tananyag/mertan.pdf".as_ref(), None).await?;
//! let response = pipeline
//!     .generate_response("Mennyi a háromszög szögeinek összege?", GenerationOptions::default())
//!     .await;
//! println!("{}", response.answer);
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::completion::CompletionProvider;
use crate::config::RagConfig;
use crate::document::{Metadata, RetrievedDocument};
use crate::embedding::{EmbeddingProvider, EmbeddingService};
use crate::error::{RagError, Result};
use crate::jsonfile::JsonFileStore;
use crate::local::LocalEmbeddingProvider;
use crate::processor::DocumentProcessor;
use crate::retriever::{self, KnowledgeRetriever, RetrievalStrategy};
use crate::vectorstore::VectorStore;

/// System instruction used when the caller supplies none.
const DEFAULT_SYSTEM_PROMPT: &str = "Te egy segítőkész oktatási asszisztens vagy egy magyar \
iskolai platformon. A diákok és tanárok kérdéseire magyarul, pontosan és érthetően válaszolsz. \
Elsősorban a megadott tananyag-részletekre támaszkodj, és ha azok nem elegendőek, jelezd \
őszintén.";

/// Static apology returned when every generation attempt failed.
const FALLBACK_ANSWER: &str =
    "Sajnos jelenleg nem tudok válaszolni a kérdésére. Kérem, próbálja újra később.";

/// File extensions the directory ingester picks up.
const INGESTIBLE_EXTENSIONS: &[&str] = &["pdf", "docx", "md", "txt"];

/// Options controlling a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// How many context documents to retrieve; defaults to the configured
    /// `default_k` when `None`.
    pub context_k: Option<usize>,
    /// Retrieval strategy for gathering context.
    pub strategy: RetrievalStrategy,
    /// Metadata filter restricting the context search.
    pub filters: Option<Metadata>,
    /// Token budget for the generated answer.
    pub max_tokens: u32,
    /// Sampling temperature for the completion model.
    pub temperature: f32,
    /// Overrides the default system instruction when set.
    pub system_prompt: Option<String>,
    /// Attach the list of context sources to the response.
    pub include_sources: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            context_k: None,
            strategy: RetrievalStrategy::Similarity,
            filters: None,
            max_tokens: 500,
            temperature: 0.7,
            system_prompt: None,
            include_sources: true,
        }
    }
}

/// Length of the content preview attached to each cited source.
const SOURCE_PREVIEW_CHARS: usize = 200;

/// A source document referenced by a generated answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// The originating file or upload name.
    pub source: String,
    /// The first part of the chunk content, for display alongside the answer.
    pub preview: String,
    /// Subject tag, when the chunk carries one.
    pub subject: Option<String>,
    /// Grade level, when the chunk carries one.
    pub class_grade: Option<i64>,
    /// Relevance score of the chunk.
    pub score: f32,
}

impl From<&RetrievedDocument> for SourceInfo {
    fn from(doc: &RetrievedDocument) -> Self {
        Self {
            source: doc.source.clone(),
            preview: doc.content.chars().take(SOURCE_PREVIEW_CHARS).collect(),
            subject: doc
                .metadata
                .get("subject")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            class_grade: retriever::grade_value(&doc.metadata),
            score: doc.score,
        }
    }
}

/// The outcome of a generation call.
///
/// Generation never fails outright: internal errors degrade through the
/// fallback chain and surface in the `fallback` and `error` flags instead.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    /// The generated answer text.
    pub answer: String,
    /// The original query.
    pub query: String,
    /// Whether retrieved knowledge-base context grounded the answer.
    pub context_used: bool,
    /// Number of context documents that grounded the answer.
    pub num_sources: usize,
    /// The completion model that produced the answer.
    pub model_used: String,
    /// Context sources, when requested and available.
    pub sources: Option<Vec<SourceInfo>>,
    /// True when the answer was generated without knowledge-base grounding.
    pub fallback: bool,
    /// True when generation failed entirely and the static apology was used.
    pub error: bool,
}

/// A single result from a direct knowledge-base search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// The chunk text.
    pub content: String,
    /// Relevance score in `[0, 1]`.
    pub score: f32,
    /// The chunk metadata.
    pub metadata: Metadata,
}

/// Aggregate statistics over the knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseStats {
    /// Total number of stored chunks.
    pub total_documents: usize,
    /// Distinct subjects, sorted.
    pub subjects: Vec<String>,
    /// Distinct grade levels, sorted.
    pub grades: Vec<i64>,
    /// Distinct sources, sorted. Falls back to the chunk filename when no
    /// source is recorded.
    pub sources: Vec<String>,
    /// Number of distinct sources.
    pub sources_count: usize,
    /// Dimensionality of the collection's embedding space; `0` when empty.
    pub embedding_dimension: usize,
}

/// The orchestrating facade over the whole pipeline.
pub struct RagPipeline {
    config: RagConfig,
    processor: DocumentProcessor,
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    retriever: KnowledgeRetriever,
    completion: Option<Arc<dyn CompletionProvider>>,
}

impl RagPipeline {
    /// Create a new builder.
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// The active configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The retriever, for callers that need retrieval without generation.
    pub fn retriever(&self) -> &KnowledgeRetriever {
        &self.retriever
    }

    /// Ingest a single file: extract, chunk, embed, store.
    ///
    /// Returns the number of chunks stored. Extraction runs on the blocking
    /// thread pool.
    pub async fn ingest_document(
        &self,
        path: &Path,
        metadata: Option<Metadata>,
    ) -> Result<usize> {
        let processor = self.processor.clone();
        let path_buf = path.to_path_buf();
        let chunks =
            tokio::task::spawn_blocking(move || processor.process_file(&path_buf, metadata))
                .await
                .map_err(|e| RagError::PipelineError(format!("processing task failed: {e}")))??;

        self.store_chunks(chunks, path.display().to_string()).await
    }

    /// Ingest raw text directly, without a backing file.
    ///
    /// Useful for content pasted into the platform rather than uploaded.
    pub async fn ingest_text(&self, text: &str, metadata: Metadata) -> Result<usize> {
        let chunks = self.processor.process_text(text, metadata);
        self.store_chunks(chunks, "inline text".to_string()).await
    }

    /// Ingest every supported file under a directory, recursively.
    ///
    /// `extensions` restricts which files are picked up; `None` means all
    /// supported formats. Each file is ingested in isolation: a failing
    /// file is logged and reported with a count of zero, and ingestion
    /// continues. Returns per-file chunk counts in walk order.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        extensions: Option<&[&str]>,
        metadata: Option<Metadata>,
    ) -> Result<Vec<(PathBuf, usize)>> {
        let root = dir.to_path_buf();
        let extensions: Vec<String> = extensions
            .unwrap_or(INGESTIBLE_EXTENSIONS)
            .iter()
            .map(|e| e.to_lowercase())
            .collect();
        let files =
            tokio::task::spawn_blocking(move || collect_ingestible_files(&root, &extensions))
                .await
                .map_err(|e| RagError::PipelineError(format!("directory walk failed: {e}")))??;

        let mut report = Vec::with_capacity(files.len());
        for file in files {
            match self.ingest_document(&file, metadata.clone()).await {
                Ok(count) => report.push((file, count)),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping file after ingest failure");
                    report.push((file, 0));
                }
            }
        }
        info!(file_count = report.len(), dir = %dir.display(), "directory ingestion completed");
        Ok(report)
    }

    async fn store_chunks(
        &self,
        chunks: Vec<crate::document::DocumentChunk>,
        origin: String,
    ) -> Result<usize> {
        if chunks.is_empty() {
            info!(origin = %origin, "no chunks produced, nothing stored");
            return Ok(0);
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .embeddings
            .embed_documents(
                &contents,
                self.config.use_remote_embeddings,
                self.config.embed_batch_size,
            )
            .await?;

        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let metadatas: Vec<Metadata> = chunks.into_iter().map(|c| c.metadata).collect();
        let stored = self.store.add_documents(contents, metadatas, embeddings, Some(ids)).await?;

        info!(origin = %origin, chunk_count = stored.len(), "ingested document");
        Ok(stored.len())
    }

    /// Generate an answer for a query, grounded in retrieved context when
    /// any is available.
    ///
    /// This method never returns an error. The degradation chain is:
    /// grounded generation, then ungrounded generation with `fallback` set,
    /// then the static apology with `error` set.
    pub async fn generate_response(&self, query: &str, options: GenerationOptions) -> RagResponse {
        let docs = match self
            .retriever
            .retrieve(query, options.context_k, options.filters.as_ref(), options.strategy)
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "context retrieval failed, answering without grounding");
                Vec::new()
            }
        };

        let system = options.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let context_used = !docs.is_empty();
        let sources = (options.include_sources && context_used)
            .then(|| docs.iter().map(SourceInfo::from).collect::<Vec<_>>());
        let model_used = self
            .completion
            .as_ref()
            .map(|c| c.model_name().to_string())
            .unwrap_or_else(|| "none".to_string());

        let mut response = RagResponse {
            answer: String::new(),
            query: query.to_string(),
            context_used,
            num_sources: docs.len(),
            model_used,
            sources,
            fallback: !context_used,
            error: false,
        };

        if context_used {
            let context = retriever::format_context(&docs);
            let prompt = grounded_prompt(&context, query);
            match self.complete(system, &prompt, &options).await {
                Ok(answer) => {
                    response.answer = answer;
                    return response;
                }
                Err(e) => {
                    warn!(error = %e, "grounded generation failed, retrying without context");
                }
            }
        }

        // Ungrounded attempt: either no context existed, or grounded
        // generation failed. The answer no longer rests on the knowledge
        // base, so the context fields are cleared.
        response.fallback = true;
        response.context_used = false;
        response.num_sources = 0;
        response.sources = None;
        match self.complete(system, &ungrounded_prompt(query), &options).await {
            Ok(answer) => {
                response.answer = answer;
                response
            }
            Err(e) => {
                error!(error = %e, "generation failed entirely, returning static fallback");
                response.answer = FALLBACK_ANSWER.to_string();
                response.error = true;
                response
            }
        }
    }

    /// Run the completion provider, bounded by the configured request
    /// timeout.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let completion = self.completion.as_ref().ok_or_else(|| RagError::PipelineError(
            "no completion provider configured".to_string(),
        ))?;
        let limit = self.config.request_timeout;
        tokio::time::timeout(
            limit,
            completion.complete(system, user, options.max_tokens, options.temperature),
        )
        .await
        .unwrap_or_else(|_| {
            Err(RagError::CompletionError {
                provider: completion.model_name().to_string(),
                message: format!("request timed out after {limit:?}"),
            })
        })
    }

    /// Search the knowledge base directly, without generation.
    ///
    /// Retrieval errors are logged and yield an empty list, matching the
    /// generation path's degradation behavior.
    pub async fn search_knowledge_base(
        &self,
        query: &str,
        k: Option<usize>,
        filters: Option<&Metadata>,
        strategy: RetrievalStrategy,
    ) -> Vec<SearchHit> {
        match self.retriever.retrieve(query, k, filters, strategy).await {
            Ok(docs) => docs
                .into_iter()
                .map(|d| SearchHit { content: d.content, score: d.score, metadata: d.metadata })
                .collect(),
            Err(e) => {
                error!(error = %e, "knowledge base search failed");
                Vec::new()
            }
        }
    }

    /// Compute aggregate statistics over the whole collection.
    ///
    /// Performs a full scan; chunk counts on this platform are small enough
    /// that the scan stays cheap.
    pub async fn get_knowledge_base_stats(&self) -> Result<KnowledgeBaseStats> {
        let all = self.store.get_by_metadata(None, None).await?;

        let mut subjects = BTreeSet::new();
        let mut grades = BTreeSet::new();
        let mut sources = BTreeSet::new();
        for metadata in &all.metadatas {
            if let Some(subject) = metadata.get("subject").and_then(serde_json::Value::as_str) {
                subjects.insert(subject.to_string());
            }
            if let Some(grade) = retriever::grade_value(metadata) {
                grades.insert(grade);
            }
            let source = metadata
                .get("source")
                .or_else(|| metadata.get("filename"))
                .and_then(serde_json::Value::as_str);
            if let Some(source) = source {
                sources.insert(source.to_string());
            }
        }

        let total_documents = all.ids.len();
        let embedding_dimension = if total_documents == 0 {
            0
        } else {
            self.embeddings.dimension(self.config.use_remote_embeddings)
        };

        let sources: Vec<String> = sources.into_iter().collect();
        Ok(KnowledgeBaseStats {
            total_documents,
            subjects: subjects.into_iter().collect(),
            grades: grades.into_iter().collect(),
            sources_count: sources.len(),
            sources,
            embedding_dimension,
        })
    }

    /// Number of chunks currently stored.
    pub async fn document_count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Destroy all knowledge-base content. Irreversible.
    pub async fn reset_knowledge_base(&self) -> Result<String> {
        warn!(collection = %self.config.collection_name, "resetting knowledge base");
        self.store.reset().await?;
        Ok(format!("collection '{}' was reset", self.config.collection_name))
    }
}

fn grounded_prompt(context: &str, query: &str) -> String {
    format!(
        "A következő tananyag-részletek alapján válaszolj a kérdésre.\n\n\
         Tananyag:\n{context}\n\nKérdés: {query}\n\nVálasz:"
    )
}

fn ungrounded_prompt(query: &str) -> String {
    format!(
        "A tudásbázisban nem található releváns tananyag ehhez a kérdéshez. \
         Válaszolj a legjobb tudásod szerint.\n\nKérdés: {query}\n\nVálasz:"
    )
}

/// Recursively collect files with a matching extension, in sorted walk
/// order.
fn collect_ingestible_files(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RagError::ProcessingError(format!("not a directory: {}", dir.display())));
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries: Vec<PathBuf> =
            std::fs::read_dir(&current)?.map(|e| e.map(|e| e.path())).collect::<std::io::Result<_>>()?;
        entries.sort();
        for path in entries {
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e == &ext.to_lowercase()))
            {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Builder assembling a [`RagPipeline`] from its collaborators.
///
/// All collaborators are optional: the store defaults to a [`JsonFileStore`]
/// under the configured persist path, and the local embedder defaults to
/// [`LocalEmbeddingProvider`]. Remote embedding and completion providers
/// have no defaults; without them the pipeline runs local-only.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    store: Option<Arc<dyn VectorStore>>,
    local_embedder: Option<Arc<dyn EmbeddingProvider>>,
    remote_embedder: Option<Arc<dyn EmbeddingProvider>>,
    completion: Option<Arc<dyn CompletionProvider>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the vector store backend.
    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the local embedding provider.
    pub fn local_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.local_embedder = Some(embedder);
        self
    }

    /// Set the remote embedding provider.
    pub fn remote_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.remote_embedder = Some(embedder);
        self
    }

    /// Set the completion provider for answer generation.
    pub fn completion(mut self, completion: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Build the pipeline, opening the default store when none was given.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();

        if config.use_remote_embeddings && self.remote_embedder.is_none() {
            warn!("remote embeddings requested but no remote provider configured, using local");
        }
        if self.completion.is_none() {
            warn!("no completion provider configured, generation will return the fallback answer");
        }

        let store: Arc<dyn VectorStore> = match self.store {
            Some(store) => store,
            None => {
                Arc::new(JsonFileStore::open(&config.persist_path, config.collection_name.as_str())?)
            }
        };

        let local = self
            .local_embedder
            .unwrap_or_else(|| Arc::new(LocalEmbeddingProvider::default()));
        let embeddings = Arc::new(
            EmbeddingService::new(local, self.remote_embedder)
                .with_request_timeout(config.request_timeout),
        );

        let processor = DocumentProcessor::new(
            config.chunk_size,
            config.chunk_overlap,
            config.min_chunk_size,
        );
        let retriever = KnowledgeRetriever::new(
            Arc::clone(&store),
            Arc::clone(&embeddings),
            config.default_k,
            config.score_threshold,
            config.use_remote_embeddings,
        );

        info!(
            collection = %config.collection_name,
            chunk_size = config.chunk_size,
            remote_embeddings = config.use_remote_embeddings,
            "pipeline assembled"
        );

        Ok(RagPipeline { config, processor, embeddings, store, retriever, completion: self.completion })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_sane() {
        let options = GenerationOptions::default();
        assert_eq!(options.context_k, None);
        assert_eq!(options.max_tokens, 500);
        assert!(options.include_sources);
        assert_eq!(options.strategy, RetrievalStrategy::Similarity);
    }

    #[test]
    fn grounded_prompt_carries_context_and_query() {
        let prompt = grounded_prompt("[Forrás 1] mertan.pdf\nA szögek összege 180 fok.", "Mennyi?");
        assert!(prompt.contains("Tananyag:"));
        assert!(prompt.contains("[Forrás 1] mertan.pdf"));
        assert!(prompt.contains("Kérdés: Mennyi?"));
    }

    #[test]
    fn source_info_reads_domain_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), serde_json::json!("fizika.pdf"));
        metadata.insert("subject".to_string(), serde_json::json!("fizika"));
        metadata.insert("class_grade".to_string(), serde_json::json!(8));
        let doc = RetrievedDocument::new("szöveg".to_string(), metadata, 0.75);

        let info = SourceInfo::from(&doc);
        assert_eq!(info.source, "fizika.pdf");
        assert_eq!(info.subject.as_deref(), Some("fizika"));
        assert_eq!(info.class_grade, Some(8));
    }

    #[test]
    fn directory_walk_requires_a_directory() {
        let err = collect_ingestible_files(Path::new("/nonexistent/path"), &["txt".to_string()]);
        assert!(matches!(err, Err(RagError::ProcessingError(_))));
    }
}
