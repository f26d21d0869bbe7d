//! Retrieval-Augmented Generation for an educational platform backend.
//!
//! This crate provides:
//! - Document processing: PDF/DOCX/Markdown/plain-text extraction and
//!   overlapping, sentence-aware chunking
//! - A local deterministic embedding model with optional remote (OpenAI)
//!   embeddings and transparent fallback
//! - A JSON-file vector store with cosine similarity search and metadata
//!   filtering
//! - Retrieval strategies: similarity, MMR diversity re-ranking, and
//!   educational-context inference for Hungarian queries
//! - A pipeline facade for ingestion and grounded answer generation with a
//!   never-failing degradation chain
//!
//! # Quick start
//!
//! ```rust,ignore
//! use edu_rag::{GenerationOptions, RagPipeline};
//!
//! let pipeline = RagPipeline::builder().build()?;
//! pipeline.ingest_document("tananyag/mertan.pdf".as_ref(), None).await?;
//! let response = pipeline
//!     .generate_response("Mennyi a háromszög szögeinek összege?", GenerationOptions::default())
//!     .await;
//! ```

pub mod completion;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod jsonfile;
pub mod local;
pub mod openai;
pub mod pipeline;
pub mod processor;
pub mod retriever;
pub mod vectorstore;

pub use completion::{CompletionProvider, OpenAiChatProvider};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{DocumentChunk, Metadata, RetrievedDocument};
pub use embedding::{EmbeddingProvider, EmbeddingService};
pub use error::{RagError, Result};
pub use jsonfile::JsonFileStore;
pub use local::LocalEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;
pub use pipeline::{
    GenerationOptions, KnowledgeBaseStats, RagPipeline, RagPipelineBuilder, RagResponse,
    SearchHit, SourceInfo,
};
pub use processor::{
    DocumentProcessor, DocxExtractor, MarkdownExtractor, PdfExtractor, PlainTextExtractor,
    TextExtractor, clean_text,
};
pub use retriever::{
    KnowledgeRetriever, NO_CONTEXT_SENTINEL, RetrievalStrategy, extract_educational_context,
    format_context,
};
pub use vectorstore::{GetResult, QueryResult, VectorStore};
