//! Knowledge retrieval strategies over the vector store.
//!
//! [`KnowledgeRetriever`] turns a user query into a ranked list of
//! [`RetrievedDocument`]s, applying the score threshold and, depending on
//! the chosen [`RetrievalStrategy`], diversity re-ranking or educational
//! context inference.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::document::{Metadata, RetrievedDocument};
use crate::embedding::EmbeddingService;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Sentinel rendered when no relevant documents were retrieved.
pub const NO_CONTEXT_SENTINEL: &str = "Nincs releváns információ a tudásbázisban.";

/// Default relevance/diversity balance for MMR re-ranking.
const DEFAULT_MMR_LAMBDA: f32 = 0.5;

/// Upper bound on the MMR candidate pool.
const MMR_POOL_CAP: usize = 20;

/// How a query is turned into a ranked result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// Plain vector similarity with score-threshold filtering.
    Similarity,
    /// Maximum marginal relevance: similarity re-ranked for diversity.
    Mmr,
    /// Similarity with filters inferred from the query's educational context.
    Contextual,
}

impl FromStr for RetrievalStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "similarity" => Ok(Self::Similarity),
            "mmr" => Ok(Self::Mmr),
            "contextual" => Ok(Self::Contextual),
            other => Err(RagError::InvalidStrategy(other.to_string())),
        }
    }
}

/// Hungarian subject keywords used by contextual retrieval. The first
/// matching subject wins.
static SUBJECT_KEYWORDS: &[(&str, &[&str])] = &[
    ("matematika", &["matek", "számtan", "algebra", "geometria"]),
    ("fizika", &["fizika", "mechanika", "elektromosság"]),
    ("kémia", &["kémia", "molekula", "atom", "reakció"]),
    ("biológia", &["biológia", "élőlény", "sejt", "növény", "állat"]),
    ("történelem", &["történelem", "múlt", "háború", "király"]),
    ("irodalom", &["irodalom", "vers", "költő", "író"]),
    ("angol", &["angol", "english", "nyelvtan"]),
    ("földrajz", &["földrajz", "térkép", "ország", "kontinens"]),
];

static GRADE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\.?\s*(?:osztály|évfolyam)").unwrap());

/// Stateless retrieval collaborator over the store and embedding service.
pub struct KnowledgeRetriever {
    store: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingService>,
    default_k: usize,
    score_threshold: f32,
    use_remote: bool,
}

impl KnowledgeRetriever {
    /// Create a retriever.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<EmbeddingService>,
        default_k: usize,
        score_threshold: f32,
        use_remote: bool,
    ) -> Self {
        Self { store, embeddings, default_k, score_threshold, use_remote }
    }

    /// Retrieve relevant documents for a query.
    ///
    /// `k` defaults to the configured `default_k`. Results below the score
    /// threshold are dropped; the list is sorted by descending score.
    pub async fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        filters: Option<&Metadata>,
        strategy: RetrievalStrategy,
    ) -> Result<Vec<RetrievedDocument>> {
        let k = k.unwrap_or(self.default_k);
        match strategy {
            RetrievalStrategy::Similarity => self.similarity_retrieval(query, k, filters).await,
            RetrievalStrategy::Mmr => {
                self.mmr_retrieval(query, k, filters, DEFAULT_MMR_LAMBDA).await
            }
            RetrievalStrategy::Contextual => self.contextual_retrieval(query, k, filters).await,
        }
    }

    /// Retrieve documents restricted to one subject.
    pub async fn retrieve_by_subject(
        &self,
        subject: &str,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<RetrievedDocument>> {
        let mut filters = Metadata::new();
        filters.insert("subject".to_string(), json!(subject));
        self.retrieve(query, k, Some(&filters), RetrievalStrategy::Similarity).await
    }

    /// Retrieve documents restricted to one grade level.
    pub async fn retrieve_by_grade(
        &self,
        grade: i64,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<RetrievedDocument>> {
        let mut filters = Metadata::new();
        filters.insert("class_grade".to_string(), json!(grade));
        self.retrieve(query, k, Some(&filters), RetrievalStrategy::Similarity).await
    }

    /// Baseline similarity retrieval: embed, search, score, threshold, sort.
    async fn similarity_retrieval(
        &self,
        query: &str,
        k: usize,
        filters: Option<&Metadata>,
    ) -> Result<Vec<RetrievedDocument>> {
        let query_embedding = self.embeddings.embed_query(query, self.use_remote).await?;
        let results = self.store.similarity_search(&query_embedding, k, filters).await?;

        let documents = results.documents.into_iter().next().unwrap_or_default();
        let metadatas = results.metadatas.into_iter().next().unwrap_or_default();
        let distances = results.distances.into_iter().next().unwrap_or_default();

        let mut retrieved = Vec::new();
        for ((content, metadata), distance) in
            documents.into_iter().zip(metadatas).zip(distances)
        {
            let score = (1.0 - distance).max(0.0);
            if score >= self.score_threshold {
                retrieved.push(RetrievedDocument::new(content, metadata, score));
            } else {
                debug!(score, threshold = self.score_threshold, "document below score threshold");
            }
        }

        retrieved
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        info!(result_count = retrieved.len(), "similarity retrieval completed");
        Ok(retrieved)
    }

    /// Maximum-marginal-relevance retrieval for diverse results.
    ///
    /// Fetches an oversampled candidate pool of `min(3k, 20)`, embeds the
    /// candidate contents once, then greedily selects `k` items maximizing
    /// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
    pub async fn mmr_retrieval(
        &self,
        query: &str,
        k: usize,
        filters: Option<&Metadata>,
        lambda: f32,
    ) -> Result<Vec<RetrievedDocument>> {
        let pool_size = (k * 3).min(MMR_POOL_CAP);
        let candidates = self.similarity_retrieval(query, pool_size, filters).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = candidates.iter().map(|d| d.content.clone()).collect();
        let candidate_embeddings =
            self.embeddings.embed_documents(&contents, self.use_remote, contents.len()).await?;

        let mut selected: Vec<usize> = Vec::new();
        let mut remaining: Vec<usize> = (0..candidates.len()).collect();

        while selected.len() < k && !remaining.is_empty() {
            let pick = if selected.is_empty() {
                // Candidates are sorted by score, so the first remaining
                // index is the most relevant.
                remaining[0]
            } else {
                let mut best = remaining[0];
                let mut best_score = f32::NEG_INFINITY;
                for &idx in &remaining {
                    let relevance = candidates[idx].score;
                    let max_sim_to_selected = selected
                        .iter()
                        .map(|&s| {
                            cosine_similarity(&candidate_embeddings[idx], &candidate_embeddings[s])
                        })
                        .fold(0.0f32, f32::max);
                    let mmr_score = lambda * relevance - (1.0 - lambda) * max_sim_to_selected;
                    if mmr_score > best_score {
                        best_score = mmr_score;
                        best = idx;
                    }
                }
                best
            };
            selected.push(pick);
            remaining.retain(|&i| i != pick);
        }

        info!(result_count = selected.len(), "mmr retrieval completed");
        Ok(selected.into_iter().map(|i| candidates[i].clone()).collect())
    }

    /// Contextual retrieval: infer subject/grade filters from the query and
    /// delegate to similarity retrieval with the combined filter.
    ///
    /// Caller-supplied filters always override inferred ones on key
    /// collision.
    async fn contextual_retrieval(
        &self,
        query: &str,
        k: usize,
        filters: Option<&Metadata>,
    ) -> Result<Vec<RetrievedDocument>> {
        let inferred = extract_educational_context(query);
        let combined = merge_filters(inferred, filters);
        if combined.is_empty() {
            self.similarity_retrieval(query, k, None).await
        } else {
            self.similarity_retrieval(query, k, Some(&combined)).await
        }
    }
}

/// Merge inferred filters with caller-supplied ones; caller values win.
fn merge_filters(inferred: Metadata, caller: Option<&Metadata>) -> Metadata {
    let mut combined = inferred;
    if let Some(caller) = caller {
        for (key, value) in caller {
            combined.insert(key.clone(), value.clone());
        }
    }
    combined
}

/// Derive `{subject, class_grade}` hints from a query via the Hungarian
/// subject keyword table and grade patterns ("7. osztály", "7. évfolyam").
pub fn extract_educational_context(query: &str) -> Metadata {
    let query_lower = query.to_lowercase();
    let mut context = Metadata::new();

    for (subject, keywords) in SUBJECT_KEYWORDS {
        if keywords.iter().any(|keyword| query_lower.contains(keyword)) {
            context.insert("subject".to_string(), json!(subject));
            break;
        }
    }

    if let Some(captures) = GRADE_PATTERN.captures(&query_lower) {
        if let Ok(grade) = captures[1].parse::<i64>() {
            context.insert("class_grade".to_string(), json!(grade));
        }
    }

    context
}

/// Render a retrieved list as a single prompt-ready context string.
///
/// An empty list renders the fixed "no relevant information" sentinel;
/// otherwise each document gets a numbered source header followed by its
/// content, with documents separated by blank lines.
pub fn format_context(docs: &[RetrievedDocument]) -> String {
    if docs.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }

    let mut parts = Vec::with_capacity(docs.len());
    for (i, doc) in docs.iter().enumerate() {
        let source =
            doc.metadata.get("source").and_then(Value::as_str).unwrap_or("Ismeretlen forrás");
        let mut header = format!("[Forrás {}] {source}", i + 1);
        if let Some(subject) = doc.metadata.get("subject").and_then(Value::as_str) {
            header.push_str(&format!(" - {subject}"));
        }
        if let Some(grade) = grade_value(&doc.metadata) {
            header.push_str(&format!(" ({grade}. osztály)"));
        }
        parts.push(format!("{header}\n{}", doc.content));
    }
    parts.join("\n\n")
}

/// Read the grade from metadata, accepting both numeric and string forms.
pub(crate) fn grade_value(metadata: &Metadata) -> Option<i64> {
    match metadata.get("class_grade") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Cosine similarity between two vectors; `0.0` when either has zero
/// magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
