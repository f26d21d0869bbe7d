//! End-to-end pipeline tests: ingestion, retrieval, generation degradation,
//! statistics and reset.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edu_rag::{
    CompletionProvider, GenerationOptions, JsonFileStore, Metadata, RagConfig, RagError,
    RagPipeline, Result, RetrievalStrategy, VectorStore,
};
use serde_json::json;

/// Completion stub that distinguishes grounded from ungrounded prompts.
struct EchoCompletion;

#[async_trait]
impl CompletionProvider for EchoCompletion {
    async fn complete(
        &self,
        _system: &str,
        user: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        if user.contains("Tananyag:") {
            Ok("grounded válasz".to_string())
        } else {
            Ok("általános válasz".to_string())
        }
    }

    fn model_name(&self) -> &str {
        "echo-model"
    }
}

/// Completion stub that always fails.
struct BrokenCompletion;

#[async_trait]
impl CompletionProvider for BrokenCompletion {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        Err(RagError::CompletionError {
            provider: "mock".to_string(),
            message: "service unavailable".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "broken-model"
    }
}

/// Completion stub that never responds within any reasonable deadline.
struct StalledCompletion;

#[async_trait]
impl CompletionProvider for StalledCompletion {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("késői válasz".to_string())
    }

    fn model_name(&self) -> &str {
        "stalled-model"
    }
}

fn test_config(dir: &Path, threshold: f32) -> RagConfig {
    RagConfig::builder()
        .collection_name("test_knowledge")
        .persist_path(dir)
        .chunk_size(500)
        .chunk_overlap(50)
        .min_chunk_size(10)
        .score_threshold(threshold)
        .build()
        .unwrap()
}

fn pipeline_with(
    dir: &Path,
    threshold: f32,
    completion: Option<Arc<dyn CompletionProvider>>,
) -> RagPipeline {
    let mut builder = RagPipeline::builder().config(test_config(dir, threshold));
    if let Some(completion) = completion {
        builder = builder.completion(completion);
    }
    builder.build().unwrap()
}

fn subject_metadata(source: &str, subject: &str, grade: i64) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!(source));
    metadata.insert("subject".to_string(), json!(subject));
    metadata.insert("class_grade".to_string(), json!(grade));
    metadata
}

#[tokio::test]
async fn ingest_then_generate_grounded_answer() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, Some(Arc::new(EchoCompletion)));

    let metadata = subject_metadata("mertan.txt", "matematika", 7);
    let text = "A háromszög belső szögeinek összege 180 fok.";
    let count = pipeline.ingest_text(text, metadata).await.unwrap();
    assert_eq!(count, 1);

    let response = pipeline.generate_response(text, GenerationOptions::default()).await;
    assert!(response.context_used);
    assert!(!response.fallback);
    assert!(!response.error);
    assert_eq!(response.answer, "grounded válasz");
    assert_eq!(response.model_used, "echo-model");
    assert_eq!(response.num_sources, 1);

    let sources = response.sources.unwrap();
    assert_eq!(sources[0].source, "mertan.txt");
    assert_eq!(sources[0].subject.as_deref(), Some("matematika"));
    assert_eq!(sources[0].class_grade, Some(7));
    assert!(sources[0].preview.contains("háromszög"));
}

#[tokio::test]
async fn empty_knowledge_base_answers_without_grounding() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, Some(Arc::new(EchoCompletion)));

    let response =
        pipeline.generate_response("Mi a fotoszintézis?", GenerationOptions::default()).await;
    assert!(!response.context_used);
    assert!(response.fallback);
    assert!(!response.error);
    assert_eq!(response.answer, "általános válasz");
    assert_eq!(response.num_sources, 0);
    assert!(response.sources.is_none());
}

#[tokio::test]
async fn generation_failure_degrades_to_static_apology() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, Some(Arc::new(BrokenCompletion)));

    let text = "A víz forráspontja normál légköri nyomáson 100 fok.";
    pipeline.ingest_text(text, subject_metadata("fizika.txt", "fizika", 7)).await.unwrap();

    let response = pipeline.generate_response(text, GenerationOptions::default()).await;
    assert!(!response.context_used);
    assert!(response.fallback);
    assert!(response.error);
    assert!(response.sources.is_none());
    assert_eq!(
        response.answer,
        "Sajnos jelenleg nem tudok válaszolni a kérdésére. Kérem, próbálja újra később."
    );
}

#[tokio::test(start_paused = true)]
async fn completion_timeout_degrades_to_apology() {
    let dir = tempfile::tempdir().unwrap();
    let config = RagConfig::builder()
        .collection_name("test_knowledge")
        .persist_path(dir.path())
        .request_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let pipeline = RagPipeline::builder()
        .config(config)
        .completion(Arc::new(StalledCompletion))
        .build()
        .unwrap();

    let response =
        pipeline.generate_response("Mi a fotoszintézis?", GenerationOptions::default()).await;
    assert!(response.error);
    assert!(response.fallback);
    assert_eq!(
        response.answer,
        "Sajnos jelenleg nem tudok válaszolni a kérdésére. Kérem, próbálja újra később."
    );
}

#[tokio::test]
async fn missing_completion_provider_yields_apology() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    let response = pipeline.generate_response("Bármilyen kérdés", GenerationOptions::default()).await;
    assert!(response.error);
    assert!(response.fallback);
    assert_eq!(response.model_used, "none");
}

#[tokio::test]
async fn stats_aggregate_subjects_grades_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    pipeline
        .ingest_text(
            "A másodfokú egyenlet megoldóképlete jól ismert.",
            subject_metadata("algebra.txt", "matematika", 8),
        )
        .await
        .unwrap();
    pipeline
        .ingest_text(
            "A gravitációs gyorsulás a Földön körülbelül tíz.",
            subject_metadata("mechanika.txt", "fizika", 7),
        )
        .await
        .unwrap();
    pipeline
        .ingest_text(
            "A kovalens kötésben az atomok elektronpárokat osztanak meg.",
            subject_metadata("kotesek.txt", "kémia", 8),
        )
        .await
        .unwrap();

    let stats = pipeline.get_knowledge_base_stats().await.unwrap();
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.subjects, vec!["fizika", "kémia", "matematika"]);
    assert_eq!(stats.grades, vec![7, 8]);
    assert_eq!(stats.sources, vec!["algebra.txt", "kotesek.txt", "mechanika.txt"]);
    assert_eq!(stats.sources_count, 3);
    assert_eq!(stats.embedding_dimension, 384);
}

#[tokio::test]
async fn empty_knowledge_base_reports_zero_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    let stats = pipeline.get_knowledge_base_stats().await.unwrap();
    assert_eq!(stats.total_documents, 0);
    assert_eq!(stats.embedding_dimension, 0);
    assert!(stats.subjects.is_empty());
}

#[tokio::test]
async fn reset_clears_all_documents() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    pipeline
        .ingest_text("Törlendő tartalom a tudásbázisban.", subject_metadata("x.txt", "fizika", 7))
        .await
        .unwrap();
    assert_eq!(pipeline.document_count().await.unwrap(), 1);

    let message = pipeline.reset_knowledge_base().await.unwrap();
    assert!(message.contains("test_knowledge"));
    assert_eq!(pipeline.document_count().await.unwrap(), 0);
}

#[tokio::test]
async fn search_respects_metadata_filters() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    pipeline
        .ingest_text(
            "A szögfüggvények a derékszögű háromszög oldalarányai.",
            subject_metadata("trigonometria.txt", "matematika", 9),
        )
        .await
        .unwrap();
    pipeline
        .ingest_text(
            "A mohácsi csata 1526-ban zajlott.",
            subject_metadata("mohacs.txt", "történelem", 7),
        )
        .await
        .unwrap();

    let mut filter = Metadata::new();
    filter.insert("subject".to_string(), json!("matematika"));
    let hits = pipeline
        .search_knowledge_base("szögfüggvények", None, Some(&filter), RetrievalStrategy::Similarity)
        .await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["subject"], json!("matematika"));

    let all = pipeline
        .search_knowledge_base("szögfüggvények", None, None, RetrievalStrategy::Similarity)
        .await;
    assert_eq!(all.len(), 2);
    assert!(all[0].score >= all[1].score);
}

#[tokio::test]
async fn higher_threshold_admits_fewer_results() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn VectorStore> =
        Arc::new(JsonFileStore::open(dir.path(), "shared_knowledge").unwrap());

    let lenient = RagPipeline::builder()
        .config(test_config(dir.path(), 0.0))
        .store(Arc::clone(&store))
        .build()
        .unwrap();
    let strict = RagPipeline::builder()
        .config(test_config(dir.path(), 0.9))
        .store(Arc::clone(&store))
        .build()
        .unwrap();

    let query = "az egyenes arányosság grafikonja origón átmenő egyenes";
    lenient.ingest_text(query, subject_metadata("a.txt", "matematika", 7)).await.unwrap();
    lenient
        .ingest_text(
            "teljesen független szöveg vonatokról mozdonyokról sínekről",
            subject_metadata("b.txt", "földrajz", 7),
        )
        .await
        .unwrap();

    let lenient_hits =
        lenient.search_knowledge_base(query, None, None, RetrievalStrategy::Similarity).await;
    let strict_hits =
        strict.search_knowledge_base(query, None, None, RetrievalStrategy::Similarity).await;
    assert_eq!(lenient_hits.len(), 2);
    assert_eq!(strict_hits.len(), 1);
}

#[tokio::test]
async fn mmr_with_zero_lambda_prefers_diversity() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    pipeline
        .ingest_text(
            "alma körte szilva gyümölcs kosár egy",
            subject_metadata("gyumolcs1.txt", "biológia", 5),
        )
        .await
        .unwrap();
    pipeline
        .ingest_text(
            "alma körte szilva gyümölcs kosár kettő",
            subject_metadata("gyumolcs2.txt", "biológia", 5),
        )
        .await
        .unwrap();
    pipeline
        .ingest_text(
            "vonat mozdony sín vasút pálya menetrend",
            subject_metadata("vasut.txt", "földrajz", 6),
        )
        .await
        .unwrap();

    let docs = pipeline
        .retriever()
        .mmr_retrieval("alma körte szilva gyümölcs", 2, None, 0.0)
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs[0].content.contains("alma"));
    assert!(docs[1].content.contains("vonat"));
}

#[tokio::test]
async fn contextual_strategy_filters_by_inferred_subject() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(dir.path(), 0.0, None);

    pipeline
        .ingest_text(
            "A geometria a síkidomok és testek tulajdonságaival foglalkozik.",
            subject_metadata("mertan.txt", "matematika", 7),
        )
        .await
        .unwrap();
    pipeline
        .ingest_text(
            "A geometria szó görög eredetű, a földmérés történetéből származik.",
            subject_metadata("okor.txt", "történelem", 7),
        )
        .await
        .unwrap();

    let hits = pipeline
        .search_knowledge_base(
            "Mit tanulunk geometria órán?",
            None,
            None,
            RetrievalStrategy::Contextual,
        )
        .await;
    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.metadata["subject"], json!("matematika"));
    }
}

#[tokio::test]
async fn ingest_directory_isolates_per_file_failures() {
    let dir = tempfile::tempdir().unwrap();
    let docs_dir = dir.path().join("docs");
    std::fs::create_dir_all(docs_dir.join("nested")).unwrap();
    std::fs::write(docs_dir.join("a.txt"), "Az első dokumentum szövege elég hosszú ehhez.")
        .unwrap();
    std::fs::write(
        docs_dir.join("nested").join("b.md"),
        "# Cím\n\nA második dokumentum szövege is elég hosszú.",
    )
    .unwrap();
    // Not a real PDF; extraction fails and the file is reported with zero
    // chunks instead of aborting the batch.
    std::fs::write(docs_dir.join("broken.pdf"), "nem pdf").unwrap();

    let store_dir = dir.path().join("kb");
    let pipeline = pipeline_with(&store_dir, 0.0, None);
    let report = pipeline.ingest_directory(&docs_dir, None, None).await.unwrap();

    assert_eq!(report.len(), 3);
    let total: usize = report.iter().map(|(_, count)| count).sum();
    assert_eq!(total, 2);
    let broken = report.iter().find(|(path, _)| path.ends_with("broken.pdf")).unwrap();
    assert_eq!(broken.1, 0);
}

#[tokio::test]
async fn knowledge_base_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let text = "A fénysebesség vákuumban állandó.";
    {
        let pipeline = pipeline_with(dir.path(), 0.0, None);
        pipeline.ingest_text(text, subject_metadata("feny.txt", "fizika", 11)).await.unwrap();
    }

    let reopened = pipeline_with(dir.path(), 0.0, None);
    assert_eq!(reopened.document_count().await.unwrap(), 1);
    let hits = reopened
        .search_knowledge_base(text, None, None, RetrievalStrategy::Similarity)
        .await;
    assert_eq!(hits.len(), 1);
}
