//! Property tests for JSON-file vector store search ordering.

use edu_rag::{JsonFileStore, Metadata, VectorStore};
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// *For any* set of stored embeddings, a similarity search SHALL return
/// results ordered by ascending cosine distance, bounded by both the
/// requested result count and the number of stored documents.
mod prop_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn results_ordered_ascending_and_bounded(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            n_results in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (result, stored_count) = rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = JsonFileStore::open(dir.path(), "prop_store").unwrap();

                let documents: Vec<String> =
                    (0..embeddings.len()).map(|i| format!("dokumentum {i}")).collect();
                let metadatas = vec![Metadata::new(); embeddings.len()];
                let ids = store
                    .add_documents(documents, metadatas, embeddings.clone(), None)
                    .await
                    .unwrap();

                let result = store.similarity_search(&query, n_results, None).await.unwrap();
                (result, ids.len())
            });

            let distances = &result.distances[0];
            prop_assert!(distances.len() <= n_results);
            prop_assert!(distances.len() <= stored_count);

            for window in distances.windows(2) {
                prop_assert!(
                    window[0] <= window[1],
                    "distances not in ascending order: {} > {}",
                    window[0],
                    window[1],
                );
            }
        }
    }
}
