//! Property and behaviour tests for the in-memory vector store.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use ragline_core::document::Chunk;
use ragline_core::inmemory::InMemoryVectorStore;
use ragline_core::vectorstore::{Similarity, VectorStore};

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

fn chunk(id: &str, collection: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: id.to_string(),
        collection: collection.to_string(),
        document_id: "doc_1".to_string(),
        text: format!("text of {id}"),
        embedding,
        metadata: HashMap::new(),
        created_at: Utc::now(),
    }
}

/// Generate a chunk with a normalized embedding.
fn arb_chunk(dim: usize) -> impl Strategy<Value = Chunk> {
    ("[a-z]{3,8}", arb_normalized_embedding(dim))
        .prop_map(|(id, embedding)| chunk(&id, "test", embedding))
}

/// *For any* set of chunks stored in an InMemoryVectorStore, searching SHALL
/// return results ordered by descending score, and at most `top_k` of them.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            chunks in proptest::collection::vec(arb_chunk(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let results = rt.block_on(async {
                let store = InMemoryVectorStore::new();

                // Deduplicate chunks by id to avoid upsert overwriting
                let mut deduped: HashMap<String, Chunk> = HashMap::new();
                for chunk in &chunks {
                    deduped.entry(chunk.id.clone()).or_insert_with(|| chunk.clone());
                }
                let unique_chunks: Vec<Chunk> = deduped.into_values().collect();
                let count = unique_chunks.len();

                store.upsert(&unique_chunks).await.unwrap();
                let results = store.search("test", &query, top_k).await.unwrap();
                (results, count)
            });

            let (results, unique_count) = results;

            prop_assert!(results.len() <= top_k);
            prop_assert_eq!(results.len(), top_k.min(unique_count));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }
    }
}

#[tokio::test]
async fn returns_top_two_by_score() {
    let store = InMemoryVectorStore::new().with_similarity(Similarity::DotProduct);
    store
        .upsert(&[
            chunk("a", "docs", vec![0.9, 0.0]),
            chunk("b", "docs", vec![0.95, 0.0]),
            chunk("c", "docs", vec![0.5, 0.0]),
        ])
        .await
        .unwrap();

    let results = store.search("docs", &[1.0, 0.0], 2).await.unwrap();
    let ranked: Vec<(&str, f32)> = results.iter().map(|r| (r.chunk.id.as_str(), r.score)).collect();
    assert_eq!(ranked, vec![("b", 0.95), ("a", 0.9)]);
}

#[tokio::test]
async fn ties_prefer_newer_then_lower_id() {
    let store = InMemoryVectorStore::new();
    let now = Utc::now();
    let mut old = chunk("a-old", "docs", vec![1.0, 0.0]);
    old.created_at = now - Duration::seconds(60);
    let mut zed = chunk("z", "docs", vec![1.0, 0.0]);
    zed.created_at = now;
    let mut bee = chunk("b", "docs", vec![1.0, 0.0]);
    bee.created_at = now;
    store.upsert(&[old, zed, bee]).await.unwrap();

    let results = store.search("docs", &[1.0, 0.0], 3).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "z", "a-old"]);
}

#[tokio::test]
async fn empty_or_unknown_collection_returns_nothing() {
    let store = InMemoryVectorStore::new();
    assert!(store.search("missing", &[1.0, 0.0], 4).await.unwrap().is_empty());
    assert_eq!(store.count("missing").await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_batch_leaves_store_untouched() {
    let store = InMemoryVectorStore::new();
    store.upsert(&[chunk("a", "docs", vec![1.0, 0.0])]).await.unwrap();

    let err = store
        .upsert(&[chunk("b", "docs", vec![0.0, 1.0]), chunk("c", "docs", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dimension"));
    assert_eq!(store.count("docs").await.unwrap(), 1);

    let err = store.upsert(&[chunk("d", " ", vec![1.0])]).await.unwrap_err();
    assert!(err.to_string().contains("collection"));
}

#[tokio::test]
async fn query_dimension_mismatch_is_rejected() {
    let store = InMemoryVectorStore::new();
    store.upsert(&[chunk("a", "docs", vec![1.0, 0.0])]).await.unwrap();
    assert!(store.search("docs", &[1.0, 0.0, 0.0], 1).await.is_err());
}

#[tokio::test]
async fn collections_are_listed_and_deleted() {
    let store = InMemoryVectorStore::new();
    store
        .upsert(&[chunk("a", "beta", vec![1.0]), chunk("b", "alpha", vec![1.0])])
        .await
        .unwrap();
    assert_eq!(store.collections().await.unwrap(), vec!["alpha", "beta"]);

    assert!(store.delete_collection("alpha").await.unwrap());
    assert!(!store.delete_collection("alpha").await.unwrap());
    assert_eq!(store.collections().await.unwrap(), vec!["beta"]);
}
