//! Vector store trait for storing and searching vector embeddings.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Chunk, SearchResult};
use crate::error::Result;

/// The similarity metric of a collection. Fixed once the collection exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    #[default]
    Cosine,
    DotProduct,
}

impl Similarity {
    /// Score `a` against `b`. Higher is more similar.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        match self {
            Self::DotProduct => dot,
            Self::Cosine => {
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a * norm_b)
            }
        }
    }
}

/// Deterministic result order: score descending, then newest chunk, then id.
pub fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.chunk.created_at.cmp(&a.chunk.created_at))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// A storage backend for chunks with vector similarity search.
///
/// Collections are created implicitly by the first upsert that names them.
///
/// # Example
///
/// ```rust,ignore
/// use ragline_core::{VectorStore, InMemoryVectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert(&chunks).await?;
/// let results = store.search("docs", &query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write a batch of chunks, each carrying its collection and embedding.
    ///
    /// The batch is atomic: either every chunk becomes visible to subsequent
    /// searches or none does.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Search for the `top_k` most similar chunks to the given embedding.
    ///
    /// Returns results ordered by [`rank_order`]. A collection with no chunks,
    /// including one that was never written, yields an empty result.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Number of chunks stored in `collection`.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Names of all non-empty collections.
    async fn collections(&self) -> Result<Vec<String>>;

    /// Delete a collection and all its chunks. Returns whether it existed.
    async fn delete_collection(&self, collection: &str) -> Result<bool>;
}
