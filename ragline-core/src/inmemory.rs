//! In-memory vector store.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a
//! `HashMap` protected by a `tokio::sync::RwLock`. A batch is validated in
//! full before the write lock mutates anything, which makes every upsert
//! all-or-nothing for concurrent searches.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{Similarity, VectorStore, rank_order};

const BACKEND: &str = "InMemory";

#[derive(Debug)]
struct Collection {
    dimensions: usize,
    similarity: Similarity,
    chunks: HashMap<String, Chunk>,
}

/// An in-memory vector store with brute-force similarity search.
///
/// Collections are stored as nested maps: collection name → chunk ID → chunk.
/// Each collection records its dimension and similarity metric when created.
///
/// # Example
///
/// ```rust,ignore
/// use ragline_core::{InMemoryVectorStore, Similarity};
///
/// let store = InMemoryVectorStore::new().with_dimensions(384);
/// let dot = InMemoryVectorStore::new().with_similarity(Similarity::DotProduct);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
    similarity: Similarity,
    dimensions: Option<usize>,
}

impl InMemoryVectorStore {
    /// Create a new empty store using cosine similarity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `similarity` for collections created from now on.
    pub fn with_similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    /// Require every embedding to have exactly `dimensions` entries.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    fn invalid(message: String) -> RagError {
        RagError::Validation(message)
    }

    /// Check a batch against the current collections without mutating them.
    fn validate(&self, existing: &HashMap<String, Collection>, chunks: &[Chunk]) -> Result<()> {
        let mut batch_dims: HashMap<&str, usize> = HashMap::new();
        for chunk in chunks {
            if chunk.collection.trim().is_empty() {
                return Err(Self::invalid(format!("chunk '{}' has no collection", chunk.id)));
            }
            if chunk.embedding.is_empty() {
                return Err(Self::invalid(format!("chunk '{}' has no embedding", chunk.id)));
            }
            if chunk.embedding.iter().any(|x| !x.is_finite()) {
                let message = format!("chunk '{}' has a non-finite embedding", chunk.id);
                return Err(Self::invalid(message));
            }
            let expected = existing
                .get(&chunk.collection)
                .map(|c| c.dimensions)
                .or(self.dimensions)
                .unwrap_or_else(|| {
                    *batch_dims.entry(chunk.collection.as_str()).or_insert(chunk.embedding.len())
                });
            if chunk.embedding.len() != expected {
                return Err(Self::invalid(format!(
                    "chunk '{}' has dimension {} but collection '{}' expects {expected}",
                    chunk.id,
                    chunk.embedding.len(),
                    chunk.collection
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut collections = self.collections.write().await;
        self.validate(&collections, chunks)?;

        for chunk in chunks {
            let collection = match collections.entry(chunk.collection.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let dimensions = chunk.embedding.len();
                    debug!(collection = %chunk.collection, dimensions, "creating collection");
                    entry.insert(Collection {
                        dimensions: chunk.embedding.len(),
                        similarity: self.similarity,
                        chunks: HashMap::new(),
                    })
                }
            };
            collection.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        debug!(backend = BACKEND, chunk_count = chunks.len(), "upserted batch");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        let Some(store) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if top_k == 0 || store.chunks.is_empty() {
            return Ok(Vec::new());
        }
        if embedding.len() != store.dimensions {
            return Err(RagError::Validation(format!(
                "query has dimension {} but collection '{collection}' expects {}",
                embedding.len(),
                store.dimensions
            )));
        }

        let mut scored: Vec<SearchResult> = store
            .chunks
            .values()
            .map(|chunk| SearchResult {
                score: store.similarity.score(&chunk.embedding, embedding),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.collections.read().await.get(collection).map_or(0, |c| c.chunks.len()))
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections
            .iter()
            .filter(|(_, c)| !c.chunks.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.write().await.remove(collection).is_some())
    }
}
