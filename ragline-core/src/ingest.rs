//! Ingestion pipeline: chunk → embed → store → invalidate.
//!
//! Each document is an independent unit of work. Its chunks are embedded and
//! written in a single vector store batch, so a document is either fully
//! searchable or not at all. A failing document is reported by id and does
//! not affect its siblings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::QueryCache;
use crate::chunking::Chunker;
use crate::document::{Chunk, Document, MetadataValue};
use crate::embedding::EmbeddingProvider;
use crate::error::{DocumentFailure, RagError, Result};
use crate::retry::RetryPolicy;
use crate::vectorstore::VectorStore;

/// Outcome of one ingest call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub collection: String,
    /// Documents submitted.
    pub documents: usize,
    /// Documents whose chunks were written.
    pub documents_written: usize,
    pub chunks_written: usize,
    /// Documents that were skipped, in request order.
    pub failures: Vec<DocumentFailure>,
    /// Ids of the written chunks, in request order.
    #[serde(skip)]
    pub chunk_ids: Vec<String>,
}

/// Splits, embeds and stores documents, then invalidates cached answers.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    cache: Arc<QueryCache>,
    retry: RetryPolicy,
    embed_timeout: Duration,
    dimension: usize,
    concurrency: usize,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        chunker: Arc<dyn Chunker>,
        cache: Arc<QueryCache>,
        retry: RetryPolicy,
        embed_timeout: Duration,
        dimension: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            chunker,
            cache,
            retry,
            embed_timeout,
            dimension,
            concurrency: concurrency.max(1),
        }
    }

    /// Ingest `documents` into `collection`.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] if `collection` is blank or `documents` is empty.
    /// - [`RagError::Batch`] if no document could be written.
    pub async fn ingest(&self, collection: &str, documents: Vec<Document>) -> Result<IngestReport> {
        if collection.trim().is_empty() {
            return Err(RagError::Validation("collection name must not be empty".to_string()));
        }
        if documents.is_empty() {
            return Err(RagError::Validation("at least one document is required".to_string()));
        }

        let total = documents.len();
        let outcomes: Vec<std::result::Result<Vec<String>, DocumentFailure>> =
            stream::iter(documents.into_iter().enumerate())
                .map(|(index, document)| self.ingest_document(collection, index, document))
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut report = IngestReport {
            collection: collection.to_string(),
            documents: total,
            documents_written: 0,
            chunks_written: 0,
            failures: Vec::new(),
            chunk_ids: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Ok(ids) => {
                    report.documents_written += 1;
                    report.chunks_written += ids.len();
                    report.chunk_ids.extend(ids);
                }
                Err(failure) => report.failures.push(failure),
            }
        }

        if report.documents_written == 0 {
            error!(collection, documents = total, "ingestion failed for every document");
            return Err(RagError::Batch { failures: report.failures });
        }

        info!(
            collection,
            documents = total,
            chunks_written = report.chunks_written,
            failed = report.failures.len(),
            "ingest completed"
        );
        Ok(report)
    }

    async fn ingest_document(
        &self,
        collection: &str,
        index: usize,
        document: Document,
    ) -> std::result::Result<Vec<String>, DocumentFailure> {
        let fail = |reason: String| {
            warn!(collection, document.id = %document.id, %reason, "document rejected");
            DocumentFailure { index, document_id: document.id.clone(), reason }
        };

        let pieces = self.chunker.split(&document.text);
        if pieces.is_empty() {
            return Err(fail("document has no text".to_string()));
        }

        let texts: Vec<&str> = pieces.iter().map(String::as_str).collect();
        let embeddings = self
            .retry
            .run("embed", self.embed_timeout, || self.embedder.embed_batch(&texts))
            .await
            .map_err(|e| fail(format!("embedding failed: {e}")))?;

        if embeddings.len() != pieces.len() {
            return Err(fail(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                pieces.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(fail(format!(
                "embedder returned dimension {} but {} is configured",
                bad.len(),
                self.dimension
            )));
        }

        let created_at = Utc::now();
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index".to_string(), MetadataValue::from(i));
                Chunk {
                    id: Uuid::new_v4().to_string(),
                    collection: collection.to_string(),
                    document_id: document.id.clone(),
                    text,
                    embedding,
                    metadata,
                    created_at,
                }
            })
            .collect();

        self.store.upsert(&chunks).await.map_err(|e| fail(format!("upsert failed: {e}")))?;
        self.cache.invalidate(collection);

        let chunk_count = chunks.len();
        info!(collection, document.id = %document.id, chunk_count, "ingested document");
        Ok(chunks.into_iter().map(|c| c.id).collect())
    }
}
