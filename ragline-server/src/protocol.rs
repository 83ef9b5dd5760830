//! JSON bodies exchanged over the HTTP API.

use ragline_core::{
    DocumentFailure, IngestReport, Metadata, OrchestratorStats, RateLimitConfig, Source,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Defaults to the configured collection.
    #[serde(default)]
    pub collection: Option<String>,
    pub texts: Vec<String>,
    /// One metadata object per text, when present.
    #[serde(default)]
    pub metadatas: Option<Vec<Metadata>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub collection: String,
    pub documents: usize,
    pub documents_written: usize,
    pub chunks_written: usize,
    pub chunk_ids: Vec<String>,
    pub failures: Vec<FailureBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureBody {
    pub index: usize,
    pub document_id: String,
    pub reason: String,
}

impl From<DocumentFailure> for FailureBody {
    fn from(failure: DocumentFailure) -> Self {
        Self { index: failure.index, document_id: failure.document_id, reason: failure.reason }
    }
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            collection: report.collection,
            documents: report.documents,
            documents_written: report.documents_written,
            chunks_written: report.chunks_written,
            chunk_ids: report.chunk_ids,
            failures: report.failures.into_iter().map(FailureBody::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequestBody {
    #[serde(default)]
    pub collection: Option<String>,
    pub query: String,
    /// Number of chunks to retrieve; the configured `top_k` when absent.
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponseBody {
    pub answer: String,
    pub sources: Vec<Source>,
    pub cached: bool,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable error kind.
    pub error: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub embedder: String,
    pub llm: String,
    pub collections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub name: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub default_collection: String,
    pub top_k: usize,
    pub cache_ttl_secs: u64,
    pub rate_limit: RateLimitConfig,
    pub stats: OrchestratorStats,
    pub collections: Vec<CollectionSummary>,
}
