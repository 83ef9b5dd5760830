//! Retrieval-generation orchestrator.
//!
//! The [`Orchestrator`] owns every stateful component of the service (the
//! query cache, the rate limiter and the ingestion pipeline) and runs each
//! query through a small state machine:
//!
//! ```text
//! Admitted → CacheCheck → CacheHit → Respond
//!                       └ CacheMiss → Retrieving → Generating → CachingResult → Respond
//! ```
//!
//! A request that fails validation ends in `Invalid`, one denied by the rate
//! limiter in `Rejected`, and one whose provider or store call gives up in
//! `Failed`.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragline_core::{Orchestrator, QueryRequest, RagConfig, InMemoryVectorStore};
//!
//! let orchestrator = Orchestrator::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .llm(Arc::new(llm))
//!     .build()?;
//!
//! orchestrator.ingest("docs", vec![Document::new("Rust is a systems language.")]).await?;
//! let response = orchestrator.query(QueryRequest::new("What is Rust?").collection("docs")).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheStats, CachedAnswer, QueryCache};
use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Document, SearchResult, Source};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::ingest::{IngestReport, IngestionPipeline};
use crate::llm::LlmProvider;
use crate::prompt::PromptBuilder;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::vectorstore::VectorStore;

/// Route key used by [`QueryRequest::new`].
pub const QUERY_ROUTE: &str = "query";

/// Route key the HTTP layer uses for ingest admission.
pub const INGEST_ROUTE: &str = "ingest";

/// Lifecycle of a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Admitted,
    CacheCheck,
    CacheHit,
    CacheMiss,
    Retrieving,
    Generating,
    CachingResult,
    Respond,
    /// Denied by the rate limiter.
    Rejected,
    /// A provider or store call failed for good.
    Failed,
    /// The request itself was malformed.
    Invalid,
}

impl QueryState {
    /// Returns `true` for states a query never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Respond | Self::Rejected | Self::Failed | Self::Invalid)
    }
}

/// A question to answer from one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Target collection; the configured default when `None`.
    pub collection: Option<String>,
    pub query: String,
    /// Rate-limit route key.
    pub route: String,
    /// Caller identity, used for per-client rate limiting.
    pub client: Option<String>,
    /// Overrides the configured `top_k`.
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            collection: None,
            query: query.into(),
            route: QUERY_ROUTE.to_string(),
            client: None,
            top_k: None,
        }
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// The answer to a [`QueryRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Chunks whose text went into the prompt, in rank order.
    pub sources: Vec<Source>,
    /// Whether the answer was served from the query cache.
    pub cached: bool,
}

/// Snapshot of the orchestrator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub rejected: u64,
    pub invalid: u64,
    pub failed: u64,
    pub documents_ingested: u64,
    pub chunks_ingested: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    rejected: AtomicU64,
    invalid: AtomicU64,
    failed: AtomicU64,
    documents_ingested: AtomicU64,
    chunks_ingested: AtomicU64,
}

/// Coordinates admission, caching, retrieval and generation.
///
/// Construct one via [`Orchestrator::builder()`]. All methods take `&self`;
/// share the orchestrator behind an `Arc` across request handlers.
pub struct Orchestrator {
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    cache: Arc<QueryCache>,
    limiter: Arc<RateLimiter>,
    ingestion: IngestionPipeline,
    prompts: PromptBuilder,
    retry: RetryPolicy,
    counters: Counters,
}

impl Orchestrator {
    /// Create a new [`OrchestratorBuilder`].
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Names of the embedding and LLM providers, for diagnostics.
    pub fn provider_names(&self) -> (&str, &str) {
        (self.embedder.name(), self.llm.name())
    }

    /// Take one rate-limit token for `route`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::RateLimited`] when the bucket is empty.
    pub fn admit(&self, route: &str, client: Option<&str>) -> Result<()> {
        self.limiter.check(route, client)
    }

    /// Ingest `documents` into `collection`, then invalidate its cached answers.
    ///
    /// Admission is the caller's concern; see [`admit`](Self::admit).
    ///
    /// # Errors
    ///
    /// See [`IngestionPipeline::ingest`].
    pub async fn ingest(&self, collection: &str, documents: Vec<Document>) -> Result<IngestReport> {
        let report = self.ingestion.ingest(collection, documents).await?;
        let c = &self.counters;
        c.documents_ingested.fetch_add(report.documents_written as u64, Ordering::Relaxed);
        c.chunks_ingested.fetch_add(report.chunks_written as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Answer a question from its collection.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] for a blank query or collection, or a zero `top_k`.
    /// - [`RagError::RateLimited`] when admission is denied.
    /// - [`RagError::Provider`] or [`RagError::Timeout`] when the embedder or
    ///   LLM keeps failing after retries.
    /// - [`RagError::VectorStore`] when the search backend fails.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let outcome = self.run_query(&request).await;

        if let Err(e) = &outcome {
            let state = e.terminal_state();
            let counter = match state {
                QueryState::Invalid => &self.counters.invalid,
                QueryState::Rejected => &self.counters.rejected,
                _ => &self.counters.failed,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            match state {
                QueryState::Failed => {
                    error!(route = %request.route, state = ?state, error = %e, "query failed")
                }
                _ => debug!(route = %request.route, state = ?state, error = %e, "query ended"),
            }
        }
        outcome
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }
        let collection = request.collection.as_deref().unwrap_or(&self.config.default_collection);
        if collection.trim().is_empty() {
            return Err(RagError::Validation("collection name must not be empty".to_string()));
        }
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(RagError::Validation("k must be at least 1".to_string()));
        }

        self.limiter.check(&request.route, request.client.as_deref())?;
        transition(QueryState::Admitted, collection);

        transition(QueryState::CacheCheck, collection);
        let cache_key = self.cache_key(collection, query, top_k);
        if let Some(entry) = self.cache.lookup(&cache_key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            transition(QueryState::CacheHit, collection);
            transition(QueryState::Respond, collection);
            return Ok(QueryResponse {
                answer: entry.value.answer.clone(),
                sources: entry.value.sources.clone(),
                cached: true,
            });
        }
        transition(QueryState::CacheMiss, collection);
        let generation = self.cache.generation(collection);

        transition(QueryState::Retrieving, collection);
        let results = self.retrieve(collection, query, top_k).await?;

        transition(QueryState::Generating, collection);
        let prompt = self.prompts.build(query, &results);
        let answer = self
            .retry
            .run("generate", self.config.llm_timeout, || self.llm.generate(&prompt))
            .await?;

        transition(QueryState::CachingResult, collection);
        let sources: Vec<Source> = prompt.sources().to_vec();
        let value = CachedAnswer { answer: answer.clone(), sources: sources.clone() };
        let ttl = self.cache.default_ttl();
        let stored = self.cache.set_if_current(cache_key, value, ttl, generation);

        transition(QueryState::Respond, collection);
        info!(collection, sources = sources.len(), cached_result = stored, "query answered");
        Ok(QueryResponse { answer, sources, cached: false })
    }

    async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self
            .retry
            .run("embed_query", self.config.embed_timeout, || self.embedder.embed(query))
            .await?;

        let search = self.store.search(collection, &embedding, top_k);
        let results = match tokio::time::timeout(self.config.search_timeout, search).await {
            Ok(results) => results?,
            Err(_) => {
                return Err(RagError::Timeout {
                    operation: "search".to_string(),
                    after: self.config.search_timeout,
                });
            }
        };

        let filtered: Vec<SearchResult> = match self.config.similarity_threshold {
            Some(threshold) => results.into_iter().filter(|r| r.score >= threshold).collect(),
            None => results,
        };
        if filtered.is_empty() {
            warn!(collection, "no sources found, answering without context");
        }
        Ok(filtered)
    }

    /// A non-default `top_k` yields a different answer, so it is part of the key.
    fn cache_key(&self, collection: &str, query: &str, top_k: usize) -> CacheKey {
        let key = CacheKey::new(collection, query);
        if top_k == self.config.top_k { key } else { key.with_top_k(top_k) }
    }

    /// Snapshot of the counters, including the cache's own.
    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            queries: c.queries.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            invalid: c.invalid.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            documents_ingested: c.documents_ingested.load(Ordering::Relaxed),
            chunks_ingested: c.chunks_ingested.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }
}

fn transition(state: QueryState, collection: &str) {
    debug!(state = ?state, collection, "query state");
}

/// Builder for constructing an [`Orchestrator`].
///
/// `config`, `embedding_provider`, `vector_store` and `llm` are required.
/// The chunker defaults to a [`RecursiveChunker`] sized from the config; the
/// cache, rate limiter and retry policy default to instances built from the
/// config and may be injected to share them or to control them in tests.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::builder()
///     .config(config)
///     .embedding_provider(Arc::new(embedder))
///     .vector_store(Arc::new(store))
///     .llm(Arc::new(llm))
///     .chunker(Arc::new(FixedSizeChunker::new(256, 32)))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    llm: Option<Arc<dyn LlmProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    cache: Option<Arc<QueryCache>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    retry: Option<RetryPolicy>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the [`Orchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a required component is missing or the
    /// embedder's dimensionality differs from `embedding_dimension`.
    pub fn build(self) -> Result<Orchestrator> {
        let config =
            self.config.ok_or_else(|| RagError::Config("config is required".to_string()))?;
        let embedder = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let store = self
            .vector_store
            .ok_or_else(|| RagError::Config("vector_store is required".to_string()))?;
        let llm = self.llm.ok_or_else(|| RagError::Config("llm is required".to_string()))?;

        if embedder.dimensions() != config.embedding_dimension {
            return Err(RagError::Config(format!(
                "embedder '{}' produces {} dimensions but embedding_dimension is {}",
                embedder.name(),
                embedder.dimensions(),
                config.embedding_dimension
            )));
        }

        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap))
        });
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(QueryCache::new(config.cache_max_entries, config.cache_ttl))
        });
        let limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(config.rate_limit.clone())));
        let retry = self.retry.unwrap_or_else(|| RetryPolicy::from_config(&config));

        let ingestion = IngestionPipeline::new(
            embedder.clone(),
            store.clone(),
            chunker,
            cache.clone(),
            retry.clone(),
            config.embed_timeout,
            config.embedding_dimension,
            config.ingest_concurrency,
        );

        Ok(Orchestrator {
            prompts: PromptBuilder::new(config.max_context_chars),
            config,
            embedder,
            store,
            llm,
            cache,
            limiter,
            ingestion,
            retry,
            counters: Counters::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::inmemory::InMemoryVectorStore;
    use crate::llm::MockLlm;

    fn orchestrator(llm: Arc<MockLlm>) -> Orchestrator {
        let config = RagConfig::builder().embedding_dimension(32).build().unwrap();
        Orchestrator::builder()
            .config(config)
            .embedding_provider(Arc::new(HashEmbeddingProvider::new(32)))
            .vector_store(Arc::new(InMemoryVectorStore::new()))
            .llm(llm)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_components() {
        let err = Orchestrator::builder().config(RagConfig::default()).build().err().unwrap();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn builder_rejects_dimension_mismatch() {
        let err = Orchestrator::builder()
            .config(RagConfig::default())
            .embedding_provider(Arc::new(HashEmbeddingProvider::new(8)))
            .vector_store(Arc::new(InMemoryVectorStore::new()))
            .llm(Arc::new(MockLlm::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("dimensions"));
    }

    #[tokio::test]
    async fn blank_query_is_invalid_and_skips_the_limiter() {
        let orchestrator = orchestrator(Arc::new(MockLlm::new()));
        let err = orchestrator.query(QueryRequest::new("   ")).await.unwrap_err();

        assert_eq!(err.terminal_state(), QueryState::Invalid);
        assert_eq!(orchestrator.rate_limiter().bucket_count(), 0);
        assert_eq!(orchestrator.stats().invalid, 1);
    }

    #[tokio::test]
    async fn zero_k_is_invalid() {
        let orchestrator = orchestrator(Arc::new(MockLlm::new()));
        let err = orchestrator.query(QueryRequest::new("q").top_k(0)).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_collection_still_answers() {
        let llm = Arc::new(MockLlm::new());
        let orchestrator = orchestrator(llm.clone());

        let response = orchestrator.query(QueryRequest::new("anything?")).await.unwrap();
        assert!(response.sources.is_empty());
        assert!(!response.cached);
        assert!(response.answer.contains("No sources"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn overridden_k_is_cached_separately() {
        let llm = Arc::new(MockLlm::new());
        let orchestrator = orchestrator(llm.clone());
        orchestrator.ingest("documents", vec![Document::new("Rust has ownership.")]).await.unwrap();

        orchestrator.query(QueryRequest::new("ownership")).await.unwrap();
        let other = orchestrator.query(QueryRequest::new("ownership").top_k(1)).await.unwrap();
        assert!(!other.cached);
        let again = orchestrator.query(QueryRequest::new("Ownership ").top_k(1)).await.unwrap();
        assert!(again.cached);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn query_text_cannot_spoof_an_overridden_k() {
        let llm = Arc::new(MockLlm::new());
        let orchestrator = orchestrator(llm.clone());
        let documents =
            vec![Document::new("Rust has ownership."), Document::new("Rust has traits.")];
        orchestrator.ingest("documents", documents).await.unwrap();

        let literal = orchestrator.query(QueryRequest::new("foo [k=1]")).await.unwrap();
        assert_eq!(literal.sources.len(), 2);

        let one = orchestrator.query(QueryRequest::new("foo").top_k(1)).await.unwrap();
        assert!(!one.cached);
        assert_eq!(one.sources.len(), 1);
    }

    #[tokio::test]
    async fn single_chunk_collection_always_returns_its_chunk() {
        let orchestrator = orchestrator(Arc::new(MockLlm::new()));
        orchestrator
            .ingest("documents", vec![Document::new("The borrow checker enforces aliasing rules.")])
            .await
            .unwrap();

        for i in 0..20 {
            let request = QueryRequest::new(format!("unrelated question {i}"));
            let response = orchestrator.query(request).await.unwrap();
            assert_eq!(response.sources.len(), 1, "query {i} lost its only source");
        }
    }

    #[tokio::test]
    async fn sources_match_the_passages_in_the_prompt() {
        let config = RagConfig::builder()
            .embedding_dimension(32)
            .chunk_size(20)
            .chunk_overlap(0)
            .max_context_chars(20)
            .build()
            .unwrap();
        let orchestrator = Orchestrator::builder()
            .config(config)
            .embedding_provider(Arc::new(HashEmbeddingProvider::new(32)))
            .vector_store(Arc::new(InMemoryVectorStore::new()))
            .llm(Arc::new(MockLlm::new()))
            .build()
            .unwrap();
        let documents = vec![
            Document::new("aaaa aaaa aaaa aaaa"),
            Document::new("bbbb bbbb bbbb bbbb"),
            Document::new("cccc cccc cccc cccc"),
        ];
        orchestrator.ingest("documents", documents).await.unwrap();

        let response = orchestrator.query(QueryRequest::new("letters")).await.unwrap();
        assert_eq!(response.sources.len(), 2);
    }

    #[test]
    fn terminal_states() {
        assert!(QueryState::Respond.is_terminal());
        assert!(QueryState::Rejected.is_terminal());
        assert!(!QueryState::CacheMiss.is_terminal());
    }
}
