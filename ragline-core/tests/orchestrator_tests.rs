//! End-to-end behaviour of ingestion and querying through the orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ragline_core::{
    BucketConfig, Document, EmbeddingProvider, HashEmbeddingProvider, InMemoryVectorStore,
    LlmProvider, MockLlm, Orchestrator, Prompt, QueryRequest, QueryState, RagConfig, RagError,
    Result, RetryPolicy, VectorStore,
};
use tokio::sync::{Notify, Semaphore};

const DIM: usize = 32;

/// Wraps the hash embedder, failing the first `transient_failures` calls and
/// every call for text containing `poison`.
struct ScriptedEmbedder {
    inner: HashEmbeddingProvider,
    calls: AtomicUsize,
    transient_failures: usize,
}

impl ScriptedEmbedder {
    fn new(transient_failures: usize) -> Self {
        Self {
            inner: HashEmbeddingProvider::new(DIM),
            calls: AtomicUsize::new(0),
            transient_failures,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.transient_failures {
            return Err(RagError::transient("scripted", "503 service unavailable"));
        }
        if text.contains("poison") {
            return Err(RagError::permanent("scripted", "400 input rejected"));
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// An LLM that never succeeds.
#[derive(Default)]
struct DownLlm {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for DownLlm {
    fn name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RagError::transient("down", "502 bad gateway"))
    }
}

/// An LLM whose first `slow_calls` calls outlast any sensible deadline.
struct SlowLlm {
    calls: AtomicUsize,
    slow_calls: usize,
}

#[async_trait]
impl LlmProvider for SlowLlm {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.slow_calls {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        Ok(format!("answer to {}", prompt.question()))
    }
}

/// An LLM that waits for a permit before answering.
struct GatedLlm {
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl LlmProvider for GatedLlm {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.entered.notify_one();
        let _permit =
            self.gate.acquire().await.map_err(|e| RagError::permanent("gated", e.to_string()))?;
        Ok(format!("answer to {}", prompt.question()))
    }
}

fn config() -> RagConfig {
    RagConfig::builder()
        .embedding_dimension(DIM)
        .max_retries(3)
        .backoff(Duration::from_millis(100), Duration::from_secs(1))
        .build()
        .unwrap()
}

fn build(
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
) -> (Orchestrator, Arc<InMemoryVectorStore>) {
    let store = Arc::new(InMemoryVectorStore::new());
    let orchestrator = Orchestrator::builder()
        .retry_policy(RetryPolicy::from_config(&config).without_jitter())
        .config(config)
        .embedding_provider(embedder)
        .vector_store(store.clone())
        .llm(llm)
        .build()
        .unwrap();
    (orchestrator, store)
}

#[tokio::test]
async fn same_text_twice_gives_identical_vectors_and_distinct_ids() {
    let embedder = Arc::new(HashEmbeddingProvider::new(DIM));
    let (orchestrator, store) = build(config(), embedder.clone(), Arc::new(MockLlm::new()));

    let text = "Borrowing lets code use a value without taking ownership.";
    let first = orchestrator.ingest("docs", vec![Document::new(text)]).await.unwrap();
    let second = orchestrator.ingest("docs", vec![Document::new(text)]).await.unwrap();
    assert_eq!(first.chunk_ids.len(), 1);
    assert_ne!(first.chunk_ids, second.chunk_ids);

    let query = embedder.embed(text).await.unwrap();
    let results = store.search("docs", &query, 10).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.embedding, results[1].chunk.embedding);
    assert_ne!(results[0].chunk.id, results[1].chunk.id);
}

#[tokio::test]
async fn back_to_back_queries_hit_the_cache() {
    let llm = Arc::new(MockLlm::new());
    let (orchestrator, _) = build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());
    orchestrator
        .ingest("docs", vec![Document::new("Tokio schedules tasks on a thread pool.")])
        .await
        .unwrap();

    let first = QueryRequest::new("What is Tokio?").collection("docs");
    let first = orchestrator.query(first).await.unwrap();
    let second = QueryRequest::new("  what is   TOKIO? ").collection("docs");
    let second = orchestrator.query(second).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.answer, second.answer);
    assert_eq!(first.sources, second.sources);
    assert_eq!(first.sources.len(), 1);
    assert_eq!(llm.calls(), 1);

    let stats = orchestrator.stats();
    assert_eq!(stats.queries, 2);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn ingest_invalidates_cached_answers() {
    let llm = Arc::new(MockLlm::new());
    let (orchestrator, _) = build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());
    orchestrator.ingest("docs", vec![Document::new("first fact")]).await.unwrap();

    orchestrator.query(QueryRequest::new("facts?").collection("docs")).await.unwrap();
    orchestrator.ingest("docs", vec![Document::new("second fact")]).await.unwrap();
    let after = orchestrator.query(QueryRequest::new("facts?").collection("docs")).await.unwrap();

    assert!(!after.cached);
    assert_eq!(after.sources.len(), 2);
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn ingest_into_other_collection_keeps_cache() {
    let llm = Arc::new(MockLlm::new());
    let (orchestrator, _) = build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());
    orchestrator.ingest("docs", vec![Document::new("fact")]).await.unwrap();

    orchestrator.query(QueryRequest::new("fact?").collection("docs")).await.unwrap();
    orchestrator.ingest("other", vec![Document::new("unrelated")]).await.unwrap();
    let again = orchestrator.query(QueryRequest::new("fact?").collection("docs")).await.unwrap();

    assert!(again.cached);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn failing_document_is_named_and_siblings_are_written() {
    let (orchestrator, store) =
        build(config(), Arc::new(ScriptedEmbedder::new(0)), Arc::new(MockLlm::new()));

    let report = orchestrator
        .ingest(
            "docs",
            vec![
                Document::new("alpha").with_id("a"),
                Document::new("poison pill").with_id("b"),
                Document::new("gamma").with_id("c"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(report.documents, 3);
    assert_eq!(report.documents_written, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.failures[0].document_id, "b");
    assert_eq!(store.count("docs").await.unwrap(), 2);
}

#[tokio::test]
async fn batch_error_when_every_document_fails() {
    let (orchestrator, store) =
        build(config(), Arc::new(ScriptedEmbedder::new(0)), Arc::new(MockLlm::new()));

    let err = orchestrator
        .ingest(
            "docs",
            vec![Document::new("poison").with_id("x"), Document::new("   ").with_id("y")],
        )
        .await
        .unwrap_err();

    let RagError::Batch { failures } = err else { panic!("expected batch error") };
    let ids: Vec<&str> = failures.iter().map(|f| f.document_id.as_str()).collect();
    assert_eq!(ids, vec!["x", "y"]);
    assert_eq!(store.count("docs").await.unwrap(), 0);
}

#[tokio::test]
async fn empty_ingest_is_a_validation_error() {
    let (orchestrator, _) =
        build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), Arc::new(MockLlm::new()));
    assert!(matches!(orchestrator.ingest("docs", Vec::new()).await, Err(RagError::Validation(_))));
    assert!(matches!(
        orchestrator.ingest("", vec![Document::new("text")]).await,
        Err(RagError::Validation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn transient_embedding_failures_are_retried() {
    let embedder = Arc::new(ScriptedEmbedder::new(2));
    let (orchestrator, _) = build(config(), embedder.clone(), Arc::new(MockLlm::new()));

    let request = QueryRequest::new("anything").collection("docs");
    let response = orchestrator.query(request).await.unwrap();

    assert!(!response.cached);
    assert_eq!(embedder.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn generation_gives_up_after_max_attempts() {
    let llm = Arc::new(DownLlm::default());
    let (orchestrator, _) = build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());

    let err = orchestrator.query(QueryRequest::new("anything")).await.unwrap_err();

    assert!(matches!(err, RagError::Provider { .. }));
    assert_eq!(err.terminal_state(), QueryState::Failed);
    assert_eq!(err.status_code(), 503);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.stats().failed, 1);
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_queries_are_rejected_not_failed() {
    let mut config = config();
    config.rate_limit.default = BucketConfig::new(3.0, 1.0);
    let llm = Arc::new(MockLlm::new());
    let (orchestrator, _) = build(config, Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());

    for _ in 0..3 {
        orchestrator.query(QueryRequest::new("q")).await.unwrap();
    }
    let err = orchestrator.query(QueryRequest::new("q")).await.unwrap_err();

    assert_eq!(err.terminal_state(), QueryState::Rejected);
    assert_eq!(err.status_code(), 429);
    assert!(err.retry_after().is_some());
    assert_eq!(llm.calls(), 1);

    let stats = orchestrator.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.failed, 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(orchestrator.query(QueryRequest::new("q")).await.is_ok());
}

#[tokio::test]
async fn answer_computed_before_ingest_is_not_cached() {
    let llm = Arc::new(GatedLlm { entered: Notify::new(), gate: Semaphore::new(0) });
    let (orchestrator, _) = build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());
    let orchestrator = Arc::new(orchestrator);

    let in_flight = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.query(QueryRequest::new("question")).await })
    };
    llm.entered.notified().await;

    orchestrator.ingest("documents", vec![Document::new("new knowledge")]).await.unwrap();
    llm.gate.add_permits(2);

    let stale = in_flight.await.unwrap().unwrap();
    assert!(!stale.cached);
    assert!(orchestrator.cache().is_empty());
    assert_eq!(orchestrator.cache().stats().stale_writes, 1);

    let fresh = orchestrator.query(QueryRequest::new("question")).await.unwrap();
    assert!(!fresh.cached);
    assert_eq!(fresh.sources.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_generation_writes_nothing_to_the_cache() {
    let llm = Arc::new(SlowLlm { calls: AtomicUsize::new(0), slow_calls: 3 });
    let config = RagConfig { llm_timeout: Duration::from_secs(5), ..config() };
    let (orchestrator, _) = build(config, Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());
    orchestrator.ingest("documents", vec![Document::new("slow facts")]).await.unwrap();

    let err = orchestrator.query(QueryRequest::new("facts?")).await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert!(orchestrator.cache().is_empty());

    let retry = orchestrator.query(QueryRequest::new("facts?")).await.unwrap();
    assert!(!retry.cached);
}

#[tokio::test]
async fn aborted_query_writes_nothing_to_the_cache() {
    let llm = Arc::new(GatedLlm { entered: Notify::new(), gate: Semaphore::new(0) });
    let (orchestrator, _) = build(config(), Arc::new(HashEmbeddingProvider::new(DIM)), llm.clone());
    let orchestrator = Arc::new(orchestrator);

    let in_flight = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.query(QueryRequest::new("question")).await })
    };
    llm.entered.notified().await;
    in_flight.abort();
    assert!(in_flight.await.unwrap_err().is_cancelled());

    llm.gate.add_permits(1);
    assert!(orchestrator.cache().is_empty());

    let next = orchestrator.query(QueryRequest::new("question")).await.unwrap();
    assert!(!next.cached);
}
