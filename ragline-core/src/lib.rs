//! # ragline-core
//!
//! Core of a retrieval-augmented generation service: pluggable embedding,
//! vector store and LLM backends behind async traits, an ingestion pipeline,
//! a TTL + LRU query cache with collection-level invalidation, token-bucket
//! admission control, and an orchestrator tying them together with bounded
//! retries and per-call deadlines.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragline_core::{
//!     Document, HashEmbeddingProvider, InMemoryVectorStore, MockLlm, Orchestrator, QueryRequest,
//!     RagConfig,
//! };
//!
//! let config = RagConfig::builder().embedding_dimension(64).build()?;
//! let orchestrator = Orchestrator::builder()
//!     .config(config)
//!     .embedding_provider(Arc::new(HashEmbeddingProvider::new(64)))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .llm(Arc::new(MockLlm::new()))
//!     .build()?;
//!
//! orchestrator.ingest("documents", vec![Document::new("Tokio is an async runtime.")]).await?;
//! let response = orchestrator.query(QueryRequest::new("What is Tokio?")).await?;
//! println!("{} (cached: {})", response.answer, response.cached);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                                          |
//! |----------|--------------------------------------------------|
//! | `openai` | `OpenAIEmbeddingProvider`, `OpenAIChatProvider`  |

pub mod cache;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod inmemory;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;

pub use cache::{CacheKey, CacheStats, CachedAnswer, QueryCache, normalize_query};
pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker};
pub use config::{BucketConfig, RagConfig, RagConfigBuilder, RateLimitConfig};
pub use document::{Chunk, Document, Metadata, MetadataValue, SearchResult, Source};
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider};
pub use error::{DocumentFailure, ProviderErrorKind, RagError, Result};
pub use ingest::{IngestReport, IngestionPipeline};
pub use inmemory::InMemoryVectorStore;
pub use llm::{LlmProvider, MockLlm};
pub use orchestrator::{
    INGEST_ROUTE, Orchestrator, OrchestratorBuilder, OrchestratorStats, QUERY_ROUTE, QueryRequest,
    QueryResponse, QueryState,
};
pub use prompt::{Prompt, PromptBuilder};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use vectorstore::{Similarity, VectorStore};

#[cfg(feature = "openai")]
pub use openai::{OpenAIChatProvider, OpenAIEmbeddingProvider};
