//! Configuration for retrieval, caching, admission control and provider calls.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Token-bucket quota for one route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BucketConfig {
    /// Maximum number of tokens the bucket holds.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl BucketConfig {
    /// Create a quota of `capacity` tokens refilled at `refill_rate` tokens per second.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self { capacity, refill_rate }
    }

    /// A quota of `requests` per minute, allowing a burst of the full minute.
    pub fn per_minute(requests: u32) -> Self {
        Self { capacity: f64::from(requests), refill_rate: f64::from(requests) / 60.0 }
    }

    fn validate(&self, route: &str) -> Result<()> {
        if !(self.capacity >= 1.0) {
            return Err(RagError::Config(format!(
                "rate limit capacity for '{route}' must be at least 1 (got {})",
                self.capacity
            )));
        }
        if !(self.refill_rate > 0.0) {
            return Err(RagError::Config(format!(
                "rate limit refill_rate for '{route}' must be positive (got {})",
                self.refill_rate
            )));
        }
        Ok(())
    }
}

/// Per-route rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Set to `false` to admit every request.
    pub enabled: bool,
    /// Quota for routes without an explicit override.
    pub default: BucketConfig,
    /// Route-specific quotas.
    #[serde(default)]
    pub routes: HashMap<String, BucketConfig>,
    /// Key buckets by `(route, client)` instead of by route alone.
    #[serde(default)]
    pub per_client: bool,
    /// Upper bound on per-client buckets. Once reached, unknown clients share
    /// one overflow bucket per route until idle buckets are swept.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_max_clients() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: BucketConfig::per_minute(60),
            routes: HashMap::new(),
            per_client: false,
            max_clients: default_max_clients(),
        }
    }
}

impl RateLimitConfig {
    /// The quota that applies to `route`.
    pub fn quota_for(&self, route: &str) -> BucketConfig {
        self.routes.get(route).copied().unwrap_or(self.default)
    }
}

/// Configuration parameters for the RAG service core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Length of every embedding vector.
    pub embedding_dimension: usize,
    /// Collection used when a request does not name one.
    pub default_collection: String,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum similarity score for results. `None` keeps every top-k result.
    pub similarity_threshold: Option<f32>,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Upper bound on the context handed to the LLM, in characters.
    pub max_context_chars: usize,
    /// Lifetime of a cached answer.
    pub cache_ttl: Duration,
    /// Upper bound on cached answers.
    pub cache_max_entries: usize,
    /// Admission control.
    pub rate_limit: RateLimitConfig,
    /// Deadline for one LLM call.
    pub llm_timeout: Duration,
    /// Deadline for one embedding call.
    pub embed_timeout: Duration,
    /// Deadline for one vector search.
    pub search_timeout: Duration,
    /// Total attempts per provider call, including the first. The default of
    /// 3 is one call plus two retries.
    pub max_retries: u32,
    /// First backoff delay.
    pub backoff_base: Duration,
    /// Largest backoff delay.
    pub backoff_cap: Duration,
    /// Documents embedded concurrently during one ingest call.
    pub ingest_concurrency: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 1536,
            default_collection: "documents".to_string(),
            top_k: 4,
            similarity_threshold: None,
            chunk_size: 512,
            chunk_overlap: 100,
            max_context_chars: 8_000,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1_024,
            rate_limit: RateLimitConfig::default(),
            llm_timeout: Duration::from_secs(30),
            embed_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(5),
            ingest_concurrency: 4,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load the defaults, overridden by `RAGLINE_*` environment variables.
    ///
    /// Durations are given in seconds (`*_SECS`) or milliseconds (`*_MS`).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a variable cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        let c = &mut builder.config;

        if let Some(v) = env_parse("RAGLINE_EMBEDDING_DIMENSION")? {
            c.embedding_dimension = v;
        }
        if let Some(v) = env_parse::<String>("RAGLINE_COLLECTION")? {
            c.default_collection = v;
        }
        if let Some(v) = env_parse("RAGLINE_TOP_K")? {
            c.top_k = v;
        }
        if let Some(v) = env_parse("RAGLINE_SIMILARITY_THRESHOLD")? {
            c.similarity_threshold = Some(v);
        }
        if let Some(v) = env_parse("RAGLINE_CHUNK_SIZE")? {
            c.chunk_size = v;
        }
        if let Some(v) = env_parse("RAGLINE_CHUNK_OVERLAP")? {
            c.chunk_overlap = v;
        }
        if let Some(v) = env_parse("RAGLINE_MAX_CONTEXT_CHARS")? {
            c.max_context_chars = v;
        }
        if let Some(v) = env_parse("RAGLINE_CACHE_TTL_SECS")? {
            c.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("RAGLINE_CACHE_MAX_ENTRIES")? {
            c.cache_max_entries = v;
        }
        if let Some(v) = env_parse("RAGLINE_RATE_LIMIT_ENABLED")? {
            c.rate_limit.enabled = v;
        }
        if let Some(v) = env_parse("RAGLINE_RATE_LIMIT_PER_MINUTE")? {
            c.rate_limit.default = BucketConfig::per_minute(v);
        }
        if let Some(v) = env_parse("RAGLINE_RATE_LIMIT_PER_CLIENT")? {
            c.rate_limit.per_client = v;
        }
        if let Some(v) = env_parse("RAGLINE_RATE_LIMIT_MAX_CLIENTS")? {
            c.rate_limit.max_clients = v;
        }
        if let Some(v) = env_parse("RAGLINE_LLM_TIMEOUT_SECS")? {
            c.llm_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("RAGLINE_EMBED_TIMEOUT_SECS")? {
            c.embed_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("RAGLINE_SEARCH_TIMEOUT_SECS")? {
            c.search_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("RAGLINE_MAX_RETRIES")? {
            c.max_retries = v;
        }
        if let Some(v) = env_parse("RAGLINE_BACKOFF_BASE_MS")? {
            c.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("RAGLINE_BACKOFF_CAP_MS")? {
            c.backoff_cap = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("RAGLINE_INGEST_CONCURRENCY")? {
            c.ingest_concurrency = v;
        }

        builder.build()
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RagError::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the embedding vector length.
    pub fn embedding_dimension(mut self, dimension: usize) -> Self {
        self.config.embedding_dimension = dimension;
        self
    }

    /// Set the collection used when requests omit one.
    pub fn default_collection(mut self, name: impl Into<String>) -> Self {
        self.config.default_collection = name.into();
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Drop search results scoring below `threshold`.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the context budget for the LLM prompt.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    /// Set the lifetime of cached answers.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set the maximum number of cached answers.
    pub fn cache_max_entries(mut self, entries: usize) -> Self {
        self.config.cache_max_entries = entries;
        self
    }

    /// Replace the rate limiting configuration.
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Override the quota for one route.
    pub fn route_limit(mut self, route: impl Into<String>, quota: BucketConfig) -> Self {
        self.config.rate_limit.routes.insert(route.into(), quota);
        self
    }

    /// Set the per-attempt LLM deadline.
    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.config.llm_timeout = timeout;
        self
    }

    /// Set the per-attempt embedding deadline.
    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout = timeout;
        self
    }

    /// Set the vector search deadline.
    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.config.search_timeout = timeout;
        self
    }

    /// Set the total number of attempts per provider call.
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    /// Set the exponential backoff bounds.
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_cap = cap;
        self
    }

    /// Set how many documents are embedded concurrently.
    pub fn ingest_concurrency(mut self, concurrency: usize) -> Self {
        self.config.ingest_concurrency = concurrency;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k`, `embedding_dimension`, `cache_max_entries`, `max_retries`,
    ///   `max_context_chars`, `ingest_concurrency` or `rate_limit.max_clients`
    ///   is zero
    /// - `backoff_base > backoff_cap`
    /// - a rate limit quota is not positive
    pub fn build(self) -> Result<RagConfig> {
        let c = &self.config;
        if c.chunk_overlap >= c.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        let non_zero = [
            ("top_k", c.top_k),
            ("embedding_dimension", c.embedding_dimension),
            ("cache_max_entries", c.cache_max_entries),
            ("max_retries", c.max_retries as usize),
            ("max_context_chars", c.max_context_chars),
            ("ingest_concurrency", c.ingest_concurrency),
            ("rate_limit.max_clients", c.rate_limit.max_clients),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(RagError::Config(format!("{name} must be greater than zero")));
            }
        }
        if c.default_collection.trim().is_empty() {
            return Err(RagError::Config("default_collection must not be empty".to_string()));
        }
        if c.backoff_base > c.backoff_cap {
            return Err(RagError::Config(format!(
                "backoff_base ({:?}) must not exceed backoff_cap ({:?})",
                c.backoff_base, c.backoff_cap
            )));
        }
        c.rate_limit.default.validate("default")?;
        for (route, quota) in &c.rate_limit.routes {
            quota.validate(route)?;
        }
        Ok(self.config)
    }
}
