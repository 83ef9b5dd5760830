//! Query result cache with TTL expiry, LRU eviction and per-collection invalidation.
//!
//! Entries are keyed by `(collection, normalized query, top_k override)`. The key space is
//! split over independently locked shards so operations on different keys
//! rarely contend. Each shard is an LRU list threaded through a slab of
//! nodes plus a hash index, giving O(1) `get` and `set`.
//!
//! Every collection has a generation counter. [`QueryCache::invalidate`]
//! bumps it and purges the collection's entries; an entry whose generation is
//! older than its collection's current one is treated as absent. A query
//! captures the generation before it starts retrieving and writes back with
//! [`QueryCache::set_if_current`], so an answer computed against data that
//! was replaced mid-flight is never cached.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::document::Source;

const DEFAULT_SHARDS: usize = 16;

/// Case-fold and collapse whitespace so trivially different queries share an entry.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Cache key: a collection, a normalized query and the result count when it
/// differs from the configured default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub collection: String,
    pub query: String,
    pub top_k: Option<usize>,
}

impl CacheKey {
    /// Build a key, normalizing `query`.
    pub fn new(collection: &str, query: &str) -> Self {
        Self { collection: collection.to_string(), query: normalize_query(query), top_k: None }
    }

    /// Key answers retrieved with a non-default `top_k` separately.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// A previously computed answer and its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    /// Retrieved chunks in rank order.
    pub sources: Vec<Source>,
}

/// A stored answer with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CachedAnswer,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub stale_writes: u64,
}

#[derive(Debug)]
struct Node {
    key: CacheKey,
    entry: Arc<CacheEntry>,
    expires_at: Instant,
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

enum Lookup {
    Hit(Arc<CacheEntry>),
    Expired,
    Stale,
    Miss,
}

/// One LRU list. `head` is the most recently used node.
#[derive(Debug)]
struct LruShard {
    capacity: usize,
    index: HashMap<CacheKey, usize>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruShard {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, idx: usize) -> &Node {
        self.slots[idx].as_ref().unwrap_or_else(|| unreachable!("dangling index {idx}"))
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.slots[idx].as_mut().unwrap_or_else(|| unreachable!("dangling index {idx}"))
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn remove(&mut self, idx: usize) -> Node {
        self.detach(idx);
        let node = self.slots[idx].take().unwrap_or_else(|| unreachable!("dangling index {idx}"));
        self.index.remove(&node.key);
        self.free.push(idx);
        node
    }

    fn get(&mut self, key: &CacheKey, now: Instant, current_generation: u64) -> Lookup {
        let Some(&idx) = self.index.get(key) else {
            return Lookup::Miss;
        };
        let node = self.node(idx);
        if node.generation < current_generation {
            self.remove(idx);
            return Lookup::Stale;
        }
        if node.expires_at <= now {
            self.remove(idx);
            return Lookup::Expired;
        }
        let entry = node.entry.clone();
        self.detach(idx);
        self.push_front(idx);
        Lookup::Hit(entry)
    }

    /// Insert or overwrite. Returns the number of entries evicted to make room.
    fn insert(
        &mut self,
        key: CacheKey,
        entry: Arc<CacheEntry>,
        expires_at: Instant,
        generation: u64,
    ) -> u64 {
        if let Some(&idx) = self.index.get(&key) {
            let node = self.node_mut(idx);
            node.entry = entry;
            node.expires_at = expires_at;
            node.generation = generation;
            self.detach(idx);
            self.push_front(idx);
            return 0;
        }

        let mut evicted = 0;
        while self.len() >= self.capacity {
            let Some(lru) = self.tail else { break };
            let node = self.remove(lru);
            trace!(collection = %node.key.collection, "evicted least recently used entry");
            evicted += 1;
        }

        let node = Node { key: key.clone(), entry, expires_at, generation, prev: None, next: None };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    fn remove_collection(&mut self, collection: &str) -> usize {
        let doomed: Vec<usize> = self
            .index
            .iter()
            .filter(|(key, _)| key.collection == collection)
            .map(|(_, &idx)| idx)
            .collect();
        for &idx in &doomed {
            self.remove(idx);
        }
        doomed.len()
    }
}

/// A bounded, TTL-aware, concurrently accessible answer cache.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use ragline_core::cache::{CachedAnswer, QueryCache};
///
/// let cache = QueryCache::new(1_000, Duration::from_secs(300));
/// cache.set("docs", "What is RAG?", answer, cache.default_ttl());
/// assert!(cache.get("docs", "what   is rag?").is_some());
/// cache.invalidate("docs");
/// ```
#[derive(Debug)]
pub struct QueryCache {
    shards: Vec<Mutex<LruShard>>,
    hasher: RandomState,
    generations: DashMap<String, u64>,
    default_ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    stale_writes: AtomicU64,
}

impl QueryCache {
    /// Create a cache holding at most `max_entries` answers.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self::with_shards(max_entries, default_ttl, DEFAULT_SHARDS)
    }

    /// Create a cache with an explicit shard count.
    ///
    /// Recency is tracked per shard, so eviction order is exact LRU only with
    /// a single shard. The shard count is clamped to `1..=max_entries`.
    pub fn with_shards(max_entries: usize, default_ttl: Duration, shards: usize) -> Self {
        let capacity = max_entries.max(1);
        let shard_count = shards.clamp(1, capacity);
        let shards = (0..shard_count)
            .map(|i| {
                let extra = usize::from(i < capacity % shard_count);
                Mutex::new(LruShard::new(capacity / shard_count + extra))
            })
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
            generations: DashMap::new(),
            default_ttl,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
        }
    }

    /// TTL applied by callers that have no specific lifetime in mind.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn shard(&self, key: &CacheKey) -> MutexGuard<'_, LruShard> {
        let idx = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        self.shards[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current generation of `collection`. Capture it before retrieval and
    /// pass it to [`set_if_current`](Self::set_if_current).
    pub fn generation(&self, collection: &str) -> u64 {
        self.generations.get(collection).map_or(0, |g| *g)
    }

    /// Look up a cached answer. Expired and invalidated entries are dropped.
    pub fn get(&self, collection: &str, query: &str) -> Option<Arc<CacheEntry>> {
        self.lookup(&CacheKey::new(collection, query))
    }

    /// Look up a cached answer by full key.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let collection = key.collection.as_str();
        let generation = self.generation(collection);
        let outcome = self.shard(key).get(key, Instant::now(), generation);
        match outcome {
            Lookup::Hit(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry);
            }
            Lookup::Expired => {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                debug!(collection, "cache entry expired");
            }
            Lookup::Stale | Lookup::Miss => {}
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store an answer, overwriting any existing entry for the key.
    ///
    /// A zero `ttl` stores nothing.
    pub fn set(&self, collection: &str, query: &str, value: CachedAnswer, ttl: Duration) {
        let generation = self.generation(collection);
        self.store(CacheKey::new(collection, query), value, ttl, generation);
    }

    /// Store an answer only if its collection was not invalidated since
    /// `generation` was captured. Returns whether the answer was stored.
    pub fn set_if_current(
        &self,
        key: CacheKey,
        value: CachedAnswer,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        if self.generation(&key.collection) != generation {
            self.stale_writes.fetch_add(1, Ordering::Relaxed);
            let collection = key.collection.as_str();
            debug!(collection, "skipping cache write computed before invalidation");
            return false;
        }
        self.store(key, value, ttl, generation);
        true
    }

    fn store(&self, key: CacheKey, value: CachedAnswer, ttl: Duration, generation: u64) {
        if ttl.is_zero() {
            return;
        }
        let entry = Arc::new(CacheEntry { key: key.clone(), value, created_at: Utc::now(), ttl });
        let expires_at = Instant::now() + ttl;
        let evicted = self.shard(&key).insert(key, entry, expires_at, generation);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Drop every entry for `collection` and reject in-flight writes computed
    /// before this call. Returns the number of entries removed.
    pub fn invalidate(&self, collection: &str) -> usize {
        *self.generations.entry(collection.to_string()).or_insert(0) += 1;
        let removed: usize = self
            .shards
            .iter()
            .map(|shard| {
                shard.lock().unwrap_or_else(PoisonError::into_inner).remove_collection(collection)
            })
            .sum();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(collection, removed, "invalidated cached queries");
        removed
    }

    /// Number of stored entries, including expired ones not yet observed.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
        }
    }
}
