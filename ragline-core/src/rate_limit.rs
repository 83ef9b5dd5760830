//! Token-bucket admission control, one bucket per route (and optionally per client).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{BucketConfig, RateLimitConfig};
use crate::error::{RagError, Result};

/// A single token bucket. Refilled lazily from the elapsed time on every use.
#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateLimitBucket {
    fn new(quota: BucketConfig, now: Instant) -> Self {
        Self {
            tokens: quota.capacity,
            capacity: quota.capacity,
            refill_rate: quota.refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_acquire(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
        }
    }

    /// Tokens currently available, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// A bucket that has refilled completely behaves exactly like a new one.
    fn is_idle(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.refill_rate >= self.capacity
    }
}

/// Minimum time between two sweeps of idle per-client buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Client label of the bucket shared by clients beyond `max_clients`.
const OVERFLOW_CLIENT: &str = "*";

/// Per-route token-bucket rate limiter.
///
/// Buckets are created on first use. Each bucket is updated under its own map
/// shard lock, so callers never lock. With per-client limiting, the number of
/// buckets is bounded by `max_clients` plus one overflow bucket per route;
/// buckets that have fully refilled are swept to make room for new clients.
///
/// # Example
///
/// ```rust,ignore
/// use ragline_core::{RateLimiter, config::RateLimitConfig};
///
/// let limiter = RateLimiter::new(RateLimitConfig::default());
/// if let Err(e) = limiter.check("query", Some("10.0.0.7")) {
///     // answer 429 with e.retry_after()
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, RateLimitBucket>,
    last_sweep: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: DashMap::new(), last_sweep: Mutex::new(None) }
    }

    /// The configuration this limiter enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket_key(&self, route: &str, client: Option<&str>, now: Instant) -> String {
        let client = match client {
            Some(client) if self.config.per_client => client,
            _ => return route.to_string(),
        };
        let key = format!("{route}|{client}");
        if self.buckets.contains_key(&key) {
            return key;
        }
        if self.buckets.len() >= self.config.max_clients {
            self.sweep_idle(now);
        }
        if self.buckets.len() >= self.config.max_clients {
            debug!(route, client, "client table full, using overflow bucket");
            return format!("{route}|{OVERFLOW_CLIENT}");
        }
        key
    }

    /// Drop buckets that have fully refilled, at most once per [`SWEEP_INTERVAL`].
    fn sweep_idle(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| now.saturating_duration_since(at) < SWEEP_INTERVAL) {
                return;
            }
            *last = Some(now);
        }
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
        let removed = before.saturating_sub(self.buckets.len());
        debug!(removed, "swept idle rate limit buckets");
    }

    /// Admit or reject one request on `route_key`.
    pub fn allow(&self, route_key: &str) -> bool {
        self.check(route_key, None).is_ok()
    }

    /// Admit one request, or fail with [`RagError::RateLimited`] carrying the
    /// time until a token is available.
    ///
    /// `client` only affects bucketing when per-client limiting is enabled.
    pub fn check(&self, route: &str, client: Option<&str>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Instant::now();
        let key = self.bucket_key(route, client, now);
        let quota = self.config.quota_for(route);
        let outcome = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| RateLimitBucket::new(quota, now))
            .try_acquire(now);

        outcome.map_err(|retry_after| {
            let retry_after_ms = retry_after.as_millis() as u64;
            debug!(route, bucket = %key, retry_after_ms, "request rejected");
            RagError::RateLimited { route: key, retry_after }
        })
    }

    /// Number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
