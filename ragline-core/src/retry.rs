//! Retry policy shared by embedding and LLM calls.
//!
//! A [`RetryPolicy`] bounds the number of attempts, spaces them with capped
//! exponential backoff plus jitter, and retries only errors for which
//! [`RagError::is_transient`] holds. Every attempt runs under its own
//! deadline; a timed-out attempt counts as a transient failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a policy making at most `max_attempts` calls (minimum one).
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base, cap, jitter: true }
    }

    /// The policy described by `config`.
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.max_retries, config.backoff_base, config.backoff_cap)
    }

    /// Disable jitter so delays are exactly `min(cap, base * 2^n)`.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// With jitter the delay is drawn uniformly from the upper half of the
    /// exponential step, so it never drops below half the nominal value.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        let nominal = self.base.saturating_mul(factor).min(self.cap);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let nanos = u64::try_from(nominal.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::thread_rng().gen_range(nanos / 2..=nanos))
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `timeout`. The error of the last attempt is
    /// returned when the policy gives up.
    pub async fn run<T, F, Fut>(&self, operation: &str, timeout: Duration, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    Err(RagError::Timeout { operation: operation.to_string(), after: timeout })
                }
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let transient = e.is_transient();
                    warn!(operation, attempt, transient, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(100), Duration::from_secs(1))
            .without_jitter()
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let p = policy(5);
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(800));
        assert_eq!(p.backoff(4), Duration::from_secs(1));
        assert_eq!(p.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let p = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        for retry in 0..6 {
            let nominal = policy(5).backoff(retry);
            let delay = p.backoff(retry);
            assert!(delay <= nominal && delay >= nominal / 2, "{delay:?} vs {nominal:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy(3)
            .run("llm", Duration::from_secs(5), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err(RagError::transient("test", "503")) } else { Ok("done") }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = policy(3)
            .run("llm", Duration::from_secs(5), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RagError::transient("test", "always down")) }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = policy(5)
            .run("llm", Duration::from_secs(5), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RagError::permanent("test", "401 unauthorized")) }
            })
            .await;

        assert!(matches!(result, Err(RagError::Provider { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy(2)
            .run("embed", Duration::from_millis(50), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
