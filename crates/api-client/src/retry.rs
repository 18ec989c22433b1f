//! Transient retry policy with exponential backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{classify, ErrorKind, FailedAttempt};

/// Predicate deciding whether a failed attempt may be replayed.
pub type RetryCondition = Arc<dyn Fn(&FailedAttempt) -> bool + Send + Sync>;

/// Configuration for retry behavior. Immutable once handed to a client.
#[derive(Clone)]
pub struct RetryConfig {
    /// Maximum number of transient replays per logical request.
    pub max_retries: u32,
    /// Delay before the first replay; doubled for each following one.
    pub base_delay: Duration,
    /// Which failures are considered transient.
    pub retry_condition: RetryCondition,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            retry_condition: Arc::new(default_retry_condition),
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of replays.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Replace the retry predicate.
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&FailedAttempt) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Evaluate the configured predicate.
    pub fn should_retry(&self, attempt: &FailedAttempt) -> bool {
        (self.retry_condition)(attempt)
    }

    /// Wait before the replay that follows `retries_so_far` earlier replays:
    /// `base_delay * 2^retries_so_far`.
    pub fn backoff_delay(&self, retries_so_far: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries_so_far);
        self.base_delay.saturating_mul(factor)
    }
}

/// Default predicate: network failures, timeouts and 502/503/504.
///
/// A bare 500 is not retried; it usually signals a deterministic server bug.
pub fn default_retry_condition(attempt: &FailedAttempt) -> bool {
    match classify(attempt) {
        ErrorKind::NetworkError | ErrorKind::Timeout => true,
        ErrorKind::ServerError => attempt.status() != Some(500),
        _ => false,
    }
}

/// Per-client retry bookkeeping: correlation id to replays taken so far.
///
/// Entries are created on the first replay of a request and removed on its
/// success or final failure. The lock is never held across an await.
#[derive(Debug, Default)]
pub(crate) struct RetryLedger {
    counts: Mutex<HashMap<String, u32>>,
}

impl RetryLedger {
    fn counts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve the next replay for `request_id`.
    ///
    /// Returns the number of replays taken before this one, or `None` once
    /// `max_retries` is reached. Read and increment happen under one lock.
    pub(crate) fn reserve(&self, request_id: &str, max_retries: u32) -> Option<u32> {
        let mut counts = self.counts();
        let current = counts.get(request_id).copied().unwrap_or(0);
        if current >= max_retries {
            return None;
        }
        counts.insert(request_id.to_string(), current + 1);
        Some(current)
    }

    /// Drop the entry for `request_id`.
    pub(crate) fn clear(&self, request_id: &str) {
        self.counts().remove(request_id);
    }

    /// Replays recorded for `request_id`.
    #[cfg(test)]
    pub(crate) fn count(&self, request_id: &str) -> u32 {
        self.counts().get(request_id).copied().unwrap_or(0)
    }

    /// Number of requests with live bookkeeping.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.counts().len()
    }
}
