//! Fixed-window rate limiting
//!
//! In-process counters keyed by (bucket, client key, window start). The lock
//! only covers the map access; windows align to wall-clock multiples of the
//! window length, so `retry_after` is the remainder of the current window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit exceeded. Retry after {retry_after_seconds}s.")]
pub struct RateLimitExceeded {
    pub retry_after_seconds: u64,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    counts: Mutex<HashMap<(String, String, u64), u32>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempt; reject once `limit` attempts landed in the current
    /// window. A `limit` of 0 disables the bucket.
    pub fn enforce(
        &self,
        bucket: &str,
        key: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<(), RateLimitExceeded> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.enforce_at(now, bucket, key, limit, window_seconds)
    }

    fn enforce_at(
        &self,
        now: u64,
        bucket: &str,
        key: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<(), RateLimitExceeded> {
        if limit == 0 {
            return Ok(());
        }

        let window_start = now - (now % window_seconds);
        let counter_key = (bucket.to_string(), key.to_string(), window_start);

        let mut counts = self.counts.lock().expect("rate limit lock poisoned");
        let current = counts.entry(counter_key).or_insert(0);
        if *current >= limit {
            let retry_after = (window_seconds - (now - window_start)).max(1);
            return Err(RateLimitExceeded { retry_after_seconds: retry_after });
        }
        *current += 1;
        Ok(())
    }

    pub fn clear(&self) {
        self.counts.lock().expect("rate limit lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_limit_plus_one_is_rejected() {
        let limiter = RateLimiter::new();
        let now = 1_000_000;

        for _ in 0..5 {
            limiter.enforce_at(now, "ask", "1.2.3.4", 5, 60).expect("within limit");
        }
        let err = limiter.enforce_at(now, "ask", "1.2.3.4", 5, 60).unwrap_err();
        assert!(err.retry_after_seconds >= 1 && err.retry_after_seconds <= 60);
    }

    #[test]
    fn retry_after_is_the_window_remainder() {
        let limiter = RateLimiter::new();
        // 10 seconds into a 60-second window.
        let now = 1_000_000 - (1_000_000 % 60) + 10;

        limiter.enforce_at(now, "ask", "k", 1, 60).expect("first fits");
        let err = limiter.enforce_at(now, "ask", "k", 1, 60).unwrap_err();
        assert_eq!(err.retry_after_seconds, 50);
    }

    #[test]
    fn windows_reset_the_counter() {
        let limiter = RateLimiter::new();
        let now = 1_000_000 - (1_000_000 % 60);

        limiter.enforce_at(now, "ask", "k", 1, 60).expect("first window");
        assert!(limiter.enforce_at(now, "ask", "k", 1, 60).is_err());
        limiter.enforce_at(now + 60, "ask", "k", 1, 60).expect("next window");
    }

    #[test]
    fn buckets_and_keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = 1_000_000;

        limiter.enforce_at(now, "minute", "k", 1, 60).expect("minute bucket");
        limiter.enforce_at(now, "hour", "k", 1, 3600).expect("hour bucket");
        limiter.enforce_at(now, "minute", "other", 1, 60).expect("other key");
        assert!(limiter.enforce_at(now, "minute", "k", 1, 60).is_err());
    }

    #[test]
    fn zero_limit_disables_the_bucket() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            limiter.enforce_at(123, "ask", "k", 0, 60).expect("no-op");
        }
    }
}
