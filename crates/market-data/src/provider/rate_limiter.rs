//! Token bucket rate limiter for upstream calls.
//!
//! One bucket per engine, shared by every upstream call. The bucket starts
//! full so a cold start can fetch the quote universe and a handful of series
//! without waiting.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// Largest burst a bucket allows, whatever the per-minute rate.
const MAX_BURST_CAPACITY: f64 = 10.0;

#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    last_update: Instant,
    /// Tokens per second.
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    fn new(requests_per_minute: u32, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: requests_per_minute as f64 / 60.0,
            capacity,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

/// Thread-safe token bucket.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    requests_per_minute: u32,
}

impl RateLimiter {
    /// Limiter allowing `requests_per_minute` calls per minute on average.
    ///
    /// The burst capacity is the per-minute rate, capped at 10. A rate of 0 is
    /// treated as 1.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let capacity = (requests_per_minute as f64).min(MAX_BURST_CAPACITY);
        Self::with_capacity(requests_per_minute, capacity)
    }

    /// Limiter with an explicit burst capacity (at least one token).
    pub fn with_capacity(requests_per_minute: u32, capacity: f64) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        Self {
            bucket: Mutex::new(TokenBucket::new(requests_per_minute, capacity.max(1.0))),
            requests_per_minute,
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Lock the bucket, recovering from poison if necessary.
    ///
    /// The worst case after a poisoned lock is a slightly wrong token count.
    fn lock_bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Wait (asynchronously) until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait_time = {
                let mut bucket = self.lock_bucket();
                if bucket.try_acquire() {
                    return;
                }
                bucket.time_until_available()
            };

            if wait_time > Duration::ZERO {
                debug!("Rate limiter: waiting {:?} for a token", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
    }

    /// Take a token without waiting; false when rate limited.
    pub fn try_acquire(&self) -> bool {
        self.lock_bucket().try_acquire()
    }

    pub fn remaining_tokens(&self) -> f64 {
        let mut bucket = self.lock_bucket();
        bucket.refill();
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_drains_then_refills() {
        let mut bucket = TokenBucket::new(60, 1.0); // 1 token/second

        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        bucket.last_update = Instant::now() - Duration::from_secs(2);
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_burst_capacity_follows_rate() {
        let limiter = RateLimiter::per_minute(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        let generous = RateLimiter::per_minute(600);
        let mut granted = 0;
        while generous.try_acquire() {
            granted += 1;
        }
        assert_eq!(granted, MAX_BURST_CAPACITY as usize);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = RateLimiter::per_minute(0);
        assert_eq!(limiter.requests_per_minute(), 1);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_remaining_tokens() {
        let limiter = RateLimiter::with_capacity(60, 4.0);
        limiter.try_acquire();
        limiter.try_acquire();

        assert!((limiter.remaining_tokens() - 2.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_async_acquire_waits_for_refill() {
        let limiter = RateLimiter::with_capacity(6000, 2.0); // 100/second

        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed().as_millis() >= 5);
    }
}
