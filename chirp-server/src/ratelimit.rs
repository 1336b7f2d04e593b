//! Per-user throttling of verification attempts.
//!
//! Token bucket keyed by `user_id`: a short burst is allowed, then attempts
//! refill at a slow sustained rate. Six-digit codes are cheap to guess, so
//! the bucket is what bounds brute force.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity
    pub burst: u32,
    /// Attempts refilled per second
    pub refill_rate: f64,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 5,
            refill_rate: 0.2,
            enabled: true,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, config: &RateLimitConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate).min(config.burst as f64);
        self.last_refill = now;
    }

    fn wait_for_next(&self, config: &RateLimitConfig) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if config.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / config.refill_rate)
            .unwrap_or(Duration::MAX)
    }
}

/// Shared limiter; clones see the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spend one attempt for `user_id`, or report how long to wait.
    pub fn check(&self, user_id: &str) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(user_id.to_string())
            .or_insert_with(|| Bucket::full(self.config.burst));
        bucket.refill(&self.config);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(bucket.wait_for_next(&self.config))
        }
    }

    /// Forget buckets idle for longer than `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, "dropped idle rate-limit buckets");
        }
    }

    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Run [`RateLimiter::cleanup`] every `every` on the current runtime.
    pub fn spawn_cleanup(&self, every: Duration, max_age: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                limiter.cleanup(max_age);
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Whole seconds for a `Retry-After` header, at least 1.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait
        .as_secs()
        .saturating_add(u64::from(wait.subsec_nanos() > 0));
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: u32, refill_rate: f64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            burst,
            refill_rate,
            enabled: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited() {
        let limiter = limiter(3, 1.0);

        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_ok());

        let wait = limiter.check("u1").unwrap_err();
        assert_eq!(retry_after_secs(wait), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_users_have_separate_buckets() {
        let limiter = limiter(1, 0.1);

        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u2").is_ok());
        assert!(limiter.check("u1").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = limiter(1, 0.5);

        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.check("u1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 1,
            refill_rate: 0.0,
            enabled: false,
        });

        for _ in 0..100 {
            assert!(limiter.check("u1").is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_idle_buckets() {
        let limiter = limiter(2, 1.0);
        limiter.check("u1").unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.check("u2").unwrap();

        limiter.cleanup(Duration::from_secs(60));

        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(4100)), 5);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_without_refill_reports_longest_wait() {
        let limiter = limiter(1, 0.0);

        assert!(limiter.check("u1").is_ok());
        let wait = limiter.check("u1").unwrap_err();

        assert_eq!(wait, Duration::MAX);
        assert_eq!(retry_after_secs(wait), u64::MAX);
    }
}
