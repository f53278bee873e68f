//! Requeue rate limiting.
//!
//! Failed keys are delayed by the larger of a per-key exponential backoff
//! and a shared token bucket, so one hot key backs off on its own while a
//! burst of failures across many keys is throttled as a whole.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshplace_core::config::QueueConfig;
use parking_lot::Mutex;

pub trait RateLimiter: Send + Sync {
    /// Delay before `key` may be processed again. Counts as one failure.
    fn when(&self, key: &str) -> Duration;
    /// Clear the failure history for `key`.
    fn forget(&self, key: &str);
    /// Failures recorded for `key` since the last `forget`.
    fn retries(&self, key: &str) -> u32;
}

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponentialLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemExponentialLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ItemExponentialLimiter {
    fn when(&self, key: &str) -> Duration {
        let exp = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.to_string()).or_insert(0);
            let exp = *count;
            *count = count.saturating_add(1);
            exp
        };
        let nanos = self
            .base
            .as_nanos()
            .saturating_mul(1u128 << exp.min(64))
            .min(self.max.as_nanos());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    fn retries(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Shared token bucket refilled at `qps`, holding at most `burst` tokens.
/// Each call reserves a token; when none is left the caller waits for the
/// refill.
pub struct TokenBucketLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

/// Longest wait the token bucket hands out, however slow its refill.
pub const MAX_BUCKET_WAIT: Duration = Duration::from_secs(1_000);

impl TokenBucketLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: if qps.is_finite() { qps.max(f64::MIN_POSITIVE) } else { f64::MIN_POSITIVE },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps)
                .map_or(MAX_BUCKET_WAIT, |wait| wait.min(MAX_BUCKET_WAIT))
        }
    }

    fn forget(&self, _key: &str) {}

    fn retries(&self, _key: &str) -> u32 {
        0
    }
}

/// Longest delay among several limiters.
pub struct MaxOfLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfLimiter {
    fn when(&self, key: &str) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &str) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn retries(&self, key: &str) -> u32 {
        self.limiters.iter().map(|l| l.retries(key)).max().unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with a global token bucket.
pub fn controller_rate_limiter(config: &QueueConfig) -> MaxOfLimiter {
    MaxOfLimiter::new(vec![
        Box::new(ItemExponentialLimiter::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )),
        Box::new(TokenBucketLimiter::new(config.qps, config.burst)),
    ])
}
