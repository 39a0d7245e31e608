//! Delay policies for keys that are re-queued after a retriable failure.

use crate::queue::key::TypedKey;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(1000);
pub const DEFAULT_BUCKET_QPS: f64 = 10.0;
pub const DEFAULT_BUCKET_BURST: usize = 100;

/// Decides how long a failed item waits before it is delivered again.
pub trait RateLimiter: Send + Sync {
    /// Returns the delay for the next attempt and records the failure.
    fn when(&self, item: &TypedKey) -> Duration;
    /// Clears any failure history for the item.
    fn forget(&self, item: &TypedKey);
    /// Number of failures recorded for the item since it was last forgotten.
    fn num_requeues(&self, item: &TypedKey) -> usize;
}

/// Per-item exponential backoff: `base * 2^failures`, capped at `max_delay`.
#[derive(Debug)]
pub struct ItemExponentialRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<TypedKey, u32>>,
}

impl ItemExponentialRateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ItemExponentialRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY)
    }
}

impl RateLimiter for ItemExponentialRateLimiter {
    fn when(&self, item: &TypedKey) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = failures.entry(item.clone()).or_insert(0);
            let exponent = *entry;
            *entry = entry.saturating_add(1);
            exponent
        };

        1u32.checked_shl(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn forget(&self, item: &TypedKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(item);
    }

    fn num_requeues(&self, item: &TypedKey) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item)
            .map(|count| *count as usize)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all items; bounds the overall retry rate.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: usize) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            qps: if qps > 0.0 { qps } else { DEFAULT_BUCKET_QPS },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl Default for BucketRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_QPS, DEFAULT_BUCKET_BURST)
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _item: &TypedKey) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.qps).min(self.burst);
        bucket.last_refill = now;

        // Reservations may drive the balance negative; the deficit is the wait.
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _item: &TypedKey) {}

    fn num_requeues(&self, _item: &TypedKey) -> usize {
        0
    }
}

/// Combines several limiters and always applies the longest delay.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, item: &TypedKey) -> Duration {
        // Every member must observe the failure, so no short-circuiting here.
        self.limiters
            .iter()
            .map(|limiter| limiter.when(item))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, item: &TypedKey) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &TypedKey) -> usize {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// Per-item exponential backoff combined with an overall token bucket.
pub fn default_controller_rate_limiter() -> MaxOfRateLimiter {
    controller_rate_limiter(
        DEFAULT_RETRY_BASE_DELAY,
        DEFAULT_RETRY_MAX_DELAY,
        DEFAULT_BUCKET_QPS,
        DEFAULT_BUCKET_BURST,
    )
}

pub fn controller_rate_limiter(
    base_delay: Duration,
    max_delay: Duration,
    qps: f64,
    burst: usize,
) -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialRateLimiter::new(base_delay, max_delay)),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}
