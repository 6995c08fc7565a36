use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Token-bucket parameters shared by every submitter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum burst size.
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Tokens added per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

fn default_capacity() -> f64 {
    10.0
}
fn default_refill_per_sec() -> f64 {
    1.0
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, config: &AdmissionConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * config.refill_per_sec).min(config.capacity);
        self.last_refill = now;
    }
}

/// Token bucket rate limiter per submitter.
///
/// Refill is computed lazily from elapsed time on each access. Each bucket has
/// its own lock; the outer map lock is only held to look up or insert a bucket.
pub struct RateLimiter {
    config: AdmissionConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Try to consume one token for the given submitter.
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn admit(&self, submitter: &str) -> bool {
        self.admit_at(submitter, Instant::now())
    }

    fn admit_at(&self, submitter: &str, now: Instant) -> bool {
        let bucket = self.bucket(submitter, now);
        let mut bucket = bucket.lock();
        bucket.refill(now, &self.config);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(submitter = %submitter, tokens = bucket.tokens, "Admission denied");
            false
        }
    }

    /// Tokens currently available to the submitter (after refill).
    pub fn available(&self, submitter: &str) -> f64 {
        let now = Instant::now();
        let bucket = self.bucket(submitter, now);
        let mut bucket = bucket.lock();
        bucket.refill(now, &self.config);
        bucket.tokens
    }

    fn bucket(&self, submitter: &str, now: Instant) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(submitter) {
            return bucket.clone();
        }
        self.buckets
            .write()
            .entry(submitter.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: self.config.capacity,
                    last_refill: now,
                }))
            })
            .clone()
    }

    /// Remove buckets with no activity for the given duration.
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.lock().last_refill) < max_idle);
        before - buckets.len()
    }

    /// Number of submitters currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets.read().len()
    }
}
