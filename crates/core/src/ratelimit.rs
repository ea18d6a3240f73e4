//! Token bucket rate limiter for per-source admission control.
//!
//! Each source gets its own bucket, created on first reference from the
//! configured rate (or the global default). Buckets refill continuously;
//! `admit` waits until a token is available. Locking is per bucket so a
//! throttled source never stalls admission for the others.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

/// How long a backpressure report halves a source's refill rate.
const BACKPRESSURE_WINDOW: Duration = Duration::from_secs(30);

/// Rate limit status for a source.
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub rate_per_sec: f32,
    pub tokens_available: f32,
    pub throttled: bool,
}

/// Token bucket for a single source.
///
/// Tokens are added at a constant rate and consumed when requests are
/// admitted. The bucket starts full, allowing an initial burst up to
/// capacity.
#[derive(Debug)]
struct TokenBucket {
    /// Max tokens; one second's worth of requests, at least one.
    capacity: f32,
    /// Current available tokens.
    tokens: f32,
    /// Tokens added per second under normal operation.
    refill_rate: f32,
    /// Last refill time.
    last_refill: Instant,
    /// While set, the effective refill rate is halved. Set when the
    /// remote answers 429 so subsequent tasks self-throttle.
    penalty_until: Option<Instant>,
}

impl TokenBucket {
    fn new(rate_per_sec: f32) -> Self {
        let capacity = rate_per_sec.max(1.0);
        Self {
            capacity,
            tokens: capacity, // Start full
            refill_rate: rate_per_sec,
            last_refill: Instant::now(),
            penalty_until: None,
        }
    }

    /// Try to consume a token, refilling first.
    ///
    /// Returns `Err(wait)` with the duration until one token will be
    /// available when the bucket is empty.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let wait_secs = tokens_needed / self.effective_rate();
            Err(Duration::from_secs_f32(wait_secs))
        }
    }

    /// Drop to zero tokens and halve the refill rate for a window.
    fn apply_backpressure(&mut self) {
        self.refill();
        self.tokens = 0.0;
        self.penalty_until = Some(Instant::now() + BACKPRESSURE_WINDOW);
    }

    fn effective_rate(&self) -> f32 {
        match self.penalty_until {
            Some(until) if Instant::now() < until => self.refill_rate * 0.5,
            _ => self.refill_rate,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.effective_rate()).min(self.capacity);
        self.last_refill = now;
        if let Some(until) = self.penalty_until {
            if now >= until {
                self.penalty_until = None;
            }
        }
    }

    fn status(&mut self) -> RateLimitStatus {
        self.refill();
        RateLimitStatus {
            rate_per_sec: self.refill_rate,
            tokens_available: self.tokens,
            throttled: self.penalty_until.is_some(),
        }
    }
}

/// Per-source rate limiter shared by all workers.
pub struct RateLimiter {
    /// Configured rates by source name; sources not listed here use
    /// `default_rate`.
    configured: HashMap<String, f32>,
    default_rate: f32,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(configured: HashMap<String, f32>, default_rate: f32) -> Self {
        Self {
            configured,
            default_rate,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Wait until a token is available for the source, then consume it.
    ///
    /// Only the calling worker waits; workers admitting against other
    /// sources are unaffected. Callers racing for the last token of a
    /// refill window loop back around and wait for the next one.
    pub async fn admit(&self, source: &str) {
        let bucket = self.bucket(source).await;
        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                match bucket.try_acquire() {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            sleep(wait).await;
        }
    }

    /// Non-waiting variant; true when a token was consumed.
    pub async fn try_admit(&self, source: &str) -> bool {
        let bucket = self.bucket(source).await;
        let mut bucket = bucket.lock().await;
        bucket.try_acquire().is_ok()
    }

    /// Report remote throttling (HTTP 429) for a source. The bucket
    /// empties and refills at half rate for a window.
    pub async fn apply_backpressure(&self, source: &str) {
        let bucket = self.bucket(source).await;
        bucket.lock().await.apply_backpressure();
    }

    /// Current status for a source, if its bucket exists yet.
    pub async fn status(&self, source: &str) -> Option<RateLimitStatus> {
        let buckets = self.buckets.read().await;
        match buckets.get(source) {
            Some(bucket) => Some(bucket.lock().await.status()),
            None => None,
        }
    }

    /// Get or create the bucket for a source.
    async fn bucket(&self, source: &str) -> Arc<Mutex<TokenBucket>> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(source) {
                return Arc::clone(bucket);
            }
        }

        let rate = self
            .configured
            .get(source)
            .copied()
            .unwrap_or(self.default_rate);

        let mut buckets = self.buckets.write().await;
        Arc::clone(
            buckets
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(rate)))),
        )
    }
}
