//! Adaptive pacing for model calls.
//!
//! Every call waits for a governor permit via `until_ready()`, which
//! spaces requests at the configured inter-call delay across all
//! workers. On 429 the quota is atomically swapped to a slower rate;
//! after 60s without another 429 the original rate is restored.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::sync::Arc;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Single rate limiter for the model endpoint with adaptive slowdown.
pub struct AdaptiveLimiter {
    limiter: ArcSwap<DirectLimiter>,
    /// Base period between allowed requests.
    base_period: Duration,
    /// Current slowdown factor (1 = normal, 2 = half rate, ...).
    current_factor: AtomicU32,
    last_429: Mutex<Option<Instant>>,
}

impl AdaptiveLimiter {
    /// Create a limiter with the given period between requests. A zero
    /// period is bumped to 1ms (governor requires a positive quota).
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let quota = Quota::with_period(period).expect("period is positive");
        Self {
            limiter: ArcSwap::from(Arc::new(DirectLimiter::direct(quota))),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: Mutex::new(None),
        }
    }

    /// Wait until the limiter allows the next request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called on a 429 response. Doubles the slowdown factor (capped at
    /// 16x) and swaps in the slower quota.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(16))
            });

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }

    /// Restore the base rate once 60s have passed since the last 429.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= 60))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            let quota = Quota::with_period(self.base_period).expect("base period valid");
            self.limiter.store(Arc::new(DirectLimiter::direct(quota)));
        }
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // Conservative fallback for HTTP-date values.
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}
