//! Minimum-interval rate limiting.
//!
//! The BOJ API asks clients to keep request rates modest; the engine
//! enforces a single minimum inter-request interval across every caller of
//! a client, in both the async and blocking entry points. One timestamp
//! guarded by one async mutex: waiters queue on the lock in FIFO order and
//! each departs no earlier than `1/rate` after the previous departure.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Process-shared minimum-interval limiter.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    // Earliest instant the next request may depart.
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `rate_per_sec` requests per second.
    ///
    /// A non-positive rate disables limiting.
    pub fn new(rate_per_sec: f64) -> Self {
        let min_interval = if rate_per_sec > 0.0 {
            Duration::from_secs_f64(1.0 / rate_per_sec)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Block until the minimum interval since the previous admission has
    /// elapsed. Returns the duration actually waited.
    pub async fn acquire(&self) -> Duration {
        if self.min_interval.is_zero() {
            return Duration::ZERO;
        }
        // The sleep happens while holding the lock: the tokio mutex hands
        // the lock to waiters in FIFO order, which is exactly the fairness
        // contract.
        let mut next_allowed = self.next_allowed.lock().await;
        let now = Instant::now();
        let wait = match *next_allowed {
            Some(at) if at > now => at - now,
            _ => Duration::ZERO,
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }
        *next_allowed = Some(Instant::now() + self.min_interval);
        wait
    }

    /// How long `acquire` would wait right now, without reserving a slot.
    pub async fn remaining(&self) -> Duration {
        if self.min_interval.is_zero() {
            return Duration::ZERO;
        }
        let next_allowed = self.next_allowed.lock().await;
        match *next_allowed {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// The configured minimum inter-request interval.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
