//! Retry classification and wait-time computation.
//!
//! The controller works from three inputs per attempt: a transport failure
//! kind, the parsed in-body STATUS, or the raw HTTP status plus headers.
//! The in-body STATUS always wins when the body parsed; the HTTP status only
//! matters for throttling (429), forbidden (403), and unparseable bodies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryConfig;

/// Why a particular wait duration was chosen, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSource {
    /// The server's Retry-After header dominated
    RetryAfter,
    /// The local rate limiter's pending interval dominated
    LocalRate,
    /// Exponential backoff dominated
    Backoff,
}

impl WaitSource {
    /// Stable label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitSource::RetryAfter => "retry_after",
            WaitSource::LocalRate => "local_rate",
            WaitSource::Backoff => "backoff",
        }
    }
}

/// A resolved wait: how long, and which input decided it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitDecision {
    /// Duration to sleep before the next attempt
    pub duration: Duration,
    /// Dominating input
    pub source: WaitSource,
}

/// Sample a full-jitter backoff wait for the given 0-based attempt.
///
/// `uniform(0, min(cap, base * 2^attempt)) * jitter_ratio`
pub fn full_jitter_backoff<R: Rng + ?Sized>(
    rng: &mut R,
    attempt: u32,
    config: &RetryConfig,
) -> Duration {
    let exponential = config.base_delay * 2f64.powi(attempt.min(32) as i32);
    let upper = config.cap_delay.min(exponential).max(0.0);
    let sampled = if upper > 0.0 {
        rng.gen_range(0.0..=upper)
    } else {
        0.0
    };
    Duration::from_secs_f64((sampled * config.jitter_ratio.max(0.0)).max(0.0))
}

/// Parse a Retry-After header: either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let text = value?.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().all(|ch| ch.is_ascii_digit()) {
        return text.parse::<u64>().ok().map(Duration::from_secs);
    }
    let at = DateTime::parse_from_rfc2822(text).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    delta.to_std().ok()
}

/// Combine the three wait inputs; the largest wins and is recorded.
pub fn decide_wait(
    retry_after: Option<Duration>,
    local_rate_remaining: Duration,
    backoff: Duration,
) -> WaitDecision {
    let mut decision = WaitDecision {
        duration: backoff,
        source: WaitSource::Backoff,
    };
    if local_rate_remaining > decision.duration {
        decision = WaitDecision {
            duration: local_rate_remaining,
            source: WaitSource::LocalRate,
        };
    }
    if let Some(retry_after) = retry_after {
        if retry_after >= decision.duration {
            decision = WaitDecision {
                duration: retry_after,
                source: WaitSource::RetryAfter,
            };
        }
    }
    decision
}

/// Whether a parsed in-body STATUS is retriable.
pub fn body_status_retriable(status: u16) -> bool {
    matches!(status, 500 | 503)
}

/// Whether a raw HTTP status is retriable, independent of the body.
pub fn http_status_retriable(
    status: u16,
    retry_on_403: bool,
    has_retry_after: bool,
) -> bool {
    match status {
        429 | 500 | 503 => true,
        403 => retry_on_403 && has_retry_after,
        _ => false,
    }
}
