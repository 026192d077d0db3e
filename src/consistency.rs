//! Consistency detection across pages of one call.
//!
//! Long paginations can straddle the server's daily publish window, during
//! which the underlying data may be refreshed. Two signals are watched:
//!
//! 1. `window_crossed` — page DATE values fall on opposite sides of the
//!    publish-window boundary, so early and late pages may disagree.
//! 2. `last_update_conflict` — two rows share a dedup key but differ in
//!    `LAST_UPDATE` (detected by the record accumulator, recorded here).
//!
//! Under strict policy a signal fails the call; under best-effort it is
//! recorded into the result meta and conflicts are resolved.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::PublishWindow;

/// Signal name for a publish-window crossing.
pub const SIGNAL_WINDOW_CROSSED: &str = "window_crossed";

/// Signal name for a LAST_UPDATE conflict.
pub const SIGNAL_LAST_UPDATE_CONFLICT: &str = "last_update_conflict";

/// Evidence for one LAST_UPDATE conflict, kept as a bounded audit sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    /// Series whose rows disagreed
    pub series_code: String,
    /// Observation period whose rows disagreed
    pub survey_date: String,
    /// LAST_UPDATE of the row already held
    pub existing_last_update: Option<String>,
    /// LAST_UPDATE of the arriving row
    pub incoming_last_update: Option<String>,
}

/// Watches page DATE values for publish-window crossings.
#[derive(Debug, Clone)]
pub struct ConsistencyGuard {
    window: PublishWindow,
    first_page_date: Option<DateTime<FixedOffset>>,
    observed_dates: Vec<String>,
    crossed: bool,
}

impl ConsistencyGuard {
    /// Guard against the given publish window.
    pub fn new(window: PublishWindow) -> Self {
        Self {
            window,
            first_page_date: None,
            observed_dates: Vec::new(),
            crossed: false,
        }
    }

    /// Observe one page's parsed DATE.
    ///
    /// Returns `true` the first time a crossing is detected: the first
    /// observed page predates the window while the current page falls
    /// inside it. Pages without a parseable DATE contribute nothing.
    pub fn observe(&mut self, date_parsed: Option<&DateTime<FixedOffset>>) -> bool {
        let Some(current) = date_parsed else {
            return false;
        };
        self.observed_dates.push(current.to_rfc3339());
        match self.first_page_date {
            None => {
                self.first_page_date = Some(*current);
                false
            }
            Some(first) => {
                if !self.crossed && !self.window.contains(&first) && self.window.contains(current) {
                    self.crossed = true;
                    return true;
                }
                false
            }
        }
    }

    /// Whether a crossing has been observed so far.
    pub fn crossed(&self) -> bool {
        self.crossed
    }

    /// Signal name when a crossing was observed.
    pub fn signal(&self) -> Option<&'static str> {
        self.crossed.then_some(SIGNAL_WINDOW_CROSSED)
    }

    /// Structured evidence: every page DATE observed, in arrival order.
    pub fn details(&self) -> serde_json::Value {
        json!({ "pages": self.observed_dates })
    }
}
