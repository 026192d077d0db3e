//! # bojstat
//!
//! Client library for the Bank of Japan "Time-Series Statistical Data"
//! HTTP API (`getDataCode`, `getDataLayer`, `getMetadata`). Turns a
//! validated request into a complete, deduplicated, canonically ordered
//! record set while defending against adversarial server behavior:
//! pagination cursors that stall, HTTP statuses that disagree with the
//! in-body status, and data refreshes that land mid-pagination.
//!
//! ## Features
//!
//! - **Automatic pagination**: distinct cursor disciplines for the Code and
//!   Layer endpoints, with strict monotonic-progress enforcement
//! - **Chunk planning**: large code lists split by inferred frequency into
//!   API-sized sub-requests while preserving input order
//! - **Body-driven retry**: classification keyed on the in-body `STATUS`,
//!   full-jitter backoff, `Retry-After` awareness
//! - **Rate limiting**: one FIFO minimum-interval limiter shared by every
//!   caller of a client
//! - **Consistency guard**: detects publish-window crossings and
//!   `LAST_UPDATE` conflicts across pages; strict and best-effort policies
//! - **Resume tokens**: versioned, fingerprinted continuation tokens that
//!   survive process restarts
//! - **Local cache**: content-addressed file cache with atomic writes and
//!   complete/partial entry isolation
//!
//! ## Quick start
//!
//! ```no_run
//! use bojstat::{BojClient, CodeQuery};
//!
//! # async fn example() -> Result<(), bojstat::BojError> {
//! let client = BojClient::builder().build()?;
//! let frame = client
//!     .data()
//!     .get_data_code(CodeQuery::new("FM08", ["FXERD01"]).period("202401", "202412"))
//!     .await?;
//! for record in &frame.records {
//!     println!("{} {} {:?}", record.series_code, record.survey_date, record.value);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A blocking entry point with the identical engine underneath lives in
//! [`blocking`].

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Blocking client adapter
pub mod blocking;

/// Local response cache
pub mod cache;

/// MESSAGEID classification catalog
pub mod catalog;

/// Async client and builder
pub mod client;

/// Client, retry, and cache configuration
pub mod config;

/// Publish-window and LAST_UPDATE consistency detection
pub mod consistency;

/// Error types
pub mod error;

/// Result frames and response metadata
pub mod models;

/// Response key normalization and record expansion
pub mod normalize;

/// Pagination cursor state machines
pub mod pager;

/// Response body parsers
pub mod parse;

/// Request fingerprints and resume tokens
pub mod resume;

/// Data and metadata services (the pagination driver)
pub mod service;

/// Cancellation signaling
pub mod shutdown;

/// HTTP transport with rate limiting and retry
pub mod transport;

/// Input normalization and chunk planning
pub mod validation;

// Re-export the everyday surface.
pub use client::{BojClient, ClientBuilder};
pub use error::{ApiFault, BojError, BojResult, ErrorOrigin, ResumeMismatchReason, TransportKind};
pub use models::{MetadataFrame, ResponseMeta, TimeSeriesFrame};
pub use service::data::{CodeQuery, LayerQuery};
pub use service::metadata::MetadataQuery;

/// Request language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lang {
    /// Japanese
    #[serde(rename = "JP")]
    Jp,
    /// English
    #[serde(rename = "EN")]
    En,
}

impl Lang {
    /// Wire value for the LANG parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Jp => "JP",
            Lang::En => "EN",
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = BojError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JP" => Ok(Lang::Jp),
            "EN" => Ok(Lang::En),
            _ => Err(BojError::validation("invalid_lang", format!("invalid LANG: {s}"))),
        }
    }
}

/// Response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// JSON body (always UTF-8)
    #[serde(rename = "JSON")]
    Json,
    /// CSV body (Shift-JIS for JP, UTF-8 for EN)
    #[serde(rename = "CSV")]
    Csv,
}

impl Format {
    /// Wire value for the FORMAT parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "JSON",
            Format::Csv => "CSV",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = BojError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JSON" => Ok(Format::Json),
            "CSV" => Ok(Format::Csv),
            _ => Err(BojError::validation(
                "invalid_format",
                format!("invalid FORMAT: {s}"),
            )),
        }
    }
}

/// Observation frequency of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    /// Calendar year
    #[serde(rename = "CY")]
    CalendarYear,
    /// Fiscal year (April–March)
    #[serde(rename = "FY")]
    FiscalYear,
    /// Calendar half-year
    #[serde(rename = "CH")]
    CalendarHalf,
    /// Fiscal half-year
    #[serde(rename = "FH")]
    FiscalHalf,
    /// Quarterly
    #[serde(rename = "Q")]
    Quarterly,
    /// Monthly
    #[serde(rename = "M")]
    Monthly,
    /// Weekly
    #[serde(rename = "W")]
    Weekly,
    /// Daily
    #[serde(rename = "D")]
    Daily,
}

impl Frequency {
    /// Wire value for the FREQUENCY parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::CalendarYear => "CY",
            Frequency::FiscalYear => "FY",
            Frequency::CalendarHalf => "CH",
            Frequency::FiscalHalf => "FH",
            Frequency::Quarterly => "Q",
            Frequency::Monthly => "M",
            Frequency::Weekly => "W",
            Frequency::Daily => "D",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = BojError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CY" => Ok(Frequency::CalendarYear),
            "FY" => Ok(Frequency::FiscalYear),
            "CH" => Ok(Frequency::CalendarHalf),
            "FH" => Ok(Frequency::FiscalHalf),
            "Q" => Ok(Frequency::Quarterly),
            "M" => Ok(Frequency::Monthly),
            "W" => Ok(Frequency::Weekly),
            "D" => Ok(Frequency::Daily),
            _ => Err(BojError::validation(
                "invalid_frequency",
                format!("invalid FREQUENCY: {s}"),
            )),
        }
    }
}

/// Cache lookup mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve fresh entries, refetch stale ones
    IfStale,
    /// Always refetch; the store is still updated
    ForceRefresh,
    /// Bypass the cache entirely
    Off,
}

impl CacheMode {
    /// Stable label used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::IfStale => "if_stale",
            CacheMode::ForceRefresh => "force_refresh",
            CacheMode::Off => "off",
        }
    }
}

/// Behavior when an update hazard is detected mid-pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Fail the call; no record set is returned
    Strict,
    /// Record the signal in result meta and resolve conflicts
    BestEffort,
}

impl ConsistencyMode {
    /// Stable label used in cache keys and fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyMode::Strict => "strict",
            ConsistencyMode::BestEffort => "best_effort",
        }
    }
}

/// Rule for resolving duplicate records whose LAST_UPDATE diverges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the row with the newest LAST_UPDATE; ties broken by page order
    LatestLastUpdate,
}

impl ConflictResolution {
    /// Stable label used in cache keys and fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::LatestLastUpdate => "latest_last_update",
        }
    }
}

/// Ordering of the final record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputOrder {
    /// `(original_code_index, series_code, survey_date, last_update)` ascending
    Canonical,
}

impl OutputOrder {
    /// Stable label used in cache keys and fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputOrder::Canonical => "canonical",
        }
    }
}

/// One normalized observation from the Code or Layer endpoint.
///
/// `value` preserves the exact decimal read from the server; conversion to
/// floats is a caller decision made at export time, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    /// Series code
    pub series_code: String,
    /// Series display name
    pub series_name: Option<String>,
    /// Unit of measure
    pub unit: Option<String>,
    /// Frequency display label as returned by the server
    pub frequency: Option<String>,
    /// Inferred frequency code (CY/FY/CH/FH/Q/M/W/D)
    pub frequency_code: Option<String>,
    /// Weekday anchor for weekly series
    pub week_anchor: Option<String>,
    /// Category name
    pub category: Option<String>,
    /// Last update date (YYYYMMDD)
    pub last_update: Option<String>,
    /// Observation period string
    pub survey_date: String,
    /// Observation value; None for blank fields
    pub value: Option<Decimal>,
    /// Position of this series in the original request code list
    pub original_code_index: Option<usize>,
    /// Page the record arrived on
    pub source_page_index: usize,
    /// Row within that page
    pub source_row_index: usize,
    /// Unrecognized response keys, preserved verbatim
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl TimeSeriesRecord {
    /// Dedup key: `(series_code, survey_date)`.
    pub fn dedup_key(&self) -> (String, String) {
        (self.series_code.clone(), self.survey_date.clone())
    }
}

/// One normalized row from the metadata endpoint.
///
/// Hierarchy-header rows carry an empty `series_code`; every data row has a
/// non-empty one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Series code; empty for hierarchy-header rows
    pub series_code: String,
    /// Series display name
    pub series_name: Option<String>,
    /// Unit of measure
    pub unit: Option<String>,
    /// Frequency display label
    pub frequency: Option<String>,
    /// Category name
    pub category: Option<String>,
    /// Hierarchy level 1
    pub layer1: Option<String>,
    /// Hierarchy level 2
    pub layer2: Option<String>,
    /// Hierarchy level 3
    pub layer3: Option<String>,
    /// Hierarchy level 4
    pub layer4: Option<String>,
    /// Hierarchy level 5
    pub layer5: Option<String>,
    /// First recorded period
    pub start_of_time_series: Option<String>,
    /// Last recorded period
    pub end_of_time_series: Option<String>,
    /// Last update date
    pub last_update: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Unrecognized response keys, preserved verbatim
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}
