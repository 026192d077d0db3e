//! Client, retry, and cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike};

use crate::{CacheMode, ConflictResolution, ConsistencyMode, Format, Lang, OutputOrder};

/// Version of the response parser; participates in fingerprints and tokens.
pub const PARSER_VERSION: &str = "1.0";

/// Version of the record normalizer; participates in fingerprints and tokens.
pub const NORMALIZER_VERSION: &str = "1.0";

/// Version of the result schema; participates in fingerprints and tokens.
pub const SCHEMA_VERSION: &str = "1.0";

/// Resume token format version.
pub const TOKEN_VERSION: u32 = 1;

/// Default API origin.
pub const DEFAULT_BASE_URL: &str = "https://www.stat-search.boj.or.jp/api/v1";

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("bojstat/", env!("CARGO_PKG_VERSION"));

/// Maximum number of series codes per request chunk.
pub const MAX_CODES_PER_CHUNK: usize = 250;

/// JST offset used for all publish-window arithmetic (no DST).
pub fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("JST offset is valid")
}

/// Retry behavior configuration.
///
/// Attempt caps are per failure class: `max_attempts` bounds retries driven
/// by response classification (in-body 500/503, HTTP 429), while
/// `transport_max_attempts` bounds transport exceptions and defaults to
/// `max_attempts` when unset. 403 responses get their own, stricter cap.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts for retriable response classifications
    pub max_attempts: u32,
    /// Maximum attempts for retriable transport failures (None = max_attempts)
    pub transport_max_attempts: Option<u32>,
    /// Base delay in seconds for exponential backoff
    pub base_delay: f64,
    /// Upper bound in seconds on any single backoff wait
    pub cap_delay: f64,
    /// Multiplier applied to the sampled full-jitter wait
    pub jitter_ratio: f64,
    /// Whether HTTP 403 with a Retry-After header may be retried
    pub retry_on_403: bool,
    /// Attempt cap for 403 retries when enabled
    pub retry_on_403_max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            transport_max_attempts: None,
            base_delay: 0.5,
            cap_delay: 8.0,
            jitter_ratio: 1.0,
            retry_on_403: false,
            retry_on_403_max_attempts: 2,
        }
    }
}

impl RetryConfig {
    /// Effective attempt cap for transport exceptions.
    pub fn effective_transport_attempts(&self) -> u32 {
        self.transport_max_attempts
            .unwrap_or(self.max_attempts)
            .max(1)
    }
}

/// The daily server-side refresh window, expressed in JST.
///
/// Data underneath long paginations may change while this window is open;
/// the consistency guard and the metadata staleness rule both key off it.
#[derive(Debug, Clone, Copy)]
pub struct PublishWindow {
    /// Window opening hour (JST)
    pub start_hour: u32,
    /// Window opening minute (JST)
    pub start_minute: u32,
    /// Minutes after opening during which refreshes may still land
    pub grace_minutes: u32,
}

impl Default for PublishWindow {
    fn default() -> Self {
        Self {
            start_hour: 8,
            start_minute: 50,
            grace_minutes: 90,
        }
    }
}

impl PublishWindow {
    /// Whether `at` (converted to JST) falls inside the window.
    pub fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        let local = at.with_timezone(&jst());
        let minute = local.hour() * 60 + local.minute();
        let begin = self.start_hour * 60 + self.start_minute;
        let end = begin + self.grace_minutes;
        minute >= begin && minute <= end
    }

    /// The most recent window opening at or before `now` (JST).
    pub fn latest_start(&self, now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let local = now.with_timezone(&jst());
        let start_today = local
            .date_naive()
            .and_hms_opt(self.start_hour, self.start_minute, 0)
            .and_then(|naive| naive.and_local_timezone(jst()).single());
        match start_today {
            Some(start) if start <= local => start,
            Some(start) => start - chrono::Duration::days(1),
            None => local - chrono::Duration::days(1),
        }
    }
}

/// Local cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lookup mode
    pub mode: CacheMode,
    /// Cache directory; None disables the cache entirely
    pub dir: Option<PathBuf>,
    /// Time-to-live for entries
    pub ttl: Duration,
    /// Publish window used by the metadata staleness override
    pub publish_window: PublishWindow,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::IfStale,
            dir: None,
            ttl: Duration::from_secs(24 * 60 * 60),
            publish_window: PublishWindow::default(),
        }
    }
}

/// Shared configuration for a client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API origin (host + path + version)
    pub base_url: String,
    /// Overall request timeout
    pub timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Default request language
    pub lang: Lang,
    /// Default response format
    pub format: Format,
    /// User-Agent header value
    pub user_agent: String,
    /// Maximum request rate shared across every caller of this client
    pub rate_limit_per_sec: f64,
    /// Pass requests through exactly as given (no chunk planning)
    pub strict_api: bool,
    /// Partition large code lists by inferred frequency and size
    pub auto_split_codes: bool,
    /// Behavior when an update hazard is detected mid-pagination
    pub consistency_mode: ConsistencyMode,
    /// Rule for resolving duplicate records with diverging LAST_UPDATE
    pub conflict_resolution: ConflictResolution,
    /// Ordering of the final record set
    pub output_order: OutputOrder,
    /// Permit raw_params that are not core parameter names
    pub allow_raw_override: bool,
    /// Turn DATE parse warnings into hard errors for metadata calls
    pub metadata_freshness_strict: bool,
    /// Retain the complete response body in API errors
    pub capture_full_response: bool,
    /// Cache settings
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            lang: Lang::Jp,
            format: Format::Json,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit_per_sec: 1.0,
            strict_api: true,
            auto_split_codes: false,
            consistency_mode: ConsistencyMode::Strict,
            conflict_resolution: ConflictResolution::LatestLastUpdate,
            output_order: OutputOrder::Canonical,
            allow_raw_override: false,
            metadata_freshness_strict: false,
            capture_full_response: false,
            cache: CacheConfig::default(),
        }
    }
}
