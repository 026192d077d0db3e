//! Error types for the bojstat engine.
//!
//! Every failure surfaced by the library is a [`BojError`]. Variants map
//! one-to-one onto the engine's failure classes: API-body errors (the BOJ
//! service reports errors in the body `STATUS`, not the HTTP status line),
//! transport failures, client-side validation, and engine-detected hazards
//! such as pagination stalls or consistency violations.

use serde::{Deserialize, Serialize};

/// Structured payload attached to API-body errors.
///
/// `status` is the in-body `STATUS` field, which governs classification even
/// when the HTTP status line disagrees. `raw_response` is only populated when
/// the client was configured with `capture_full_response`.
#[derive(Debug, Clone)]
pub struct ApiFault {
    /// In-body STATUS (None when the body could not be parsed at all)
    pub status: Option<u16>,
    /// MESSAGEID reported by the server, or `UNPARSEABLE_RESPONSE`
    pub message_id: String,
    /// Human-readable server message
    pub message: String,
    /// Fully resolved request URL
    pub request_url: String,
    /// First bytes of the body, for diagnostics
    pub raw_response_excerpt: String,
    /// Complete body, when capture is enabled
    pub raw_response: Option<String>,
}

/// Where an error originated, mirroring the engine's propagation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// The server reported the failure in its response body
    ServerResponse,
    /// The HTTP layer failed before a body could be classified
    Transport,
    /// Rejected before any request was issued
    ClientValidation,
    /// Detected by the pagination/consistency engine itself
    Engine,
}

/// Classification of transport-level failures.
///
/// Retriability follows the failure class, not the underlying library error:
/// timeouts and connection resets are transient, while a malformed URL or an
/// untrusted certificate will not improve on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Connect/read/overall timeout
    Timeout,
    /// Connection could not be established
    Connect,
    /// The connection dropped while reading the body
    Read,
    /// The peer violated the HTTP protocol
    RemoteProtocol,
    /// The request URL could not be constructed
    InvalidUrl,
    /// Local request construction or protocol error
    LocalProtocol,
    /// TLS certificate or trust failure
    TlsTrust,
}

impl TransportKind {
    /// Whether the retry controller may re-issue a request after this failure.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransportKind::Timeout
                | TransportKind::Connect
                | TransportKind::Read
                | TransportKind::RemoteProtocol
        )
    }

    /// Stable label used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Timeout => "timeout",
            TransportKind::Connect => "connect",
            TransportKind::Read => "read",
            TransportKind::RemoteProtocol => "remote-protocol",
            TransportKind::InvalidUrl => "invalid-url",
            TransportKind::LocalProtocol => "local-protocol",
            TransportKind::TlsTrust => "tls-trust",
        }
    }
}

/// Machine-readable reason for rejecting a resume token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMismatchReason {
    /// The token was minted for a different request
    FingerprintMismatch,
    /// The chunk index is out of range for the current plan
    ChunkIndexMismatch,
    /// The token format version is unsupported
    TokenVersionMismatch,
    /// The token was minted by a different parser version
    ParserVersionMismatch,
    /// The token was minted by a different normalizer version
    NormalizerVersionMismatch,
}

impl ResumeMismatchReason {
    /// Stable label matching the token verification contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeMismatchReason::FingerprintMismatch => "fingerprint_mismatch",
            ResumeMismatchReason::ChunkIndexMismatch => "chunk_index_mismatch",
            ResumeMismatchReason::TokenVersionMismatch => "token_version_mismatch",
            ResumeMismatchReason::ParserVersionMismatch => "parser_version_mismatch",
            ResumeMismatchReason::NormalizerVersionMismatch => "normalizer_version_mismatch",
        }
    }
}

/// Unified error type for all bojstat operations.
#[derive(Debug, thiserror::Error)]
pub enum BojError {
    /// In-body STATUS=400; the request was rejected by the API
    #[error("bad request ({}): {}", .0.message_id, .0.message)]
    BadRequest(ApiFault),

    /// In-body STATUS=500; retried until exhaustion before surfacing
    #[error("server error ({}): {}", .0.message_id, .0.message)]
    ServerError(ApiFault),

    /// In-body STATUS=503; retried until exhaustion before surfacing
    #[error("service unavailable ({}): {}", .0.message_id, .0.message)]
    Unavailable(ApiFault),

    /// The body could not be parsed (upstream gateway or proxy response)
    #[error("unparseable response (http status {:?})", .0.status)]
    Gateway(ApiFault),

    /// Any other non-200 in-body STATUS
    #[error("api error ({}): {}", .0.message_id, .0.message)]
    Api(ApiFault),

    /// HTTP-level failure before a body could be classified
    #[error("transport error ({}): {message}", kind.as_str())]
    Transport {
        /// Request URL, when known
        url: Option<String>,
        /// Failure class driving retriability
        kind: TransportKind,
        /// Underlying error description
        message: String,
    },

    /// Input rejected before any request was issued
    #[error("validation failed ({code}): {message}")]
    Validation {
        /// Stable machine-readable code
        code: &'static str,
        /// Human-readable description
        message: String,
    },

    /// A DATE field could not be interpreted under strict freshness checking
    #[error("unparseable DATE value: {raw}")]
    DateParse {
        /// The raw DATE string as received
        raw: String,
    },

    /// Strict consistency mode detected an update hazard mid-pagination
    #[error("consistency violation: {signal}")]
    Consistency {
        /// `window_crossed` or `last_update_conflict`
        signal: String,
        /// Structured evidence for the signal
        details: serde_json::Value,
    },

    /// The server returned a NEXTPOSITION that does not advance the cursor
    #[error(
        "pagination stalled in chunk {chunk_index}: start={start}, next={next_position}"
    )]
    PaginationStalled {
        /// Chunk whose cursor stalled
        chunk_index: usize,
        /// Cursor position when the stall was observed
        start: u64,
        /// The non-advancing NEXTPOSITION from the server
        next_position: u64,
    },

    /// A resume token failed verification against the current request
    #[error("resume token rejected: {}", reason.as_str())]
    ResumeTokenMismatch {
        /// Which verification check failed
        reason: ResumeMismatchReason,
    },

    /// A layer query matched more series than a single request can return
    #[error(
        "layer query matched {row_count} series (ceiling {ceiling}); subdivide the layer path"
    )]
    LayerOverflow {
        /// Number of series rows observed
        row_count: usize,
        /// Documented per-request ceiling
        ceiling: usize,
    },

    /// The caller cancelled the operation at a suspension point
    #[error("operation cancelled")]
    Cancelled,

    /// Cache file I/O failed in a way that cannot be quarantined away
    #[error("cache I/O failed: {0}")]
    Cache(String),
}

impl BojError {
    /// The propagation origin of this error.
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            BojError::BadRequest(_)
            | BojError::ServerError(_)
            | BojError::Unavailable(_)
            | BojError::Gateway(_)
            | BojError::Api(_) => ErrorOrigin::ServerResponse,
            BojError::Transport { .. } | BojError::Cancelled => ErrorOrigin::Transport,
            BojError::Validation { .. }
            | BojError::DateParse { .. }
            | BojError::ResumeTokenMismatch { .. } => ErrorOrigin::ClientValidation,
            BojError::Consistency { .. }
            | BojError::PaginationStalled { .. }
            | BojError::LayerOverflow { .. }
            | BojError::Cache(_) => ErrorOrigin::Engine,
        }
    }

    /// Shorthand constructor for validation failures.
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        BojError::Validation {
            code,
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type BojResult<T> = Result<T, BojError>;
