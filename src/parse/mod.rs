//! Response body decoding and parsing.
//!
//! Decoding rules: JSON bodies are always UTF-8; CSV bodies are Shift-JIS
//! when `LANG=JP` and UTF-8 when `LANG=EN`; error responses are always JSON
//! regardless of the requested format, so bodies are sniffed before the
//! requested format is trusted.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use encoding_rs::SHIFT_JIS;

use crate::{Format, Lang};

mod csv;
mod json;

pub use self::csv::parse_csv_response;
pub use self::json::parse_json_response;

/// How many body bytes are retained in excerpts for diagnostics.
pub const EXCERPT_LIMIT: usize = 2048;

/// A structurally parsed response, before record normalization.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// In-body STATUS
    pub status: u16,
    /// In-body MESSAGEID
    pub message_id: String,
    /// In-body MESSAGE
    pub message: String,
    /// Raw DATE string
    pub date_raw: Option<String>,
    /// Parsed DATE, when interpretable
    pub date_parsed: Option<DateTime<FixedOffset>>,
    /// Set when DATE was present but unparseable
    pub date_parse_warning: Option<String>,
    /// PARAMETER echo from the server
    pub parameters: BTreeMap<String, Option<String>>,
    /// NEXTPOSITION cursor, absent on the final page
    pub next_position: Option<u64>,
    /// Data rows, key-normalized lazily by the record normalizer
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// DB echo (metadata responses)
    pub db: Option<String>,
    /// Leading bytes of the decoded body
    pub raw_response_excerpt: String,
    /// Format the body actually was
    pub format: Format,
}

/// Error raised when a body cannot be parsed in any supported shape.
#[derive(Debug, thiserror::Error)]
#[error("response body is not parseable: {0}")]
pub struct ParseFailure(pub String);

/// Decode response bytes per the language's encoding convention.
pub fn decode_response_bytes(payload: &[u8], lang: Lang) -> String {
    match lang {
        Lang::Jp => {
            let (decoded, _, had_errors) = SHIFT_JIS.decode(payload);
            if had_errors {
                String::from_utf8_lossy(payload).into_owned()
            } else {
                decoded.into_owned()
            }
        }
        Lang::En => String::from_utf8_lossy(payload).into_owned(),
    }
}

/// Parse a response body, sniffing JSON error bodies under a CSV request.
pub fn parse_response(
    payload: &[u8],
    requested_format: Format,
    lang: Lang,
) -> Result<ParsedResponse, ParseFailure> {
    let utf8_text = String::from_utf8_lossy(payload);
    if utf8_text.trim_start().starts_with('{') {
        return parse_json_response(utf8_text.trim());
    }
    if requested_format == Format::Json {
        return parse_json_response(utf8_text.trim());
    }
    let decoded = decode_response_bytes(payload, lang);
    parse_csv_response(&decoded)
}

/// Truncate a body to the diagnostic excerpt size at a char boundary.
pub(crate) fn excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_LIMIT {
        return text.to_string();
    }
    let mut end = EXCERPT_LIMIT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
