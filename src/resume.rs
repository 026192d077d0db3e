//! Request fingerprints and resume tokens.
//!
//! A fingerprint is a SHA-256 digest over every parameter that semantically
//! affects a result, so equality of fingerprints means "same record set,
//! modulo server-side updates". A resume token is a URL-safe, versioned
//! continuation carrying the fingerprint plus the pager position; a token
//! may continue execution only when every versioned field matches the
//! current request.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::TOKEN_VERSION;
use crate::error::{BojError, BojResult, ResumeMismatchReason};

/// Decoded continuation state carried by a resume token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeTokenState {
    /// Token format version
    pub token_version: u32,
    /// Originating endpoint: `code` or `layer`
    pub api: String,
    /// API origin the token was minted against
    pub api_origin: String,
    /// Fingerprint of the originating request
    pub request_fingerprint: String,
    /// Chunk to resume from
    pub chunk_index: usize,
    /// STARTPOSITION to resume from within that chunk
    pub next_position: u64,
    /// Request language
    pub lang: String,
    /// Request format
    pub format: String,
    /// Parser version at mint time
    pub parser_version: String,
    /// Normalizer version at mint time
    pub normalizer_version: String,
    /// Schema version at mint time
    pub schema_version: String,
    /// Original code order, for restoring `original_code_index`
    pub code_order_map: BTreeMap<String, usize>,
}

/// Digest request components into a canonical fingerprint.
///
/// `BTreeMap` keys iterate sorted, so the JSON encoding is deterministic
/// under key reordering; values must already be canonical (see
/// [`crate::validation::canonical_params`] for raw parameters).
pub fn build_request_fingerprint(components: &BTreeMap<String, serde_json::Value>) -> String {
    let serialized =
        serde_json::to_string(components).unwrap_or_else(|_| String::from("{}"));
    let digest = Sha256::digest(serialized.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Encode a token state into its textual, URL-safe form.
pub fn encode_resume_token(state: &ResumeTokenState) -> String {
    let raw = serde_json::to_vec(state).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decode a textual token; undecodable tokens are a validation error.
pub fn decode_resume_token(token: &str) -> BojResult<ResumeTokenState> {
    let raw = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| {
        BojError::validation("resume_token_undecodable", "resume token is not valid base64")
    })?;
    serde_json::from_slice(&raw).map_err(|_| {
        BojError::validation(
            "resume_token_undecodable",
            "resume token payload does not decode",
        )
    })
}

/// Mint a token for the given continuation point.
#[allow(clippy::too_many_arguments)]
pub fn create_resume_token(
    api: &str,
    api_origin: &str,
    request_fingerprint: &str,
    chunk_index: usize,
    next_position: u64,
    lang: &str,
    format: &str,
    parser_version: &str,
    normalizer_version: &str,
    schema_version: &str,
    code_order_map: &BTreeMap<String, usize>,
) -> String {
    encode_resume_token(&ResumeTokenState {
        token_version: TOKEN_VERSION,
        api: api.to_string(),
        api_origin: api_origin.to_string(),
        request_fingerprint: request_fingerprint.to_string(),
        chunk_index,
        next_position,
        lang: lang.to_string(),
        format: format.to_string(),
        parser_version: parser_version.to_string(),
        normalizer_version: normalizer_version.to_string(),
        schema_version: schema_version.to_string(),
        code_order_map: code_order_map.clone(),
    })
}

/// Verify a decoded token against the current request.
///
/// Checks run in contract order: token version, parser version, normalizer
/// version, fingerprint, chunk-index plausibility, then api/origin (which
/// also participate in the fingerprint, so their mismatch reports as a
/// fingerprint mismatch).
pub fn validate_resume_token(
    state: &ResumeTokenState,
    request_fingerprint: &str,
    chunk_count: usize,
    api: &str,
    api_origin: &str,
    parser_version: &str,
    normalizer_version: &str,
) -> BojResult<()> {
    if state.token_version != TOKEN_VERSION {
        return Err(BojError::ResumeTokenMismatch {
            reason: ResumeMismatchReason::TokenVersionMismatch,
        });
    }
    if state.parser_version != parser_version {
        return Err(BojError::ResumeTokenMismatch {
            reason: ResumeMismatchReason::ParserVersionMismatch,
        });
    }
    if state.normalizer_version != normalizer_version {
        return Err(BojError::ResumeTokenMismatch {
            reason: ResumeMismatchReason::NormalizerVersionMismatch,
        });
    }
    if state.request_fingerprint != request_fingerprint {
        return Err(BojError::ResumeTokenMismatch {
            reason: ResumeMismatchReason::FingerprintMismatch,
        });
    }
    if state.chunk_index >= chunk_count.max(1) {
        return Err(BojError::ResumeTokenMismatch {
            reason: ResumeMismatchReason::ChunkIndexMismatch,
        });
    }
    if state.api != api || state.api_origin != api_origin {
        return Err(BojError::ResumeTokenMismatch {
            reason: ResumeMismatchReason::FingerprintMismatch,
        });
    }
    Ok(())
}
