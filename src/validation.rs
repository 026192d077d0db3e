//! Input normalization, outbound text rules, and chunk planning.
//!
//! Everything here runs before a single byte leaves the process. Failures
//! are [`BojError::Validation`] with a stable `validation_code`, so callers
//! can branch without string matching.

use std::collections::BTreeMap;

use crate::config::MAX_CODES_PER_CHUNK;
use crate::error::{BojError, BojResult};
use crate::Frequency;

/// Characters the API rejects anywhere in a parameter value.
const FORBIDDEN_CHARS: [char; 9] = ['<', '>', '"', '!', '|', '\\', '¥', ';', '\''];

/// Parameter names that `raw_params` may never override.
const CORE_PARAM_KEYS: [&str; 9] = [
    "DB",
    "CODE",
    "LAYER",
    "FREQUENCY",
    "STARTDATE",
    "ENDDATE",
    "STARTPOSITION",
    "LANG",
    "FORMAT",
];

/// Reject values containing forbidden or full-width characters.
pub fn validate_outbound_text(value: &str, param_name: &str) -> BojResult<()> {
    if value.chars().any(|ch| FORBIDDEN_CHARS.contains(&ch)) {
        return Err(BojError::validation(
            "forbidden_character",
            format!("{param_name} contains a forbidden character"),
        ));
    }
    if value.chars().any(is_full_width) {
        return Err(BojError::validation(
            "full_width_not_allowed",
            format!("{param_name} must not contain full-width characters"),
        ));
    }
    Ok(())
}

// East-asian wide/fullwidth ranges that matter for parameter values.
fn is_full_width(ch: char) -> bool {
    matches!(ch,
        '\u{1100}'..='\u{115F}'
        | '\u{2E80}'..='\u{303E}'
        | '\u{3041}'..='\u{33FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{A000}'..='\u{A4CF}'
        | '\u{AC00}'..='\u{D7A3}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FE30}'..='\u{FE4F}'
        | '\u{FF00}'..='\u{FF60}'
        | '\u{FFE0}'..='\u{FFE6}'
    )
}

/// Normalize a DB identifier: trim, uppercase, reject empties.
pub fn normalize_db(value: &str) -> BojResult<String> {
    let db = value.trim().to_ascii_uppercase();
    if db.is_empty() {
        return Err(BojError::validation("missing_db", "DB is required"));
    }
    validate_outbound_text(&db, "DB")?;
    Ok(db)
}

/// Normalize a code list: split comma-joined strings, trim, drop empties.
///
/// Order is preserved exactly; duplicates are allowed and pass through.
pub fn normalize_codes<I, S>(codes: I) -> BojResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = Vec::new();
    for item in codes {
        for piece in item.as_ref().split(',') {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                result.push(trimmed.to_string());
            }
        }
    }
    if result.is_empty() {
        return Err(BojError::validation("missing_code", "CODE is required"));
    }
    for code in &result {
        validate_outbound_text(code, "CODE")?;
    }
    Ok(result)
}

/// Normalize a layer path: 1–5 elements, digits or `*`, LAYER1 required.
pub fn normalize_layer<I, S>(layer: I) -> BojResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut values = Vec::new();
    for item in layer {
        for piece in item.as_ref().split(',') {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                values.push(trimmed.to_string());
            }
        }
    }
    if values.is_empty() {
        return Err(BojError::validation("missing_layer", "LAYER is required"));
    }
    if values.len() > 5 {
        return Err(BojError::validation(
            "too_many_layers",
            "LAYER accepts at most 5 levels",
        ));
    }
    for (index, item) in values.iter().enumerate() {
        if item != "*" && !item.chars().all(|ch| ch.is_ascii_digit()) {
            let code = if index == 0 { "invalid_layer1" } else { "invalid_layer" };
            return Err(BojError::validation(
                code,
                format!("LAYER{} must be numeric or '*'", index + 1),
            ));
        }
        validate_outbound_text(item, &format!("LAYER{}", index + 1))?;
    }
    Ok(values)
}

fn period_key(period: &str) -> (u32, u32) {
    let year = period[..4].parse::<u32>().unwrap_or(0);
    let suffix = if period.len() == 6 {
        period[4..6].parse::<u32>().unwrap_or(0)
    } else {
        0
    };
    (year, suffix)
}

fn validate_period_digits(period: &str, param_name: &str) -> BojResult<()> {
    let valid_shape = (period.len() == 4 || period.len() == 6)
        && period.chars().all(|ch| ch.is_ascii_digit());
    if !valid_shape {
        return Err(BojError::validation(
            "invalid_period_format",
            format!("{param_name} must be YYYY or YYYYMM"),
        ));
    }
    let year: u32 = period[..4].parse().unwrap_or(0);
    if !(1850..=2050).contains(&year) {
        return Err(BojError::validation(
            "period_out_of_range",
            "periods must fall between 1850 and 2050",
        ));
    }
    Ok(())
}

fn validate_period_for_frequency(
    period: &str,
    frequency: Frequency,
    param_name: &str,
) -> BojResult<()> {
    let expected_len = match frequency {
        Frequency::CalendarYear | Frequency::FiscalYear => 4,
        _ => 6,
    };
    if period.len() != expected_len || !period.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(BojError::validation(
            "invalid_period_format",
            format!(
                "{param_name} must be {} digits for frequency {}",
                expected_len, frequency
            ),
        ));
    }
    let year: u32 = period[..4].parse().unwrap_or(0);
    if !(1850..=2050).contains(&year) {
        return Err(BojError::validation(
            "period_out_of_range",
            "periods must fall between 1850 and 2050",
        ));
    }
    if period.len() == 6 {
        let suffix: u32 = period[4..6].parse().unwrap_or(0);
        match frequency {
            Frequency::CalendarHalf | Frequency::FiscalHalf => {
                if !(1..=2).contains(&suffix) {
                    return Err(BojError::validation(
                        "invalid_half",
                        "half-year suffix must be 01 or 02",
                    ));
                }
            }
            Frequency::Quarterly => {
                if !(1..=4).contains(&suffix) {
                    return Err(BojError::validation(
                        "invalid_quarter",
                        "quarter suffix must be 01 through 04",
                    ));
                }
            }
            Frequency::Monthly | Frequency::Weekly | Frequency::Daily => {
                if !(1..=12).contains(&suffix) {
                    return Err(BojError::validation(
                        "invalid_month",
                        "month must be 01 through 12",
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Normalize the Layer endpoint's start/end periods against a frequency.
pub fn normalize_periods(
    start: Option<&str>,
    end: Option<&str>,
    frequency: Frequency,
) -> BojResult<(Option<String>, Option<String>)> {
    let start_norm = start.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    let end_norm = end.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    if let Some(value) = &start_norm {
        validate_outbound_text(value, "STARTDATE")?;
        validate_period_for_frequency(value, frequency, "STARTDATE")?;
    }
    if let Some(value) = &end_norm {
        validate_outbound_text(value, "ENDDATE")?;
        validate_period_for_frequency(value, frequency, "ENDDATE")?;
    }
    if let (Some(start), Some(end)) = (&start_norm, &end_norm) {
        if period_key(start) > period_key(end) {
            return Err(BojError::validation(
                "period_order",
                "STARTDATE must not follow ENDDATE",
            ));
        }
    }
    Ok((start_norm, end_norm))
}

/// Normalize the Code endpoint's start/end periods.
///
/// The Code endpoint's period shape depends on each series' own frequency,
/// so only the lightweight YYYY / YYYYMM check and ordering run here; the
/// frequency fit is left to the server.
pub fn normalize_code_periods(
    start: Option<&str>,
    end: Option<&str>,
) -> BojResult<(Option<String>, Option<String>)> {
    let start_norm = start.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    let end_norm = end.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    if let Some(value) = &start_norm {
        validate_outbound_text(value, "STARTDATE")?;
        validate_period_digits(value, "STARTDATE")?;
        validate_month_suffix(value)?;
    }
    if let Some(value) = &end_norm {
        validate_outbound_text(value, "ENDDATE")?;
        validate_period_digits(value, "ENDDATE")?;
        validate_month_suffix(value)?;
    }
    if let (Some(start), Some(end)) = (&start_norm, &end_norm) {
        if period_key(start) > period_key(end) {
            return Err(BojError::validation(
                "period_order",
                "STARTDATE must not follow ENDDATE",
            ));
        }
    }
    Ok((start_norm, end_norm))
}

fn validate_month_suffix(period: &str) -> BojResult<()> {
    if period.len() == 6 {
        let month: u32 = period[4..6].parse().unwrap_or(0);
        if !(1..=12).contains(&month) {
            return Err(BojError::validation(
                "invalid_month",
                "month must be 01 through 12",
            ));
        }
    }
    Ok(())
}

/// Validate an explicit STARTPOSITION.
pub fn normalize_start_position(value: Option<u64>) -> BojResult<Option<u64>> {
    match value {
        None => Ok(None),
        Some(position) if position >= 1 => Ok(Some(position)),
        Some(_) => Err(BojError::validation(
            "invalid_start_position",
            "STARTPOSITION must be a positive integer",
        )),
    }
}

/// `strict_api` and `auto_split_codes` are mutually exclusive by contract.
pub fn validate_strict_auto_split(strict_api: bool, auto_split_codes: bool) -> BojResult<()> {
    if strict_api && auto_split_codes {
        return Err(BojError::validation(
            "strict_auto_split_conflict",
            "strict_api and auto_split_codes cannot both be enabled",
        ));
    }
    Ok(())
}

/// Normalize `raw_params`: uppercase keys, reject core-parameter overrides.
pub fn normalize_raw_params(
    raw_params: &BTreeMap<String, String>,
    _allow_raw_override: bool,
) -> BojResult<BTreeMap<String, String>> {
    let mut normalized = BTreeMap::new();
    for (key, value) in raw_params {
        let upper = key.trim().to_ascii_uppercase();
        if upper.is_empty() {
            continue;
        }
        if CORE_PARAM_KEYS.contains(&upper.as_str()) {
            return Err(BojError::validation(
                "raw_override_core_forbidden",
                format!("{upper} cannot be overridden through raw_params"),
            ));
        }
        normalized.insert(upper, value.clone());
    }
    Ok(normalized)
}

/// Guess the frequency encoded in a series code string.
///
/// Returns the frequency code, or `"UNKNOWN"` when the shape gives nothing
/// away. Codes carrying an `@` suffix (e.g. `FM01'...@D`) take the suffix;
/// otherwise a trailing `<freq-letters><digits>` block is inspected.
pub fn guess_frequency_from_code(code: &str) -> &'static str {
    let upper = code.to_ascii_uppercase();

    if let Some((_, suffix)) = upper.rsplit_once('@') {
        if !suffix.is_empty() {
            if suffix.starts_with('W') && suffix.len() <= 2 {
                return "W";
            }
            match suffix {
                "D" => return "D",
                "M" => return "M",
                "Q" => return "Q",
                _ => {}
            }
        }
    }

    // Strip trailing digits (at least two) and examine the 1-2 letters before.
    let bytes = upper.as_bytes();
    let mut idx = bytes.len();
    while idx > 0 && bytes[idx - 1].is_ascii_digit() {
        idx -= 1;
    }
    let digit_count = bytes.len() - idx;
    if digit_count >= 2 {
        let prefix = &upper[..idx];
        for candidate in ["CY", "FY", "CH", "FH"] {
            if prefix.ends_with(candidate) {
                return match candidate {
                    "CY" => "CY",
                    "FY" => "FY",
                    "CH" => "CH",
                    _ => "FH",
                };
            }
        }
        if let Some(last) = prefix.chars().last() {
            match last {
                'Q' => return "Q",
                'M' => return "M",
                'W' => return "W",
                'D' => return "D",
                _ => {}
            }
        }
    }
    "UNKNOWN"
}

/// Partition codes into request chunks.
///
/// Codes are grouped by inferred frequency (first-seen group order), then
/// each group is cut into sub-lists of at most [`MAX_CODES_PER_CHUNK`]
/// preserving relative order. Concatenating the chunks therefore replays the
/// per-group input order; frequency-unknown codes form their own group.
pub fn split_codes_by_frequency_and_size(codes: &[String]) -> Vec<Vec<String>> {
    let mut order: Vec<&'static str> = Vec::new();
    let mut grouped: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for code in codes {
        let key = guess_frequency_from_code(code);
        if !grouped.contains_key(key) {
            order.push(key);
        }
        grouped.entry(key).or_default().push(code.clone());
    }

    let mut chunks = Vec::new();
    for key in order {
        if let Some(items) = grouped.get(key) {
            for slice in items.chunks(MAX_CODES_PER_CHUNK) {
                chunks.push(slice.to_vec());
            }
        }
    }
    chunks
}

/// Canonicalize raw params for fingerprinting: sorted upper-cased keys,
/// trimmed stringified values.
pub fn canonical_params(params: &BTreeMap<String, String>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| (key.to_ascii_uppercase(), value.trim().to_string()))
        .collect()
}
