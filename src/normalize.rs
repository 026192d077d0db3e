//! Response key normalization and record expansion.
//!
//! The API spells the same field several ways across formats and languages
//! (`SERIESCODE`, `SERIES CODE`, `SERIES_CODE`). Everything funnels through
//! [`normalize_key`] before any field lookup, and unrecognized keys are
//! preserved in each record's `extras` instead of being dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::jst;
use crate::{MetadataRecord, TimeSeriesRecord};

/// Canonicalize a response key: trim, uppercase, collapse spelling variants.
pub fn normalize_key(key: &str) -> String {
    let compact = key.trim().replace('_', " ").to_ascii_uppercase();
    let compact_no_space: String = compact.chars().filter(|ch| *ch != ' ').collect();
    if let Some(alias) = alias_for(&compact_no_space) {
        return alias.to_string();
    }
    compact.replace(' ', "_")
}

fn alias_for(compact: &str) -> Option<&'static str> {
    let alias = match compact {
        "SERIESCODE" => "SERIES_CODE",
        "NAMEOFTIMESERIESJ" => "NAME_OF_TIME_SERIES_J",
        "NAMEOFTIMESERIES" => "NAME_OF_TIME_SERIES",
        "UNITJ" => "UNIT_J",
        "CATEGORYJ" => "CATEGORY_J",
        "LASTUPDATE" => "LAST_UPDATE",
        "SURVEYDATES" => "SURVEY_DATES",
        "STARTOFTHETIMESERIES" => "START_OF_THE_TIME_SERIES",
        "ENDOFTHETIMESERIES" => "END_OF_THE_TIME_SERIES",
        "NOTESJ" => "NOTES_J",
        _ => return None,
    };
    Some(alias)
}

/// Parse a DATE string leniently.
///
/// The server has been observed emitting RFC 3339, bare local timestamps,
/// date-only values, and the malformed `...Z+09:00` shape. Offset-free
/// values are interpreted as JST. Returns the parse result and a warning
/// message when nothing matched.
pub fn parse_date_tolerant(raw: Option<&str>) -> (Option<DateTime<FixedOffset>>, Option<String>) {
    let Some(raw) = raw else {
        return (None, None);
    };
    let text = raw.trim();
    if text.is_empty() {
        return (None, None);
    }

    let mut candidates = vec![text.to_string()];
    if text.contains("Z+") {
        candidates.push(text.replace("Z+", "+"));
    }
    if let Some(stripped) = text.strip_suffix('Z') {
        candidates.push(format!("{stripped}+00:00"));
    }

    for candidate in &candidates {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(candidate) {
            return (Some(parsed), None);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            if let Some(local) = naive.and_local_timezone(jst()).single() {
                return (Some(local), None);
            }
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            if let Some(local) = midnight.and_local_timezone(jst()).single() {
                return (Some(local), None);
            }
        }
    }
    (None, Some(format!("failed to parse DATE: {raw}")))
}

/// Map a frequency display label to its code and optional weekly anchor.
pub fn frequency_code_from_label(label: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(label) = label else {
        return (None, None);
    };
    let normalized = label.to_ascii_uppercase();
    if normalized.contains("ANNUAL (MAR)") {
        return (Some("FY".to_string()), None);
    }
    if normalized.contains("SEMIANNUAL (SEP)") {
        return (Some("FH".to_string()), None);
    }
    if normalized.contains("SEMIANNUAL") {
        return (Some("CH".to_string()), None);
    }
    if normalized.contains("ANNUAL") {
        return (Some("CY".to_string()), None);
    }
    if normalized.contains("QUARTERLY") {
        return (Some("Q".to_string()), None);
    }
    if normalized.contains("MONTHLY") {
        return (Some("M".to_string()), None);
    }
    if normalized.contains("DAILY") {
        return (Some("D".to_string()), None);
    }
    if normalized.contains("WEEKLY") {
        let anchor = normalized
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once(')'))
            .map(|(inner, _)| inner.trim().to_string());
        return (Some("W".to_string()), anchor);
    }
    (None, None)
}

fn value_to_opt_string(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn decimal_or_none(value: Option<&Value>) -> Option<Decimal> {
    let text = match value {
        None | Some(Value::Null) => return None,
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    };
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return None;
    }
    text.parse().ok()
}

fn extract<'a>(row: &'a BTreeMap<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| row.get(*key))
}

const TIMESERIES_CONSUMED_KEYS: [&str; 10] = [
    "SERIES_CODE",
    "NAME_OF_TIME_SERIES_J",
    "NAME_OF_TIME_SERIES",
    "UNIT_J",
    "UNIT",
    "FREQUENCY",
    "CATEGORY_J",
    "CATEGORY",
    "LAST_UPDATE",
    "VALUES",
];

fn collect_extras(
    normalized: &BTreeMap<String, Value>,
    consumed: &[&str],
) -> BTreeMap<String, Value> {
    normalized
        .iter()
        .filter(|(key, _)| !consumed.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn normalize_row(raw: &serde_json::Map<String, Value>) -> BTreeMap<String, Value> {
    raw.iter()
        .map(|(key, value)| (normalize_key(key), value.clone()))
        .collect()
}

/// Expand raw response rows into [`TimeSeriesRecord`]s.
///
/// Handles both the flat shape (one observation per row) and the nested
/// shape where a row carries parallel `SURVEY_DATES` / `VALUES` arrays.
/// `original_code_index` is resolved through `code_order_map`; rows without
/// a series code are skipped.
pub fn expand_timeseries_rows(
    rows: &[serde_json::Map<String, Value>],
    source_page_index: usize,
    code_order_map: &BTreeMap<String, usize>,
) -> Vec<TimeSeriesRecord> {
    let mut result = Vec::new();
    for (row_index, raw) in rows.iter().enumerate() {
        let normalized = normalize_row(raw);
        let series_code = value_to_opt_string(extract(&normalized, &["SERIES_CODE"]))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if series_code.is_empty() {
            continue;
        }
        let series_name = value_to_opt_string(extract(
            &normalized,
            &["NAME_OF_TIME_SERIES_J", "NAME_OF_TIME_SERIES"],
        ));
        let unit = value_to_opt_string(extract(&normalized, &["UNIT_J", "UNIT"]));
        let frequency = value_to_opt_string(extract(&normalized, &["FREQUENCY"]));
        let category = value_to_opt_string(extract(&normalized, &["CATEGORY_J", "CATEGORY"]));
        let last_update = value_to_opt_string(extract(&normalized, &["LAST_UPDATE"]));
        let (frequency_code, week_anchor) = frequency_code_from_label(frequency.as_deref());
        let original_code_index = code_order_map.get(&series_code).copied();

        let template = TimeSeriesRecord {
            series_code: series_code.clone(),
            series_name,
            unit,
            frequency,
            frequency_code,
            week_anchor,
            category,
            last_update,
            survey_date: String::new(),
            value: None,
            original_code_index,
            source_page_index,
            source_row_index: row_index,
            extras: BTreeMap::new(),
        };

        match extract(&normalized, &["VALUES"]) {
            Some(Value::Object(nested)) => {
                let nested: BTreeMap<String, Value> = nested
                    .iter()
                    .map(|(key, value)| (normalize_key(key), value.clone()))
                    .collect();
                let dates = nested
                    .get("SURVEY_DATES")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let values = nested
                    .get("VALUES")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let extras = collect_extras(&normalized, &TIMESERIES_CONSUMED_KEYS);
                for (idx, survey) in dates.iter().enumerate() {
                    let mut record = template.clone();
                    record.survey_date = value_to_opt_string(Some(survey)).unwrap_or_default();
                    record.value = decimal_or_none(values.get(idx));
                    record.extras = extras.clone();
                    result.push(record);
                }
            }
            flat_value => {
                let Some(survey) =
                    value_to_opt_string(extract(&normalized, &["SURVEY_DATES"]))
                else {
                    continue;
                };
                let mut consumed: Vec<&str> = TIMESERIES_CONSUMED_KEYS.to_vec();
                consumed.push("SURVEY_DATES");
                let mut record = template;
                record.survey_date = survey;
                record.value = decimal_or_none(flat_value);
                record.extras = collect_extras(&normalized, &consumed);
                result.push(record);
            }
        }
    }
    result
}

const METADATA_CONSUMED_KEYS: [&str; 19] = [
    "SERIES_CODE",
    "NAME_OF_TIME_SERIES_J",
    "NAME_OF_TIME_SERIES",
    "UNIT_J",
    "UNIT",
    "FREQUENCY",
    "CATEGORY_J",
    "CATEGORY",
    "LAYER1",
    "LAYER2",
    "LAYER3",
    "LAYER4",
    "LAYER5",
    "START_OF_THE_TIME_SERIES",
    "END_OF_THE_TIME_SERIES",
    "LAST_UPDATE",
    "NOTES_J",
    "NOTES",
    "DB",
];

/// Convert raw metadata rows into [`MetadataRecord`]s.
///
/// Hierarchy-header rows (empty series code) are kept; they carry the layer
/// labels the hierarchy view needs.
pub fn normalize_metadata_rows(rows: &[serde_json::Map<String, Value>]) -> Vec<MetadataRecord> {
    rows.iter()
        .map(|raw| {
            let normalized = normalize_row(raw);
            MetadataRecord {
                series_code: value_to_opt_string(extract(&normalized, &["SERIES_CODE"]))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
                series_name: value_to_opt_string(extract(
                    &normalized,
                    &["NAME_OF_TIME_SERIES_J", "NAME_OF_TIME_SERIES"],
                )),
                unit: value_to_opt_string(extract(&normalized, &["UNIT_J", "UNIT"])),
                frequency: value_to_opt_string(extract(&normalized, &["FREQUENCY"])),
                category: value_to_opt_string(extract(&normalized, &["CATEGORY_J", "CATEGORY"])),
                layer1: value_to_opt_string(extract(&normalized, &["LAYER1"])),
                layer2: value_to_opt_string(extract(&normalized, &["LAYER2"])),
                layer3: value_to_opt_string(extract(&normalized, &["LAYER3"])),
                layer4: value_to_opt_string(extract(&normalized, &["LAYER4"])),
                layer5: value_to_opt_string(extract(&normalized, &["LAYER5"])),
                start_of_time_series: value_to_opt_string(extract(
                    &normalized,
                    &["START_OF_THE_TIME_SERIES"],
                )),
                end_of_time_series: value_to_opt_string(extract(
                    &normalized,
                    &["END_OF_THE_TIME_SERIES"],
                )),
                last_update: value_to_opt_string(extract(&normalized, &["LAST_UPDATE"])),
                notes: value_to_opt_string(extract(&normalized, &["NOTES_J", "NOTES"])),
                extras: collect_extras(&normalized, &METADATA_CONSUMED_KEYS),
            }
        })
        .collect()
}
