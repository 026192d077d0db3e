//! Result frames and response metadata.
//!
//! A frame pairs the normalized record set with a [`ResponseMeta`] carrying
//! the last page's envelope fields plus engine annotations: the resume
//! token, consistency signal, and conflict accounting. Frames serialize
//! losslessly (decimals as strings), which is also the cache payload format.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::consistency::ConflictDetail;
use crate::error::{BojError, BojResult};
use crate::{ConflictResolution, MetadataRecord, TimeSeriesRecord};

/// How numeric values are rendered by the export helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericMode {
    /// Exact decimal strings (lossless)
    Decimal,
    /// IEEE 754 doubles (lossy for long mantissas)
    Float64,
    /// Plain strings
    Text,
}

/// Metadata shared by both frame shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// In-body STATUS of the last page
    pub status: u16,
    /// In-body MESSAGEID of the last page
    pub message_id: String,
    /// In-body MESSAGE of the last page
    pub message: String,
    /// Raw DATE string of the last page
    pub date_raw: Option<String>,
    /// Parsed DATE of the last page
    pub date_parsed: Option<DateTime<FixedOffset>>,
    /// Warning when DATE was present but unparseable
    pub date_parse_warning: Option<String>,
    /// What DATE means for this endpoint
    pub date_semantics: String,
    /// NEXTPOSITION of the last page (None when pagination finished)
    pub next_position: Option<u64>,
    /// PARAMETER echo from the server
    pub parameters: BTreeMap<String, Option<String>>,
    /// Fully resolved URL of the last request
    pub request_url: String,
    /// Result schema version
    pub schema_version: String,
    /// Parser version that produced the records
    pub parser_version: String,
    /// Normalizer version that produced the records
    pub normalizer_version: String,
    /// Continuation token; None once pagination completed
    pub resume_token: Option<String>,
    /// Consistency signal recorded under best-effort policy
    pub consistency_signal: Option<String>,
    /// Structured evidence for the signal
    #[serde(default)]
    pub consistency_details: Value,
    /// Conflict resolution rule in force
    pub conflict_resolution: ConflictResolution,
    /// Total LAST_UPDATE conflicts observed
    pub conflicts_count: u64,
    /// Bounded sample of conflict evidence
    #[serde(default)]
    pub conflicts_sample: Vec<ConflictDetail>,
    /// Non-fatal warnings accumulated during the call
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ResponseMeta {
    /// Meta for a call that issued no request (e.g. resolved empty).
    pub fn empty(request_url: impl Into<String>) -> Self {
        Self {
            status: 200,
            message_id: crate::catalog::MESSAGE_ID_NO_DATA.to_string(),
            message: "no matching data".to_string(),
            date_raw: None,
            date_parsed: None,
            date_parse_warning: None,
            date_semantics: "output_file_created_at".to_string(),
            next_position: None,
            parameters: BTreeMap::new(),
            request_url: request_url.into(),
            schema_version: crate::config::SCHEMA_VERSION.to_string(),
            parser_version: crate::config::PARSER_VERSION.to_string(),
            normalizer_version: crate::config::NORMALIZER_VERSION.to_string(),
            resume_token: None,
            consistency_signal: None,
            consistency_details: Value::Null,
            conflict_resolution: ConflictResolution::LatestLastUpdate,
            conflicts_count: 0,
            conflicts_sample: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

fn render_value(value: &Option<rust_decimal::Decimal>, mode: NumericMode) -> Value {
    match value {
        None => Value::Null,
        Some(decimal) => match mode {
            NumericMode::Decimal | NumericMode::Text => Value::String(decimal.to_string()),
            NumericMode::Float64 => decimal
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
    }
}

/// Records plus metadata from the Code or Layer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesFrame {
    /// Deduplicated, canonically ordered records
    pub records: Vec<TimeSeriesRecord>,
    /// Call metadata
    pub meta: ResponseMeta,
}

impl TimeSeriesFrame {
    /// One object per record, values rendered per `mode`.
    pub fn to_long(&self, mode: NumericMode) -> Vec<Value> {
        self.records
            .iter()
            .map(|record| {
                json!({
                    "series_code": record.series_code,
                    "series_name": record.series_name,
                    "unit": record.unit,
                    "frequency": record.frequency,
                    "frequency_code": record.frequency_code,
                    "week_anchor": record.week_anchor,
                    "category": record.category,
                    "last_update": record.last_update,
                    "survey_date": record.survey_date,
                    "value": render_value(&record.value, mode),
                    "original_code_index": record.original_code_index,
                    "source_page_index": record.source_page_index,
                    "source_row_index": record.source_row_index,
                    "extras": record.extras,
                })
            })
            .collect()
    }

    /// One object per survey date, one key per series code.
    pub fn to_wide(&self, mode: NumericMode) -> Vec<Value> {
        let mut table: BTreeMap<&str, serde_json::Map<String, Value>> = BTreeMap::new();
        for record in &self.records {
            let row = table.entry(record.survey_date.as_str()).or_default();
            row.insert(
                "survey_date".to_string(),
                Value::String(record.survey_date.clone()),
            );
            row.insert(
                record.series_code.clone(),
                render_value(&record.value, mode),
            );
        }
        table.into_values().map(Value::Object).collect()
    }

    /// Serialize for cache storage.
    pub fn to_cache_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Restore from a cache payload.
    pub fn from_cache_payload(payload: Value) -> BojResult<Self> {
        serde_json::from_value(payload)
            .map_err(|e| BojError::Cache(format!("cache payload does not decode: {e}")))
    }

    /// Greatest LAST_UPDATE across records, for the cache freshness snapshot.
    pub fn last_update_snapshot(&self) -> Option<String> {
        self.records
            .iter()
            .filter_map(|record| record.last_update.as_deref())
            .max()
            .map(String::from)
    }
}

/// Records plus metadata from the metadata endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFrame {
    /// Normalized metadata rows, hierarchy headers included
    pub records: Vec<MetadataRecord>,
    /// Call metadata
    pub meta: ResponseMeta,
}

impl MetadataFrame {
    /// All non-empty series codes, in row order.
    pub fn series_codes(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| !record.series_code.is_empty())
            .map(|record| record.series_code.as_str())
            .collect()
    }

    /// Filter by substring of the series name and/or frequency label.
    pub fn find(&self, name_contains: Option<&str>, frequency: Option<&str>) -> MetadataFrame {
        let needle = name_contains.map(str::to_lowercase);
        let freq = frequency.map(str::to_uppercase);
        let records = self
            .records
            .iter()
            .filter(|record| {
                if let Some(needle) = &needle {
                    match &record.series_name {
                        Some(name) if name.to_lowercase().contains(needle) => {}
                        _ => return false,
                    }
                }
                if let Some(freq) = &freq {
                    match &record.frequency {
                        Some(label) if label.to_uppercase().contains(freq) => {}
                        _ => return false,
                    }
                }
                true
            })
            .cloned()
            .collect();
        MetadataFrame {
            records,
            meta: self.meta.clone(),
        }
    }

    /// Filter with an arbitrary predicate.
    pub fn filter<F: Fn(&MetadataRecord) -> bool>(&self, predicate: F) -> MetadataFrame {
        MetadataFrame {
            records: self
                .records
                .iter()
                .filter(|record| predicate(record))
                .cloned()
                .collect(),
            meta: self.meta.clone(),
        }
    }

    /// Serialize for cache storage.
    pub fn to_cache_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Restore from a cache payload.
    pub fn from_cache_payload(payload: Value) -> BojResult<Self> {
        serde_json::from_value(payload)
            .map_err(|e| BojError::Cache(format!("cache payload does not decode: {e}")))
    }
}
