//! CSV response parser.
//!
//! CSV bodies interleave preamble rows (`STATUS`, `MESSAGEID`, `DATE`,
//! `PARAMETER`, `NEXTPOSITION`) with a header row followed by data rows.
//! Blank fields decode to null.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::normalize::{normalize_key, parse_date_tolerant};
use crate::Format;

use super::{excerpt, ParseFailure, ParsedResponse};

const HEADER_MARKERS: [&str; 3] = [
    "SERIES_CODE",
    "NAME_OF_TIME_SERIES_J",
    "NAME_OF_TIME_SERIES",
];

/// Parse a decoded CSV body into the common [`ParsedResponse`] shape.
pub fn parse_csv_response(text: &str) -> Result<ParsedResponse, ParseFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut status: Option<u16> = None;
    let mut message_id = String::new();
    let mut message = String::new();
    let mut date_raw: Option<String> = None;
    let mut parameters: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut next_position: Option<u64> = None;
    let mut db: Option<String> = None;
    let mut data_header: Option<Vec<String>> = None;
    let mut rows: Vec<serde_json::Map<String, Value>> = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| ParseFailure(format!("invalid CSV: {e}")))?;
        let cells: Vec<String> = record.iter().map(|cell| cell.trim().to_string()).collect();
        if cells.iter().all(String::is_empty) {
            continue;
        }

        let key = normalize_key(&cells[0]);
        match key.as_str() {
            "STATUS" => {
                status = cells.get(1).and_then(|value| value.parse().ok());
                continue;
            }
            "MESSAGEID" => {
                message_id = cells.get(1).cloned().unwrap_or_default();
                continue;
            }
            "MESSAGE" => {
                message = cells.get(1).cloned().unwrap_or_default();
                continue;
            }
            "DATE" => {
                date_raw = cells.get(1).filter(|value| !value.is_empty()).cloned();
                continue;
            }
            "PARAMETER" => {
                if let Some(name) = cells.get(1) {
                    let value = cells.get(2).filter(|value| !value.is_empty()).cloned();
                    parameters.insert(normalize_key(name), value);
                }
                continue;
            }
            "NEXTPOSITION" => {
                next_position = cells.get(1).and_then(|value| value.parse().ok());
                continue;
            }
            "DB" => {
                db = cells.get(1).filter(|value| !value.is_empty()).cloned();
                continue;
            }
            _ => {}
        }

        if data_header.is_none() {
            let normalized: Vec<String> = cells.iter().map(|cell| normalize_key(cell)).collect();
            if normalized
                .iter()
                .any(|cell| HEADER_MARKERS.contains(&cell.as_str()))
            {
                data_header = Some(normalized);
                continue;
            }
            // Preamble noise ahead of the header row is skipped.
            continue;
        }

        if let Some(header) = &data_header {
            let mut mapped = serde_json::Map::new();
            for (idx, column) in header.iter().enumerate() {
                if column.is_empty() {
                    continue;
                }
                let cell = cells.get(idx).map(String::as_str).unwrap_or("");
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                mapped.insert(column.clone(), value);
            }
            rows.push(mapped);
        }
    }

    let status = status.ok_or_else(|| ParseFailure("CSV body carries no STATUS row".to_string()))?;
    let (date_parsed, date_parse_warning) = parse_date_tolerant(date_raw.as_deref());

    Ok(ParsedResponse {
        status,
        message_id,
        message,
        date_raw,
        date_parsed,
        date_parse_warning,
        parameters,
        next_position,
        rows,
        db,
        raw_response_excerpt: excerpt(text),
        format: Format::Csv,
    })
}
