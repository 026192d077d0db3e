//! JSON response parser.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::normalize::{normalize_key, parse_date_tolerant};
use crate::Format;

use super::{excerpt, ParseFailure, ParsedResponse};

fn as_u16(value: Option<&Value>) -> Option<u16> {
    match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u64(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Parse a JSON body into the common [`ParsedResponse`] shape.
pub fn parse_json_response(text: &str) -> Result<ParsedResponse, ParseFailure> {
    let payload: Value =
        serde_json::from_str(text).map_err(|e| ParseFailure(format!("invalid JSON: {e}")))?;
    let object = payload
        .as_object()
        .ok_or_else(|| ParseFailure("JSON body is not an object".to_string()))?;

    let normalized: BTreeMap<String, Value> = object
        .iter()
        .map(|(key, value)| (normalize_key(key), value.clone()))
        .collect();

    let status = as_u16(normalized.get("STATUS"))
        .ok_or_else(|| ParseFailure("missing or invalid STATUS".to_string()))?;
    let message_id = as_string(normalized.get("MESSAGEID")).unwrap_or_default();
    let message = as_string(normalized.get("MESSAGE")).unwrap_or_default();
    let date_raw = as_string(normalized.get("DATE"));
    let (date_parsed, date_parse_warning) = parse_date_tolerant(date_raw.as_deref());

    let mut parameters = BTreeMap::new();
    if let Some(Value::Object(parameter_obj)) = normalized.get("PARAMETER") {
        for (key, value) in parameter_obj {
            let rendered = match value {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            parameters.insert(normalize_key(key), rendered);
        }
    }

    let next_position = as_u64(normalized.get("NEXTPOSITION"));

    let mut rows = Vec::new();
    if let Some(Value::Array(resultset)) = normalized.get("RESULTSET") {
        for row in resultset {
            if let Value::Object(map) = row {
                rows.push(map.clone());
            }
        }
    }

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
        db: as_string(normalized.get("DB")),
        raw_response_excerpt: excerpt(text),
        format: Format::Json,
    })
}
