//! MESSAGEID classification catalog.
//!
//! The server reports outcomes through `M181xxx` message ids with a severity
//! suffix (`E` error, `I` informational, `S` system). The catalog maps known
//! ids to semantic categories; unknown ids classify as `unknown` and carry an
//! `observation_key` so they can be cataloged later.

/// Catalog revision; bumped whenever the mapping below changes.
pub const ERROR_CATALOG_VERSION: &str = "2026.02";

/// Result of classifying a MESSAGEID.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageClassification {
    /// Semantic category, or `unknown`
    pub category: &'static str,
    /// Catalog revision that produced this classification
    pub catalog_version: &'static str,
    /// `status:message_id` key for cataloging unknown observations
    pub observation_key: String,
    /// 1.0 for known ids, 0.0 for unknown
    pub confidence: f64,
}

/// Classifies server MESSAGEID values into semantic categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCatalog;

impl MessageCatalog {
    /// Map a STATUS/MESSAGEID pair to a semantic category.
    pub fn classify(&self, status: Option<u16>, message_id: &str) -> MessageClassification {
        let normalized = message_id.trim().to_ascii_uppercase();
        let category = category_for(&normalized);
        let observation_key = match status {
            Some(status) => format!("{status}:{normalized}"),
            None => normalized.clone(),
        };
        MessageClassification {
            category,
            catalog_version: ERROR_CATALOG_VERSION,
            observation_key,
            confidence: if category == "unknown" { 0.0 } else { 1.0 },
        }
    }
}

/// MESSAGEID signaling a successful call that matched no data.
pub const MESSAGE_ID_NO_DATA: &str = "M181030I";

fn category_for(message_id: &str) -> &'static str {
    match message_id {
        "M181000I" => "ok",
        "M181030I" => "no_data",
        "M181001E" => "invalid_parameter",
        "M181002E" => "invalid_language",
        "M181003E" => "invalid_format",
        "M181004E" => "missing_db",
        "M181005E" => "invalid_db",
        "M181006E" => "missing_code",
        "M181007E" => "code_count_overflow",
        "M181008E" => "invalid_start",
        "M181009E" => "invalid_end",
        "M181010E" => "period_range",
        "M181011E" => "period_order",
        "M181012E" => "invalid_start_position",
        "M181013E" => "code_not_found",
        "M181014E" => "frequency_mismatch",
        "M181015E" => "start_format_mismatch",
        "M181016E" => "end_format_mismatch",
        "M181017E" => "missing_frequency",
        "M181018E" => "invalid_frequency",
        "M181019E" => "missing_layer",
        "M181020E" => "invalid_layer",
        "M181090S" => "internal_error",
        "M181091S" => "db_unavailable",
        _ => "unknown",
    }
}
