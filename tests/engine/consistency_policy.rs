//! Publish-window crossings and LAST_UPDATE conflicts under strict and
//! best-effort policies.

use bojstat::config::ClientConfig;
use bojstat::error::BojError;
use bojstat::{CodeQuery, ConsistencyMode};
use serde_json::json;
use tempfile::TempDir;

use super::support::{
    config_with_cache, data_service, fast_retry, flat_rows, incomplete_envelopes, page,
    ScriptedExchange,
};

const BEFORE_WINDOW: &str = "2026-03-04T08:40:00+09:00";
const INSIDE_WINDOW: &str = "2026-03-04T09:05:00+09:00";

fn with_mode(dir: &std::path::Path, mode: ConsistencyMode) -> ClientConfig {
    ClientConfig {
        consistency_mode: mode,
        ..config_with_cache(dir)
    }
}

fn crossing_pages() -> Vec<Result<bojstat::transport::RawResponse, bojstat::transport::TransportFailure>> {
    vec![
        Ok(page(200, "M181000I", Some(2), Some(BEFORE_WINDOW), flat_rows("FXERD01", 100, 5))),
        Ok(page(200, "M181000I", None, Some(INSIDE_WINDOW), flat_rows("FXERD01", 105, 5))),
    ]
}

#[tokio::test]
async fn test_strict_window_crossing_fails_the_call() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(crossing_pages());
    let service = data_service(
        exchange.clone(),
        with_mode(dir.path(), ConsistencyMode::Strict),
        fast_retry(),
    );

    let error = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]))
        .await
        .unwrap_err();
    match error {
        BojError::Consistency { signal, details } => {
            assert_eq!(signal, "window_crossed");
            let pages = details["pages"].as_array().expect("page evidence");
            assert_eq!(pages.len(), 2);
        }
        other => panic!("expected Consistency, got {other:?}"),
    }

    // The interrupted call still leaves a continuable trail.
    assert_eq!(incomplete_envelopes(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_best_effort_window_crossing_records_the_signal() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(crossing_pages());
    let service = data_service(
        exchange.clone(),
        with_mode(dir.path(), ConsistencyMode::BestEffort),
        fast_retry(),
    );

    let frame = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]))
        .await
        .unwrap();
    assert_eq!(frame.records.len(), 10);
    assert_eq!(frame.meta.consistency_signal.as_deref(), Some("window_crossed"));
    assert_eq!(
        frame.meta.consistency_details["pages"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );
}

fn conflicting_pages() -> Vec<Result<bojstat::transport::RawResponse, bojstat::transport::TransportFailure>> {
    let page_one = json!([{
        "SERIES_CODE": "FXERD01",
        "LAST_UPDATE": "20260101",
        "SURVEY_DATES": "20260227",
        "VALUES": "149.10",
    }]);
    let page_two = json!([{
        "SERIES_CODE": "FXERD01",
        "LAST_UPDATE": "20260302",
        "SURVEY_DATES": "20260227",
        "VALUES": "149.82",
    }]);
    vec![
        Ok(page(200, "M181000I", Some(2), None, page_one)),
        Ok(page(200, "M181000I", None, None, page_two)),
    ]
}

#[tokio::test]
async fn test_strict_last_update_conflict_fails_the_call() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(conflicting_pages());
    let service = data_service(
        exchange,
        with_mode(dir.path(), ConsistencyMode::Strict),
        fast_retry(),
    );

    let error = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]))
        .await
        .unwrap_err();
    match error {
        BojError::Consistency { signal, details } => {
            assert_eq!(signal, "last_update_conflict");
            assert_eq!(details["series_code"], "FXERD01");
            assert_eq!(details["existing_last_update"], "20260101");
            assert_eq!(details["incoming_last_update"], "20260302");
        }
        other => panic!("expected Consistency, got {other:?}"),
    }
}

#[tokio::test]
async fn test_best_effort_conflict_keeps_latest_and_samples_the_loser() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(conflicting_pages());
    let service = data_service(
        exchange,
        with_mode(dir.path(), ConsistencyMode::BestEffort),
        fast_retry(),
    );

    let frame = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]))
        .await
        .unwrap();
    assert_eq!(frame.records.len(), 1);
    assert_eq!(frame.records[0].last_update.as_deref(), Some("20260302"));
    assert_eq!(frame.records[0].value.unwrap().to_string(), "149.82");
    assert_eq!(frame.meta.conflicts_count, 1);
    assert_eq!(frame.meta.conflicts_sample.len(), 1);
    assert_eq!(frame.meta.conflicts_sample[0].series_code, "FXERD01");
}
