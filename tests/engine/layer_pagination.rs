//! Layer-endpoint pagination: global cursor, encounter-order ranking,
//! overflow refusal.

use bojstat::error::BojError;
use bojstat::{Frequency, LayerQuery};
use serde_json::{json, Value};
use tempfile::TempDir;

use super::support::{config_with_cache, data_service, fast_retry, page, ScriptedExchange};

fn layer_rows(codes: &[&str], survey_date: &str) -> Value {
    let rows: Vec<Value> = codes
        .iter()
        .map(|code| {
            json!({
                "SERIES_CODE": code,
                "FREQUENCY": "QUARTERLY",
                "LAST_UPDATE": "20260301",
                "SURVEY_DATES": survey_date,
                "VALUES": "2.0",
            })
        })
        .collect();
    Value::Array(rows)
}

#[tokio::test]
async fn test_layer_call_follows_the_global_cursor() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", Some(3), None, layer_rows(&["CO01", "CO02"], "202401"))),
        Ok(page(200, "M181000I", None, None, layer_rows(&["CO03"], "202401"))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let frame = service
        .get_data_layer(LayerQuery::new("CO", Frequency::Quarterly, ["1", "2"]))
        .await
        .unwrap();

    assert_eq!(exchange.calls(), 2);
    assert_eq!(frame.records.len(), 3);
    // Series rank in encounter order across pages.
    let ranked: Vec<(Option<usize>, &str)> = frame
        .records
        .iter()
        .map(|record| (record.original_code_index, record.series_code.as_str()))
        .collect();
    assert_eq!(
        ranked,
        vec![(Some(0), "CO01"), (Some(1), "CO02"), (Some(2), "CO03")]
    );
    assert!(frame.meta.resume_token.is_some());
}

#[tokio::test]
async fn test_layer_stall_is_detected() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", Some(3), None, layer_rows(&["CO01"], "202401"))),
        Ok(page(200, "M181000I", Some(2), None, layer_rows(&["CO02"], "202401"))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let error = service
        .get_data_layer(LayerQuery::new("CO", Frequency::Quarterly, ["1"]))
        .await
        .unwrap_err();
    match error {
        BojError::PaginationStalled {
            chunk_index,
            start,
            next_position,
        } => {
            assert_eq!(chunk_index, 0);
            assert_eq!(start, 3);
            assert_eq!(next_position, 2);
        }
        other => panic!("expected PaginationStalled, got {other:?}"),
    }
    assert_eq!(exchange.calls(), 2);
}

#[tokio::test]
async fn test_layer_overflow_refuses_to_continue() {
    let dir = TempDir::new().unwrap();
    let codes: Vec<String> = (0..1250).map(|i| format!("CO{i:04}")).collect();
    let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let exchange = ScriptedExchange::new(vec![Ok(page(
        200,
        "M181000I",
        Some(1251),
        None,
        layer_rows(&code_refs, "202401"),
    ))]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let error = service
        .get_data_layer(LayerQuery::new("CO", Frequency::Quarterly, ["1"]))
        .await
        .unwrap_err();
    match error {
        BojError::LayerOverflow { row_count, ceiling } => {
            assert_eq!(row_count, 1250);
            assert_eq!(ceiling, 1250);
        }
        other => panic!("expected LayerOverflow, got {other:?}"),
    }
    // No auto-continuation past the ceiling.
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn test_single_page_mode_stops_after_one_request() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![Ok(page(
        200,
        "M181000I",
        Some(3),
        None,
        layer_rows(&["CO01"], "202401"),
    ))]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let frame = service
        .get_data_layer(LayerQuery::new("CO", Frequency::Quarterly, ["1"]).single_page())
        .await
        .unwrap();
    assert_eq!(exchange.calls(), 1);
    assert_eq!(frame.meta.next_position, Some(3));
    assert!(frame.meta.resume_token.is_some());
}

#[tokio::test]
async fn test_layer_path_validation() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![]);
    let service = data_service(exchange, config_with_cache(dir.path()), fast_retry());

    let error = service
        .get_data_layer(LayerQuery::new("CO", Frequency::Quarterly, ["x"]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BojError::Validation {
            code: "invalid_layer1",
            ..
        }
    ));

    let error = service
        .get_data_layer(LayerQuery::new(
            "CO",
            Frequency::Quarterly,
            ["1", "2", "3", "4", "5", "6"],
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BojError::Validation {
            code: "too_many_layers",
            ..
        }
    ));
}
