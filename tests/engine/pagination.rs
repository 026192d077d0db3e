//! Code-endpoint pagination: multi-page assembly, stall detection,
//! body-over-HTTP errors, chunk planning.

use bojstat::error::BojError;
use bojstat::CodeQuery;
use serde_json::json;
use tempfile::TempDir;

use super::support::{
    config_with_cache, data_service, fast_retry, flat_rows, incomplete_envelopes,
    one_row_per_code, page, ScriptedExchange,
};

#[tokio::test]
async fn test_single_chunk_two_pages_assembles_unique_sorted_records() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", Some(2), None, flat_rows("FXERD01", 100, 50))),
        Ok(page(200, "M181000I", None, None, flat_rows("FXERD01", 150, 20))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let frame = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]).period("202401", "202412"))
        .await
        .unwrap();

    assert_eq!(exchange.calls(), 2);
    assert_eq!(frame.records.len(), 70);
    assert_eq!(frame.meta.next_position, None);
    assert!(frame.meta.resume_token.is_some());

    // Unique under the dedup key, sorted by survey date within the series.
    let mut seen = std::collections::BTreeSet::new();
    for record in &frame.records {
        assert!(seen.insert((record.series_code.clone(), record.survey_date.clone())));
        assert_eq!(record.original_code_index, Some(0));
    }
    let dates: Vec<&str> = frame.records.iter().map(|r| r.survey_date.as_str()).collect();
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted);
}

#[tokio::test]
async fn test_stall_fails_and_writes_incomplete_entry_with_token() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", Some(2), None, flat_rows("FXERD01", 100, 50))),
        Ok(page(200, "M181000I", Some(2), None, flat_rows("FXERD01", 150, 50))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let error = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]))
        .await
        .unwrap_err();

    match error {
        BojError::PaginationStalled {
            chunk_index,
            start,
            next_position,
        } => {
            assert_eq!(chunk_index, 0);
            assert_eq!(start, 2);
            assert_eq!(next_position, 2);
        }
        other => panic!("expected PaginationStalled, got {other:?}"),
    }
    // No further request after the stall was observed.
    assert_eq!(exchange.calls(), 2);

    let incomplete = incomplete_envelopes(dir.path());
    assert_eq!(incomplete.len(), 1);
    let token = &incomplete[0]["payload"]["meta"]["resume_token"];
    assert!(token.is_string(), "incomplete entry must carry a resume token");
}

#[tokio::test]
async fn test_body_error_status_governs_over_http_200() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![Ok(page(
        400,
        "M181014E",
        None,
        None,
        json!([]),
    ))]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let error = service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]))
        .await
        .unwrap_err();

    match error {
        BojError::BadRequest(fault) => {
            assert_eq!(fault.status, Some(400));
            assert_eq!(fault.message_id, "M181014E");
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }
    assert_eq!(exchange.calls(), 1, "body 400 must not be retried");
}

#[tokio::test]
async fn test_strict_mode_passes_oversized_code_list_through() {
    let dir = TempDir::new().unwrap();
    // The server rejects 1251 codes; strict mode must surface that verbatim
    // instead of chunking around it.
    let exchange = ScriptedExchange::new(vec![Ok(page(
        400,
        "M181007E",
        None,
        None,
        json!([]),
    ))]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let codes: Vec<String> = (0..1251).map(|i| format!("SER{i:05}M01")).collect();
    let error = service
        .get_data_code(CodeQuery::new("FM08", codes).strict_api(true))
        .await
        .unwrap_err();

    match error {
        BojError::BadRequest(fault) => assert_eq!(fault.message_id, "M181007E"),
        other => panic!("expected BadRequest, got {other:?}"),
    }
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn test_auto_split_issues_one_request_sequence_per_chunk() {
    let dir = TempDir::new().unwrap();
    let codes: Vec<String> = (0..251).map(|i| format!("SER{i:04}M01")).collect();
    let first_chunk: Vec<String> = codes[..250].to_vec();
    let second_chunk: Vec<String> = codes[250..].to_vec();

    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&first_chunk, "202401"))),
        Ok(page(200, "M181000I", None, None, one_row_per_code(&second_chunk, "202401"))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let frame = service
        .get_data_code(
            CodeQuery::new("FM08", codes.clone())
                .strict_api(false)
                .auto_split_codes(true),
        )
        .await
        .unwrap();

    assert_eq!(exchange.calls(), 2, "251 codes split into chunks of 250 and 1");
    assert_eq!(frame.records.len(), 251);
    // Canonical order follows the original request order.
    let result_codes: Vec<&str> = frame.records.iter().map(|r| r.series_code.as_str()).collect();
    let expected: Vec<&str> = codes.iter().map(String::as_str).collect();
    assert_eq!(result_codes, expected);
}

#[tokio::test]
async fn test_no_data_yields_empty_frame() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![Ok(page(
        200,
        "M181030I",
        None,
        None,
        json!([]),
    ))]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    let frame = service
        .get_data_code(CodeQuery::new("FM08", ["NOPE01"]))
        .await
        .unwrap();
    assert!(frame.records.is_empty());
    assert_eq!(frame.meta.message_id, "M181030I");
}
