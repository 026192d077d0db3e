//! Resume: interrupted calls leave a continuable trail, and the union of
//! the interrupted and resumed record sets equals the one-shot reference.

use std::collections::BTreeSet;

use bojstat::error::{BojError, ResumeMismatchReason, TransportKind};
use bojstat::transport::TransportFailure;
use bojstat::CodeQuery;
use serde_json::json;
use tempfile::TempDir;

use super::support::{
    config_with_cache, data_service, fast_retry, incomplete_envelopes, one_row_per_code, page,
    ScriptedExchange,
};

fn six_hundred_codes() -> Vec<String> {
    (0..600).map(|i| format!("SER{i:04}M01")).collect()
}

fn chunk(codes: &[String], range: std::ops::Range<usize>) -> Vec<String> {
    codes[range].to_vec()
}

fn split_query(codes: Vec<String>) -> CodeQuery {
    CodeQuery::new("FM08", codes)
        .strict_api(false)
        .auto_split_codes(true)
}

#[tokio::test]
async fn test_resume_from_embedded_token_completes_the_record_set() {
    let dir = TempDir::new().unwrap();
    let codes = six_hundred_codes();

    // Call A: chunk 0 (250 codes) succeeds, chunk 1 dies on a fatal
    // transport error. The incomplete entry carries the boundary token.
    let exchange_a = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 0..250), "202401"))),
        Err(TransportFailure {
            kind: TransportKind::InvalidUrl,
            message: "scripted".to_string(),
            url: None,
        }),
    ]);
    let service_a = data_service(exchange_a.clone(), config_with_cache(dir.path()), fast_retry());
    let error = service_a
        .get_data_code(split_query(codes.clone()))
        .await
        .unwrap_err();
    assert!(matches!(error, BojError::Transport { .. }));
    assert_eq!(exchange_a.calls(), 2);

    let incomplete = incomplete_envelopes(dir.path());
    assert_eq!(incomplete.len(), 1);
    let partial_records = incomplete[0]["payload"]["records"]
        .as_array()
        .expect("partial records")
        .clone();
    assert_eq!(partial_records.len(), 250);

    // Call B: same request against the same cache; no caller token. The
    // engine resumes from the embedded token and only fetches chunks 1-2.
    let exchange_b = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 250..500), "202401"))),
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 500..600), "202401"))),
    ]);
    let service_b = data_service(exchange_b.clone(), config_with_cache(dir.path()), fast_retry());
    let frame_b = service_b
        .get_data_code(split_query(codes.clone()))
        .await
        .unwrap();
    assert_eq!(exchange_b.calls(), 2, "chunk 0 must not be refetched");
    assert_eq!(frame_b.records.len(), 350);

    // Union of A's partial records and B's records covers all 600 codes.
    let mut covered: BTreeSet<String> = frame_b
        .records
        .iter()
        .map(|record| record.series_code.clone())
        .collect();
    for record in &partial_records {
        covered.insert(record["series_code"].as_str().unwrap().to_string());
    }
    assert_eq!(covered.len(), 600);

    // B's records carry the original (pre-chunk) code indexes.
    let first = frame_b.records.first().unwrap();
    assert_eq!(first.series_code, "SER0250M01");
    assert_eq!(first.original_code_index, Some(250));
}

#[tokio::test]
async fn test_resume_from_caller_token_matches_one_shot_reference() {
    let dir_a = TempDir::new().unwrap();
    let codes = six_hundred_codes();

    let exchange_a = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 0..250), "202401"))),
        Err(TransportFailure {
            kind: TransportKind::InvalidUrl,
            message: "scripted".to_string(),
            url: None,
        }),
    ]);
    let service_a = data_service(exchange_a, config_with_cache(dir_a.path()), fast_retry());
    service_a
        .get_data_code(split_query(codes.clone()))
        .await
        .unwrap_err();
    let token = incomplete_envelopes(dir_a.path())[0]["payload"]["meta"]["resume_token"]
        .as_str()
        .expect("token in incomplete entry")
        .to_string();

    // Call B runs in a different process (fresh cache dir), continuing
    // purely from the caller-provided token.
    let dir_b = TempDir::new().unwrap();
    let exchange_b = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 250..500), "202401"))),
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 500..600), "202401"))),
    ]);
    let service_b = data_service(exchange_b.clone(), config_with_cache(dir_b.path()), fast_retry());
    let frame_b = service_b
        .get_data_code(split_query(codes.clone()).resume_token(token))
        .await
        .unwrap();
    assert_eq!(exchange_b.calls(), 2);

    // One-shot reference over all three chunks.
    let dir_ref = TempDir::new().unwrap();
    let exchange_ref = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 0..250), "202401"))),
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 250..500), "202401"))),
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&codes, 500..600), "202401"))),
    ]);
    let service_ref = data_service(exchange_ref, config_with_cache(dir_ref.path()), fast_retry());
    let reference = service_ref
        .get_data_code(split_query(codes.clone()))
        .await
        .unwrap();

    // B's records are exactly the reference minus chunk 0, in the same
    // canonical order.
    let reference_tail: Vec<_> = reference
        .records
        .iter()
        .filter(|record| record.original_code_index.unwrap_or(0) >= 250)
        .cloned()
        .collect();
    assert_eq!(frame_b.records, reference_tail);
}

#[tokio::test]
async fn test_token_minted_for_another_request_is_rejected() {
    let dir = TempDir::new().unwrap();
    let exchange_a = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, one_row_per_code(&chunk(&six_hundred_codes(), 0..250), "202401"))),
        Err(TransportFailure {
            kind: TransportKind::InvalidUrl,
            message: "scripted".to_string(),
            url: None,
        }),
    ]);
    let service_a = data_service(exchange_a, config_with_cache(dir.path()), fast_retry());
    service_a
        .get_data_code(split_query(six_hundred_codes()))
        .await
        .unwrap_err();
    let token = incomplete_envelopes(dir.path())[0]["payload"]["meta"]["resume_token"]
        .as_str()
        .unwrap()
        .to_string();

    // Same token, different DB: the fingerprint no longer matches.
    let dir_b = TempDir::new().unwrap();
    let exchange_b = ScriptedExchange::new(vec![]);
    let service_b = data_service(exchange_b, config_with_cache(dir_b.path()), fast_retry());
    let query = CodeQuery::new("FM09", six_hundred_codes())
        .strict_api(false)
        .auto_split_codes(true)
        .resume_token(token);
    let error = service_b.get_data_code(query).await.unwrap_err();
    match error {
        BojError::ResumeTokenMismatch { reason } => {
            assert_eq!(reason, ResumeMismatchReason::FingerprintMismatch)
        }
        other => panic!("expected ResumeTokenMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_token_is_a_validation_error() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![]);
    let service = data_service(exchange, config_with_cache(dir.path()), fast_retry());
    let error = service
        .get_data_code(CodeQuery::new("FM08", ["A01"]).resume_token("!!not-a-token!!"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BojError::Validation {
            code: "resume_token_undecodable",
            ..
        }
    ));
}
