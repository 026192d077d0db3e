//! Metadata endpoint: catalog normalization, hierarchy headers, caching.

use bojstat::config::ClientConfig;
use bojstat::error::BojError;
use bojstat::MetadataQuery;
use serde_json::json;
use tempfile::TempDir;

use super::support::{
    config_with_cache, fast_retry, metadata_service, page, ScriptedExchange,
};

fn catalog_page() -> bojstat::transport::RawResponse {
    let rows = json!([
        {
            "SERIES_CODE": "",
            "NAME_OF_TIME_SERIES": "Foreign Exchange Rates",
            "LAYER1": "1",
        },
        {
            "SERIES_CODE": "FXERD01",
            "NAME_OF_TIME_SERIES": "Yen/Dollar Spot 9:00",
            "UNIT": "Yen",
            "FREQUENCY": "DAILY",
            "LAYER1": "1",
            "LAYER2": "1",
            "START_OF_THE_TIME_SERIES": "19980105",
            "END_OF_THE_TIME_SERIES": "20260227",
            "LAST_UPDATE": "20260301",
        },
        {
            "SERIES_CODE": "FXERM01",
            "NAME_OF_TIME_SERIES": "Yen/Dollar Monthly Average",
            "FREQUENCY": "MONTHLY",
            "LAYER1": "1",
            "LAYER2": "2",
            "LAST_UPDATE": "20260215",
        }
    ]);
    page(200, "M181000I", None, Some("2026-03-04T12:00:00+09:00"), rows)
}

#[tokio::test]
async fn test_metadata_rows_normalize_with_headers_kept() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![Ok(catalog_page())]);
    let service = metadata_service(exchange, config_with_cache(dir.path()), fast_retry());

    let frame = service.get(MetadataQuery::new("FM08")).await.unwrap();
    assert_eq!(frame.records.len(), 3);
    assert_eq!(frame.records[0].series_code, "");
    assert_eq!(frame.series_codes(), vec!["FXERD01", "FXERM01"]);
    assert_eq!(frame.records[1].layer2.as_deref(), Some("1"));
    assert_eq!(
        frame.records[1].start_of_time_series.as_deref(),
        Some("19980105")
    );
    assert_eq!(frame.meta.date_semantics, "system_data_created_at");
    assert_eq!(frame.meta.next_position, None);

    let daily = frame.find(None, Some("daily"));
    assert_eq!(daily.records.len(), 1);
    assert_eq!(daily.records[0].series_code, "FXERD01");
}

#[tokio::test]
async fn test_metadata_is_cached_per_db() {
    let dir = TempDir::new().unwrap();
    // No DATE on this page: freshness falls back to TTL, keeping the test
    // independent of the wall clock's position relative to the publish
    // window.
    let rows = json!([{ "SERIES_CODE": "FXERD01", "FREQUENCY": "DAILY" },
                      { "SERIES_CODE": "FXERM01", "FREQUENCY": "MONTHLY" },
                      { "SERIES_CODE": "FXERW01", "FREQUENCY": "WEEKLY (WED)" }]);
    let exchange = ScriptedExchange::new(vec![Ok(page(200, "M181000I", None, None, rows))]);
    let service = metadata_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());
    service.get(MetadataQuery::new("FM08")).await.unwrap();
    assert_eq!(exchange.calls(), 1);

    let empty_exchange = ScriptedExchange::new(vec![]);
    let cached =
        metadata_service(empty_exchange.clone(), config_with_cache(dir.path()), fast_retry());
    let frame = cached.get(MetadataQuery::new("FM08")).await.unwrap();
    assert_eq!(empty_exchange.calls(), 0);
    assert_eq!(frame.records.len(), 3);
}

#[tokio::test]
async fn test_strict_freshness_rejects_unparseable_date() {
    let dir = TempDir::new().unwrap();
    let mut body = json!({
        "STATUS": 200,
        "MESSAGEID": "M181000I",
        "MESSAGE": "ok",
        "DATE": "yesterday-ish",
        "RESULTSET": [],
    });
    let raw = bojstat::transport::RawResponse {
        status: 200,
        retry_after: None,
        body: body.take().to_string().into_bytes(),
        final_url: "https://example.invalid/api/v1/getMetadata".to_string(),
    };
    let exchange = ScriptedExchange::new(vec![Ok(raw)]);
    let config = ClientConfig {
        metadata_freshness_strict: true,
        ..config_with_cache(dir.path())
    };
    let service = metadata_service(exchange, config, fast_retry());

    let error = service.get(MetadataQuery::new("FM08")).await.unwrap_err();
    match error {
        BojError::DateParse { raw } => assert_eq!(raw, "yesterday-ish"),
        other => panic!("expected DateParse, got {other:?}"),
    }
}
