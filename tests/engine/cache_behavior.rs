//! Cache interaction through the driver: complete entries short-circuit,
//! partial entries never satisfy a normal lookup, ForceRefresh bypasses.

use bojstat::config::{CacheConfig, ClientConfig};
use bojstat::{CacheMode, CodeQuery};
use tempfile::TempDir;

use super::support::{
    cache_envelopes, config_with_cache, data_service, fast_retry, flat_rows, page,
    ScriptedExchange,
};

#[tokio::test]
async fn test_complete_result_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![Ok(page(
        200,
        "M181000I",
        None,
        Some("2026-03-04T12:00:00+09:00"),
        flat_rows("FXERD01", 100, 10),
    ))]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());
    let query = || CodeQuery::new("FM08", ["FXERD01"]).period("202401", "202412");

    let first = service.get_data_code(query()).await.unwrap();
    assert_eq!(exchange.calls(), 1);

    // A second service over the same cache directory issues no request.
    let empty_exchange = ScriptedExchange::new(vec![]);
    let cached_service =
        data_service(empty_exchange.clone(), config_with_cache(dir.path()), fast_retry());
    let second = cached_service.get_data_code(query()).await.unwrap();
    assert_eq!(empty_exchange.calls(), 0);
    assert_eq!(second.records, first.records);
    assert_eq!(second.meta.message_id, first.meta.message_id);

    // The stored envelope records the freshness hints.
    let envelopes = cache_envelopes(dir.path());
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["complete"], serde_json::json!(true));
    assert_eq!(
        envelopes[0]["last_update_snapshot"],
        serde_json::json!("20260301")
    );
    assert_eq!(
        envelopes[0]["api_date_observed"],
        serde_json::json!("2026-03-04T12:00:00+09:00")
    );
}

#[tokio::test]
async fn test_different_parameters_miss_each_other() {
    let dir = TempDir::new().unwrap();
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, flat_rows("FXERD01", 100, 1))),
        Ok(page(200, "M181000I", None, None, flat_rows("FXERD01", 100, 1))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());

    service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]).period("202401", "202406"))
        .await
        .unwrap();
    service
        .get_data_code(CodeQuery::new("FM08", ["FXERD01"]).period("202401", "202412"))
        .await
        .unwrap();
    assert_eq!(exchange.calls(), 2, "different periods are different keys");
}

#[tokio::test]
async fn test_force_refresh_bypasses_but_still_stores() {
    let dir = TempDir::new().unwrap();
    let config = ClientConfig {
        cache: CacheConfig {
            dir: Some(dir.path().to_path_buf()),
            mode: CacheMode::ForceRefresh,
            ..CacheConfig::default()
        },
        ..ClientConfig::default()
    };
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", None, None, flat_rows("FXERD01", 100, 1))),
        Ok(page(200, "M181000I", None, None, flat_rows("FXERD01", 100, 1))),
    ]);
    let service = data_service(exchange.clone(), config, fast_retry());
    let query = || CodeQuery::new("FM08", ["FXERD01"]);

    service.get_data_code(query()).await.unwrap();
    service.get_data_code(query()).await.unwrap();
    assert_eq!(exchange.calls(), 2, "ForceRefresh always refetches");
    assert_eq!(cache_envelopes(dir.path()).len(), 1, "store is still updated");
}

#[tokio::test]
async fn test_partial_entry_never_satisfies_a_normal_lookup() {
    let dir = TempDir::new().unwrap();

    // Produce a partial entry via a stalled call.
    let exchange = ScriptedExchange::new(vec![
        Ok(page(200, "M181000I", Some(2), None, flat_rows("FXERD01", 100, 5))),
        Ok(page(200, "M181000I", Some(2), None, flat_rows("FXERD01", 105, 5))),
    ]);
    let service = data_service(exchange.clone(), config_with_cache(dir.path()), fast_retry());
    let query = || CodeQuery::new("FM08", ["FXERD01"]);
    service.get_data_code(query()).await.unwrap_err();

    let envelopes = cache_envelopes(dir.path());
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["complete"], serde_json::json!(false));

    // A follow-up call must not treat the partial entry as a result: it
    // resumes pagination (from the embedded token) instead of returning
    // the cached partial records.
    let followup_exchange = ScriptedExchange::new(vec![Ok(page(
        200,
        "M181000I",
        None,
        None,
        flat_rows("FXERD01", 110, 5),
    ))]);
    let followup =
        data_service(followup_exchange.clone(), config_with_cache(dir.path()), fast_retry());
    let frame = followup.get_data_code(query()).await.unwrap();
    assert_eq!(followup_exchange.calls(), 1, "the engine went back to the wire");
    assert_eq!(frame.records.len(), 5);
}
