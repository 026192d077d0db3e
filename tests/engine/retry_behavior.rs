//! Retry storms: deterministic full-jitter waits, attempt caps, gateway
//! classification.

use std::sync::Arc;
use std::time::Duration;

use bojstat::config::RetryConfig;
use bojstat::error::{BojError, TransportKind};
use bojstat::transport::retry::full_jitter_backoff;
use bojstat::transport::{RateLimiter, RawResponse, Transport, TransportFailure};
use bojstat::{Format, Lang};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use super::support::{page, ScriptedExchange};

fn storm_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        base_delay: 0.5,
        cap_delay: 8.0,
        jitter_ratio: 1.0,
        ..RetryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_storm_waits_match_seeded_full_jitter() {
    const SEED: u64 = 99;
    let exchange = ScriptedExchange::new(vec![
        Ok(page(503, "M181091S", None, None, json!([]))),
        Ok(page(503, "M181091S", None, None, json!([]))),
        Ok(page(503, "M181091S", None, None, json!([]))),
        Ok(page(200, "M181000I", None, None, json!([]))),
    ]);
    let transport = Transport::new(
        exchange.clone(),
        Arc::new(RateLimiter::new(0.0)),
        storm_retry(),
    )
    .with_rng_seed(SEED);

    let started = tokio::time::Instant::now();
    let outcome = transport
        .send("/getDataCode", &[], Lang::En, Format::Json)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome.parsed.status, 200);
    assert_eq!(exchange.calls(), 4, "three failures then one success");

    // With a paused clock, elapsed time is exactly the slept backoff. The
    // three waits are uniform(0, min(cap, base * 2^k)) for k = 0, 1, 2
    // under the same seed.
    let mut rng = StdRng::seed_from_u64(SEED);
    let expected: Duration = (0..3)
        .map(|attempt| full_jitter_backoff(&mut rng, attempt, &storm_retry()))
        .sum();
    let difference = if elapsed > expected {
        elapsed - expected
    } else {
        expected - elapsed
    };
    assert!(
        difference < Duration::from_millis(5),
        "expected ~{expected:?}, observed {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhaust_and_surface_last_failure() {
    let unavailable = || Ok(page(503, "M181091S", None, None, json!([])));
    let exchange = ScriptedExchange::new(vec![
        unavailable(),
        unavailable(),
        unavailable(),
        unavailable(),
        unavailable(),
    ]);
    let transport = Transport::new(
        exchange.clone(),
        Arc::new(RateLimiter::new(0.0)),
        storm_retry(),
    )
    .with_rng_seed(1);

    let error = transport
        .send("/getDataCode", &[], Lang::En, Format::Json)
        .await
        .unwrap_err();
    match error {
        BojError::Unavailable(fault) => assert_eq!(fault.status, Some(503)),
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert_eq!(exchange.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_header_dominates_backoff() {
    let mut throttled = page(200, "M181000I", None, None, json!([]));
    throttled.status = 429;
    throttled.retry_after = Some("30".to_string());
    let exchange = ScriptedExchange::new(vec![
        Ok(throttled),
        Ok(page(200, "M181000I", None, None, json!([]))),
    ]);
    let transport = Transport::new(
        exchange.clone(),
        Arc::new(RateLimiter::new(0.0)),
        storm_retry(),
    )
    .with_rng_seed(1);

    let started = tokio::time::Instant::now();
    transport
        .send("/getDataCode", &[], Lang::En, Format::Json)
        .await
        .unwrap();
    // Backoff for attempt 0 caps at 0.5s; a 30s wait proves Retry-After won.
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(exchange.calls(), 2);
}

#[tokio::test]
async fn test_forbidden_without_retry_after_is_fatal() {
    let mut forbidden = page(200, "M181000I", None, None, json!([]));
    forbidden.status = 403;
    let exchange = ScriptedExchange::new(vec![Ok(forbidden)]);
    let retry = RetryConfig {
        retry_on_403: true,
        ..storm_retry()
    };
    let transport =
        Transport::new(exchange.clone(), Arc::new(RateLimiter::new(0.0)), retry).with_rng_seed(1);

    let error = transport
        .send("/getDataCode", &[], Lang::En, Format::Json)
        .await
        .unwrap_err();
    assert!(matches!(error, BojError::Gateway(_)));
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_503_body_retries_then_gateways() {
    let gateway_page = || {
        Ok(RawResponse {
            status: 503,
            retry_after: None,
            body: b"<html>maintenance</html>".to_vec(),
            final_url: "https://example.invalid/api/v1/getDataCode".to_string(),
        })
    };
    let retry = RetryConfig {
        max_attempts: 2,
        ..storm_retry()
    };
    let exchange = ScriptedExchange::new(vec![gateway_page(), gateway_page()]);
    let transport =
        Transport::new(exchange.clone(), Arc::new(RateLimiter::new(0.0)), retry).with_rng_seed(1);

    let error = transport
        .send("/getDataCode", &[], Lang::En, Format::Json)
        .await
        .unwrap_err();
    match error {
        BojError::Gateway(fault) => {
            assert_eq!(fault.status, Some(503));
            assert_eq!(fault.message_id, "UNPARSEABLE_RESPONSE");
        }
        other => panic!("expected Gateway, got {other:?}"),
    }
    assert_eq!(exchange.calls(), 2);
}

#[tokio::test]
async fn test_unparseable_502_body_is_fatal_immediately() {
    let exchange = ScriptedExchange::new(vec![Ok(RawResponse {
        status: 502,
        retry_after: None,
        body: b"<html>bad gateway</html>".to_vec(),
        final_url: "https://example.invalid/api/v1/getDataCode".to_string(),
    })]);
    let transport = Transport::new(
        exchange.clone(),
        Arc::new(RateLimiter::new(0.0)),
        storm_retry(),
    )
    .with_rng_seed(1);

    let error = transport
        .send("/getDataCode", &[], Lang::En, Format::Json)
        .await
        .unwrap_err();
    assert!(matches!(error, BojError::Gateway(_)));
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn test_fatal_transport_kinds_short_circuit() {
    for kind in [
        TransportKind::InvalidUrl,
        TransportKind::LocalProtocol,
        TransportKind::TlsTrust,
    ] {
        let exchange = ScriptedExchange::new(vec![Err(TransportFailure {
            kind,
            message: "scripted".to_string(),
            url: None,
        })]);
        let transport = Transport::new(
            exchange.clone(),
            Arc::new(RateLimiter::new(0.0)),
            storm_retry(),
        )
        .with_rng_seed(1);
        let error = transport
            .send("/getDataCode", &[], Lang::En, Format::Json)
            .await
            .unwrap_err();
        match error {
            BojError::Transport { kind: observed, .. } => assert_eq!(observed, kind),
            other => panic!("expected Transport, got {other:?}"),
        }
        assert_eq!(exchange.calls(), 1);
    }
}
