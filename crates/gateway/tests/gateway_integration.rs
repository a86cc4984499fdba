//! Gateway behaviour against a mock provider.

use std::sync::Arc;
use std::time::Duration;

use gex_core::{ExposureSource, GatewayConfig};
use gex_gateway::{DataGateway, GatewayError, GatewayState, RetryPolicy, API_KEY_HEADER};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STRIKES_BODY: &str = r#"{
    "spot": 450.0,
    "timestamp": "2024-03-15T14:00:00Z",
    "strikes": [
        {"strike": 440.0, "call_gamma": 0.01, "put_gamma": 0.04, "open_interest": 20000},
        {"strike": 450.0, "call_gamma": 0.05, "put_gamma": 0.05, "open_interest": 30000},
        {"strike": 460.0, "call_gamma": 0.04, "put_gamma": 0.01, "open_interest": 25000}
    ]
}"#;

fn test_config(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        min_interval_secs: 0,
        cache_ttl_secs: 300,
        backoff_ladder_secs: vec![30, 60, 120, 300],
        max_calls_per_minute: 1000,
        per_symbol_calls_per_minute: 1000,
        request_timeout_secs: 5,
        max_wait_secs: 120,
    }
}

fn gateway(server: &MockServer) -> DataGateway {
    let config = test_config(server);
    let state = Arc::new(GatewayState::new(&config));
    DataGateway::new(config, state).unwrap()
}

#[tokio::test]
async fn test_fetch_parses_snapshot_and_sends_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .and(header(API_KEY_HEADER, "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STRIKES_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let snapshot = gateway.fetch("spy").await.unwrap();

    assert_eq!(snapshot.symbol, "SPY");
    assert_eq!(snapshot.spot, 450.0);
    assert_eq!(snapshot.strikes.len(), 3);
}

#[tokio::test]
async fn test_concurrent_fetches_issue_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(STRIKES_BODY)
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let calls = (0..8).map(|_| {
        let gateway = gateway.clone();
        async move { gateway.fetch("SPY").await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(gateway.limiter_snapshot().await.calls_this_minute, 1);
}

#[tokio::test]
async fn test_instances_share_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/QQQ/strikes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STRIKES_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let state = Arc::new(GatewayState::new(&config));
    let first = DataGateway::new(config.clone(), Arc::clone(&state)).unwrap();
    let second = DataGateway::new(config, state).unwrap();

    first.fetch("QQQ").await.unwrap();
    second.fetch("QQQ").await.unwrap();
}

#[tokio::test]
async fn test_rate_limit_on_200_opens_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"error": "Rate limit exceeded"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    match gateway.fetch("SPY").await {
        Err(GatewayError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(30));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    let state = gateway.limiter_snapshot().await;
    assert!(state.circuit_open);
    assert_eq!(state.consecutive_error_count, 1);

    // No request is attempted while the circuit is open
    match gateway.try_fetch("SPY").await {
        Err(GatewayError::CircuitOpen { reopen_in }) => {
            assert!(reopen_in <= Duration::from_secs(30));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_429_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/summary"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway.fetch_summary("SPY").await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_provider_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway.fetch("SPY").await.unwrap_err();
    assert!(matches!(err, GatewayError::ProviderUnavailable(_)));
    assert!(err.is_retryable());
    // A 5xx does not count toward the rate-limit streak
    assert_eq!(gateway.limiter_snapshot().await.consecutive_error_count, 0);
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    match gateway.fetch("SPY").await {
        Err(GatewayError::RequestRejected { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid api key"));
        }
        other => panic!("expected RequestRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    for _ in 0..2 {
        let err = gateway.fetch("SPY").await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse { .. }));
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn test_fetch_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/summary"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"spot": 450.0, "net_exposure": 2.5e9, "flip_price": 445.0}"#,
        ))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let summary = gateway.fetch_summary("SPY").await.unwrap();
    assert_eq!(summary.net_exposure, 2.5e9);
    assert_eq!(summary.flip_price, Some(445.0));
}

#[tokio::test]
async fn test_retry_recovers_after_provider_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STRIKES_BODY))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let policy = RetryPolicy::default()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(10));
    let snapshot = gateway.fetch_with_retry("SPY", &policy).await.unwrap();
    assert_eq!(snapshot.strikes.len(), 3);
}

#[tokio::test]
async fn test_retry_gives_up_on_long_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let policy = RetryPolicy::default()
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1));
    let err = gateway.fetch_with_retry("SPY", &policy).await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { .. }));
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/SPY/strikes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STRIKES_BODY))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    gateway.fetch("SPY").await.unwrap();
    assert_eq!(gateway.invalidate("spy"), 1);
    gateway.fetch("SPY").await.unwrap();
}

#[tokio::test]
async fn test_exposure_source_impl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/IWM/strikes"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let source: &dyn ExposureSource = &gateway;
    let err = source.fetch_snapshot("IWM").await.unwrap_err();
    assert!(err.downcast_ref::<GatewayError>().is_some());
}
