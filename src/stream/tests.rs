use super::*;
use crate::breaker::CircuitState;
use crate::client::TetherClient;
use crate::config::{ClientConfig, PoolConfig, RetryConfig};
use crate::error::ErrorClass;
use crate::rpc::CallOptions;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client() -> TetherClient {
    let mut config = ClientConfig::default()
        .with_retry(RetryConfig::default().with_initial_backoff(Duration::from_millis(5)))
        .with_pool(PoolConfig::default().with_min_size(0))
        .with_call_timeout(Duration::from_secs(5));
    config.registry.probe_interval = Duration::from_secs(3600);
    TetherClient::new(config)
}

fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

#[tokio::test]
async fn yields_items_in_wire_order_then_closes_cleanly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/updates"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(sse_response("data: {\"id\":1}\n\ndata: {\"id\":2}\n\n"))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let mut stream = client.stream("svc", "updates").await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.data, json!({"id": 1}));
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.data, json!({"id": 2}));
    assert!(stream.next().await.is_none());

    // Clean peer close records no circuit failure.
    let breaker = client.shared().breaker_for("svc");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test]
async fn malformed_payload_is_skipped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/updates"))
        .respond_with(sse_response(
            "data: {\"id\":1}\n\ndata: not-json\n\ndata: {\"id\":2}\n\n",
        ))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let stream = client.stream("svc", "updates").await.unwrap();
    let items: Vec<_> = stream.collect().await;
    let values: Vec<_> = items
        .into_iter()
        .map(|item| item.unwrap().into_inner())
        .collect();
    assert_eq!(values, vec![json!({"id": 1}), json!({"id": 2})]);
}

#[tokio::test]
async fn heartbeat_blocks_are_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/updates"))
        .respond_with(sse_response(": keepalive\n\ndata: {\"n\":7}\n\n"))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let stream = client.stream("svc", "updates").await.unwrap();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn unknown_service_and_open_circuit_fail_fast() {
    let client = test_client();
    let err = client.stream("nowhere", "events").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);

    client.register("down", "http://127.0.0.1:1").unwrap();
    let breaker = client.shared().breaker_for("down");
    for _ in 0..5 {
        breaker.record_failure();
    }
    let err = client.stream("down", "events").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::CircuitOpen);
}

#[tokio::test]
async fn establishment_failure_counts_toward_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/secret"))
        .respond_with(ResponseTemplate::new(403).set_body_json(
            json!({"error": {"code": "forbidden", "message": "no"}}),
        ))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let err = client.stream("svc", "secret").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Semantic);
    // Semantic failures count by default policy.
    assert_eq!(client.shared().breaker_for("svc").failure_count(), 1);
}

#[tokio::test]
async fn stream_holds_one_connection_and_drop_releases_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/updates"))
        .respond_with(sse_response("data: {\"id\":1}\n\n"))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let stream = client.stream("svc", "updates").await.unwrap();
    let pool_entry = client.shared().pools.get("svc").unwrap().clone();
    let max = 10; // default max_size
    assert_eq!(pool_entry.pool.available_permits(), max - 1);

    drop(stream);
    assert_eq!(
        pool_entry.pool.available_permits(),
        max,
        "dropping the stream must release its held connection"
    );
}

#[tokio::test]
async fn cancelled_stream_yields_no_further_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/updates"))
        .respond_with(sse_response("data: {\"id\":1}\n\ndata: {\"id\":2}\n\n"))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let cancel = CancellationToken::new();
    let options = CallOptions::new().with_cancellation(cancel.clone());
    let mut stream = client.stream_with("svc", "updates", options).await.unwrap();

    cancel.cancel();
    let item = stream.next().await.unwrap();
    assert!(matches!(item, Err(TetherError::Cancelled)));
    assert!(stream.next().await.is_none());

    // The held connection went back to the pool.
    let pool_entry = client.shared().pools.get("svc").unwrap().clone();
    assert_eq!(pool_entry.pool.available_permits(), 10);
}

#[tokio::test]
async fn client_shutdown_cancels_outstanding_streams() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/updates"))
        .respond_with(sse_response("data: {\"id\":1}\n\n"))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let mut stream = client.stream("svc", "updates").await.unwrap();
    client.shutdown().await;

    let item = stream.next().await.unwrap();
    assert!(matches!(item, Err(TetherError::Cancelled)));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn establishment_timeout_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource/slow"))
        .respond_with(sse_response("data: {}\n\n").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let client = test_client();
    client.register("svc", &server.uri()).unwrap();

    let options = CallOptions::new().with_timeout(Duration::from_millis(100));
    let err = client.stream_with("svc", "slow", options).await.unwrap_err();
    assert!(matches!(err, TetherError::Timeout { .. }));
}
