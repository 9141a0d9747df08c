//! Integration tests for the throttled HTTP client
//!
//! These tests use wiremock to serve throttled responses and check the
//! waits, retry ceiling and counters of `ThrottledClient`.

use cold_harvest::http::{RetryPolicy, ThrottledClient};
use cold_harvest::HarvestError;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(policy: RetryPolicy) -> ThrottledClient {
    ThrottledClient::new(reqwest::Client::new(), policy)
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_step: Duration::from_millis(10),
        honor_retry_after: true,
    }
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok": true}"#))
        .mount(&mock_server)
        .await;

    let client = client(RetryPolicy::default());
    let url = format!("{}/items", mock_server.uri());

    let started = Instant::now();
    let body: serde_json::Value = client.get_json(&url).await.expect("call should succeed");
    let elapsed = started.elapsed();

    assert_eq!(body["ok"], true);
    assert!(
        elapsed >= Duration::from_secs(3),
        "retried after {:?}, expected at least 3s",
        elapsed
    );

    let stats = client.stats();
    assert_eq!(stats.throttled, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_retry_ceiling_returns_throttled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let client = client(fast_policy(2));
    let url = format!("{}/busy", mock_server.uri());

    // still transient by kind; a crawler treats it as fatal for the container
    match client.get_json::<serde_json::Value>(&url).await {
        Err(err @ HarvestError::Throttled { .. }) => {
            assert!(matches!(err, HarvestError::Throttled { attempts: 3, .. }));
            assert!(err.is_transient());
        }
        other => panic!("expected Throttled, got {:?}", other),
    }

    let stats = client.stats();
    assert_eq!(stats.throttled, 3);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.in_flight, 0);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_throttle_delays_every_clone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&mock_server)
        .await;

    let first = client(RetryPolicy::default().without_retries());
    let second = first.clone();

    let result = first
        .get_json::<serde_json::Value>(&format!("{}/slow", mock_server.uri()))
        .await;
    assert!(matches!(result, Err(HarvestError::Throttled { attempts: 1, .. })));

    let started = Instant::now();
    second
        .get_json::<serde_json::Value>(&format!("{}/fast", mock_server.uri()))
        .await
        .expect("call should succeed");
    assert!(started.elapsed() >= Duration::from_millis(900));

    // clones share counters
    assert_eq!(first.stats().throttled, 1);
    assert_eq!(first.stats().completed, 1);
}

#[tokio::test]
async fn test_other_statuses_are_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = client(fast_policy(5));
    let url = format!("{}/missing", mock_server.uri());

    match client.get_json::<serde_json::Value>(&url).await {
        Err(HarvestError::HttpStatus { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected HttpStatus, got {:?}", other),
    }

    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    assert_eq!(client.stats().throttled, 0);
}

#[tokio::test]
async fn test_transport_failure_is_transient() {
    let client = client(fast_policy(1));
    let err = client
        .get_json::<serde_json::Value>("http://127.0.0.1:1/unreachable")
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Http { .. }));
    assert!(err.is_transient());
    assert_eq!(client.stats().in_flight, 0);
}
