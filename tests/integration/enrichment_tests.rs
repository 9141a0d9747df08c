//! Integration tests for the `$batch` enrichment path
//!
//! A wiremock responder answers every sub-request of a batch according to the
//! item id it addresses, so one call can mix successes, throttling, missing
//! sub-responses and hard failures.

use cold_harvest::enrichment::{EnrichmentApi, GraphEnrichmentClient, MAX_BATCH_SUB_REQUESTS};
use cold_harvest::http::{RetryPolicy, ThrottledClient};
use cold_harvest::snapshot::DriveRef;
use cold_harvest::HarvestError;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Answers a sub-request by the item id in its URL
///
/// `ok*` items succeed, `busy*` analytics are throttled, `gone*` items are
/// 404 and `lost*` items get no sub-response at all.
fn answer(sub: &Value) -> Option<Value> {
    let id = sub["id"].as_str().unwrap_or_default();
    let url = sub["url"].as_str().unwrap_or_default();
    let analytics = url.ends_with("/analytics/allTime");

    if url.contains("/items/lost") {
        return None;
    }
    if url.contains("/items/gone") {
        return Some(json!({"id": id, "status": 404, "body": {}}));
    }
    if url.contains("/items/busy") && analytics {
        return Some(json!({
            "id": id,
            "status": 429,
            "headers": {"Retry-After": "1"},
            "body": {}
        }));
    }
    let body = if analytics {
        json!({"access": {"actionCount": 4, "actorCount": 2}})
    } else {
        json!({"value": [{"id": "1.0", "size": 10}, {"id": "2.0", "size": 30}]})
    };
    Some(json!({"id": id, "status": 200, "body": body}))
}

fn batch_reply(request: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
    let responses: Vec<Value> = body["requests"]
        .as_array()
        .map(|subs| subs.iter().filter_map(answer).collect())
        .unwrap_or_default();
    ResponseTemplate::new(200).set_body_json(json!({ "responses": responses }))
}

async fn batch_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/$batch"))
        .respond_with(batch_reply)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    server
}

fn batch_client(server: &MockServer) -> GraphEnrichmentClient {
    let http = ThrottledClient::new(reqwest::Client::new(), RetryPolicy::default().without_retries());
    GraphEnrichmentClient::new(http, server.uri()).with_batch_endpoint(true)
}

fn items(ids: &[&str]) -> Vec<DriveRef> {
    ids.iter().map(|id| DriveRef::new("drv1", *id)).collect()
}

#[tokio::test]
async fn test_batch_outcomes_per_item() {
    let server = batch_server().await;
    let client = batch_client(&server);

    let refs = items(&["ok1", "gone1", "lost1"]);
    let outcomes = client.enrich_batch(&refs).await;
    assert_eq!(outcomes.len(), 3);

    let (first, data) = &outcomes[0];
    assert_eq!(first, &refs[0]);
    let data = data.as_ref().expect("ok item should be enriched");
    assert_eq!(data.access.action_count, 4);
    assert_eq!(data.access.actor_count, 2);
    assert_eq!(data.versions.count, 2);
    assert_eq!(data.versions.total_size, 40);

    match &outcomes[1].1 {
        Err(err @ HarvestError::HttpStatus { status, .. }) => {
            assert_eq!(*status, 404);
            assert!(!err.is_transient());
        }
        other => panic!("expected HttpStatus, got {:?}", other),
    }

    match &outcomes[2].1 {
        Err(err @ HarvestError::BatchRequest { .. }) => assert!(err.is_transient()),
        other => panic!("expected BatchRequest, got {:?}", other),
    }

    // no throttling reported, so the client is not held back
    assert_eq!(client.http().stats().throttled, 0);
}

#[tokio::test]
async fn test_throttled_sub_response_defers_client() {
    let server = batch_server().await;
    let client = batch_client(&server);

    let outcomes = client.enrich_batch(&items(&["busy1"])).await;
    match &outcomes[0].1 {
        Err(err @ HarvestError::Throttled { attempts, .. }) => {
            assert_eq!(*attempts, 1);
            assert!(err.is_transient());
        }
        other => panic!("expected Throttled, got {:?}", other),
    }
    assert_eq!(client.http().stats().throttled, 1);

    let started = Instant::now();
    client
        .http()
        .get_json::<Value>(&format!("{}/ping", server.uri()))
        .await
        .expect("call should succeed");
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_large_batches_are_split() {
    let server = batch_server().await;
    let client = batch_client(&server);

    let ids: Vec<String> = (0..11).map(|n| format!("ok{}", n)).collect();
    let refs: Vec<DriveRef> = ids.iter().map(|id| DriveRef::new("drv1", id.as_str())).collect();
    let outcomes = client.enrich_batch(&refs).await;

    assert_eq!(outcomes.len(), 11);
    for ((item, data), expected) in outcomes.iter().zip(&refs) {
        assert_eq!(item, expected);
        assert!(data.is_ok());
    }

    let posts: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/$batch")
        .collect();
    assert_eq!(posts.len(), 2);

    let sizes: Vec<usize> = posts
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["requests"].as_array().unwrap().len()
        })
        .collect();
    assert_eq!(sizes, vec![MAX_BATCH_SUB_REQUESTS, 2]);
}

#[tokio::test]
async fn test_failed_batch_call_fails_every_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/$batch"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let client = batch_client(&server);

    let outcomes = client.enrich_batch(&items(&["ok1", "ok2"])).await;
    assert_eq!(outcomes.len(), 2);
    for (_, data) in &outcomes {
        match data {
            Err(err @ HarvestError::BatchRequest { message, .. }) => {
                assert!(message.contains("503"));
                assert!(!err.is_transient());
            }
            other => panic!("expected BatchRequest, got {:?}", other),
        }
    }
}
