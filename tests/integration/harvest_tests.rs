//! Integration tests for the harvest pipeline
//!
//! These tests use wiremock to stand in for the content store and the
//! enrichment API and run whole site and tenant harvests against a
//! temporary SQLite database.

use cold_harvest::config::parse_config;
use cold_harvest::crawler::{RestContentStore, SiteFilter};
use cold_harvest::enrichment::GraphEnrichmentClient;
use cold_harvest::harvest::{
    HarvestSettings, RestHarvesterFactory, SiteHarvester, TenantHarvester,
};
use cold_harvest::http::{RetryPolicy, ThrottledClient};
use cold_harvest::snapshot::DriveRef;
use cold_harvest::storage::{open_shared, RunStatus, SharedStorage, Storage};
use cold_harvest::AnalysisState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODIFIED: &str = "2024-03-01T10:00:00Z";

fn doc_item(id: i64, name: &str, item_id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "fileSystemObjectType": "file",
        "modified": MODIFIED,
        "editor": {"email": "ana@example.com"},
        "fileDirRef": "/sites/hr/Documents",
        "fileSize": 100,
        "file": {
            "exists": true,
            "serverRelativeUrl": format!("/sites/hr/Documents/{}", name),
            "driveId": "drv1",
            "itemId": item_id
        }
    })
}

/// Mounts a site with one document library (A, B, C and a folder) and one
/// generic list with a single attachment
async fn mount_site(server: &MockServer, site_path: &str) {
    let site_url = format!("{}{}", server.uri(), site_path);

    Mock::given(method("GET"))
        .and(path(format!("{}/_api/web", site_path)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": site_url,
            "title": "HR",
            "subWebs": []
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/_api/web/lists", site_path)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [
            {"title": "Documents", "baseTemplate": "documentLibrary", "rootFolder": "/sites/hr/Documents"},
            {"title": "Issues", "baseTemplate": "genericList", "rootFolder": "/sites/hr/Lists/Issues"},
            {"title": "Style Library", "hidden": true, "baseTemplate": "documentLibrary", "rootFolder": "/sites/hr/Style Library"}
        ]})))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/_api/web/lists/items", site_path)))
        .and(query_param("list", "Documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                doc_item(1, "a.docx", "A"),
                doc_item(2, "b.docx", "B"),
                doc_item(3, "c.docx", "C"),
                {"id": 4, "fileSystemObjectType": "folder", "fileDirRef": "/sites/hr/Documents"}
            ],
            "changeToken": "tok-1"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/_api/web/lists/items", site_path)))
        .and(query_param("list", "Issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{
            "id": 1,
            "fileSystemObjectType": "file",
            "modified": MODIFIED,
            "editor": {"lookupValue": "Bo Berg"},
            "fileDirRef": "/sites/hr/Lists/Issues",
            "fileSize": 0,
            "attachmentFiles": [
                {"serverRelativeUrl": "/sites/hr/Lists/Issues/Attachments/1/log.txt", "size": 12}
            ]
        }]})))
        .mount(server)
        .await;
}

/// A and B succeed (B only after one 429), C fails with 500
async fn mount_enrichment(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/graph/drives/drv1/items/B/analytics/allTime"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/graph/drives/drv1/items/C/analytics/allTime"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/graph/drives/drv1/items/[A-C]/analytics/allTime$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": {"actionCount": 5, "actorCount": 2}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/graph/drives/drv1/items/[A-C]/versions$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [
            {"id": "1.0", "size": 100},
            {"id": "2.0", "size": 120}
        ]})))
        .mount(server)
        .await;
}

fn test_settings() -> HarvestSettings {
    HarvestSettings {
        discovery_batch_size: 2,
        enrichment_chunk_size: 2,
        max_concurrent_chunks: 2,
        drain_poll_interval: Duration::from_millis(20),
        status_interval: Duration::from_secs(1),
        crawl_queue_capacity: 8,
        page_size: 100,
    }
}

fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        backoff_step: Duration::from_millis(50),
        honor_retry_after: true,
    }
}

fn open_temp_storage(dir: &TempDir) -> SharedStorage {
    open_shared(&dir.path().join("harvest.db")).expect("Failed to open storage")
}

fn site_harvester(server: &MockServer, site_url: &str, storage: SharedStorage) -> SiteHarvester {
    let content = ThrottledClient::new(reqwest::Client::new(), test_policy());
    let enrichment = ThrottledClient::new(reqwest::Client::new(), test_policy().without_retries());
    let api = GraphEnrichmentClient::new(enrichment.clone(), format!("{}/graph", server.uri()));

    SiteHarvester::new(
        site_url,
        SiteFilter::allow_all(),
        Arc::new(RestContentStore::new(content.clone())),
        Arc::new(api),
        storage,
        test_settings(),
    )
    .with_config_hash("test-hash")
    .with_client_counters("content", content.counters())
    .with_client_counters("enrichment", enrichment.counters())
}

#[tokio::test]
async fn test_full_site_harvest() {
    let server = MockServer::start().await;
    mount_site(&server, "/sites/hr").await;
    mount_enrichment(&server).await;

    let dir = TempDir::new().unwrap();
    let storage = open_temp_storage(&dir);
    let site_url = format!("{}/sites/hr", server.uri());

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        site_harvester(&server, &site_url, storage.clone()).run(CancellationToken::new()),
    )
    .await
    .expect("harvest did not finish")
    .expect("harvest failed");

    assert!(report.finished);
    assert_eq!(report.files, 4);
    assert_eq!(report.documents, 3);
    assert_eq!(report.complete, 2);
    assert_eq!(report.fatal, 1);
    assert_eq!(report.container_failures, 0);
    assert_eq!(report.crawl.as_ref().map(|c| c.files), Some(4));

    let snapshot = &report.snapshot;
    assert!(snapshot.is_finished());
    let a = snapshot.find(&DriveRef::new("drv1", "A")).unwrap();
    let b = snapshot.find(&DriveRef::new("drv1", "B")).unwrap();
    let c = snapshot.find(&DriveRef::new("drv1", "C")).unwrap();
    assert_eq!(a.analysis_state(), Some(AnalysisState::Complete));
    assert_eq!(b.analysis_state(), Some(AnalysisState::Complete));
    assert_eq!(c.analysis_state(), Some(AnalysisState::FatalError));
    assert_eq!(b.document().unwrap().access_count, Some(5));
    assert_eq!(b.document().unwrap().versions_size, Some(220));
    assert!(c.document().unwrap().last_error.as_deref().unwrap().contains("500"));

    // the attachment is inventoried but never enriched
    let attachment_url = format!("{}/sites/hr/Lists/Issues/Attachments/1/log.txt", server.uri());
    let guard = storage.lock().unwrap();
    assert_eq!(guard.count_files().unwrap(), 4);
    assert_eq!(guard.count_containers().unwrap(), 2);
    assert!(guard.get_file_by_url(&attachment_url).unwrap().is_some());
    assert!(guard.get_file_stats(&attachment_url).unwrap().is_none());

    let a_stats = guard.get_file_stats(&a.full_url()).unwrap().unwrap();
    assert_eq!(a_stats.state, AnalysisState::Complete);
    assert_eq!(a_stats.access_count, Some(5));
    assert_eq!(a_stats.version_count, Some(2));
    let c_stats = guard.get_file_stats(&c.full_url()).unwrap().unwrap();
    assert_eq!(c_stats.state, AnalysisState::FatalError);

    let run = guard.get_latest_run(&site_url).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
    assert!(guard.pending_staging_batches().unwrap().is_empty());
    drop(guard);

    let requests = server.received_requests().await.unwrap();
    let analytics_calls = |item: &str| {
        let wanted = format!("/graph/drives/drv1/items/{}/analytics/allTime", item);
        requests.iter().filter(|r| r.url.path() == wanted).count()
    };
    assert_eq!(analytics_calls("A"), 1);
    assert_eq!(analytics_calls("B"), 2);
    assert_eq!(analytics_calls("C"), 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let server = MockServer::start().await;
    mount_site(&server, "/sites/hr").await;
    mount_enrichment(&server).await;

    let dir = TempDir::new().unwrap();
    let storage = open_temp_storage(&dir);
    let site_url = format!("{}/sites/hr", server.uri());

    for _ in 0..2 {
        site_harvester(&server, &site_url, storage.clone())
            .run(CancellationToken::new())
            .await
            .expect("harvest failed");
    }

    let guard = storage.lock().unwrap();
    assert_eq!(guard.count_files().unwrap(), 4);
    assert_eq!(guard.count_sites().unwrap(), 1);
    let runs = guard.count_runs_by_status().unwrap();
    assert_eq!(runs.get(&RunStatus::Completed), Some(&2));
}

#[tokio::test]
async fn test_cancelled_harvest_is_interrupted() {
    let server = MockServer::start().await;
    mount_site(&server, "/sites/hr").await;
    mount_enrichment(&server).await;

    let dir = TempDir::new().unwrap();
    let storage = open_temp_storage(&dir);
    let site_url = format!("{}/sites/hr", server.uri());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = site_harvester(&server, &site_url, storage.clone())
        .run(cancel)
        .await
        .expect("harvest failed");

    assert!(!report.finished);
    assert!(!report.snapshot.is_finished());

    let guard = storage.lock().unwrap();
    let run = guard.get_latest_run(&site_url).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_tenant_isolates_failing_site() {
    let server = MockServer::start().await;

    // a site with no lists
    Mock::given(method("GET"))
        .and(path("/sites/good/_api/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("{}/sites/good", server.uri()),
            "subWebs": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites/good/_api/web/lists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&server)
        .await;

    // the root web of this one is gone
    Mock::given(method("GET"))
        .and(path("/sites/gone/_api/web"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tenant.db");
    let config = parse_config(&format!(
        r#"
[harvest]
drain-poll-interval-ms = 20
status-interval-ms = 1000

[http]
max-retries = 1
backoff-step-ms = 10

[enrichment]
base-url = "{}/graph"

[output]
database-path = "{}"
"#,
        server.uri(),
        db_path.display()
    ))
    .expect("Failed to parse config");

    let storage = open_shared(&db_path).unwrap();
    let good = format!("{}/sites/good", server.uri());
    let gone = format!("{}/sites/gone", server.uri());
    {
        let mut guard = storage.lock().unwrap();
        guard.upsert_target_site(&good, None).unwrap();
        guard.upsert_target_site(&gone, Some("not json")).unwrap();
    }

    let factory = RestHarvesterFactory::new(Arc::new(config), "tenant-hash");
    let tenant = TenantHarvester::new(factory, storage.clone());
    let report = tenant.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.sites.len(), 1);
    assert_eq!(report.sites[0].site_url, good);
    assert!(report.sites[0].finished);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, gone);
    assert!(report.failures[0].1.contains("404"));

    let guard = storage.lock().unwrap();
    assert_eq!(
        guard.get_latest_run(&good).unwrap().unwrap().status,
        RunStatus::Completed
    );
    assert_eq!(
        guard.get_latest_run(&gone).unwrap().unwrap().status,
        RunStatus::Failed
    );
}
