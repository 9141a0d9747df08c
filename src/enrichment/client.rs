//! HTTP implementation of the enrichment API

use crate::enrichment::{
    enrich_each, AccessStats, EnrichmentApi, EnrichmentData, EnrichmentOutcome, VersionSummary,
};
use crate::http::ThrottledClient;
use crate::snapshot::DriveRef;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Sub-requests accepted by one `$batch` call
pub const MAX_BATCH_SUB_REQUESTS: usize = 20;

#[derive(Debug, Deserialize)]
struct AnalyticsResponse {
    #[serde(default)]
    access: Option<ActionStat>,
}

#[derive(Debug, Deserialize)]
struct ActionStat {
    #[serde(rename = "actionCount", default)]
    action_count: u64,
    #[serde(rename = "actorCount", default)]
    actor_count: u64,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    #[serde(alias = "value", default)]
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    requests: Vec<BatchSubRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchSubRequest<'a> {
    id: String,
    method: &'a str,
    url: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<BatchSubResponse>,
}

#[derive(Debug, Deserialize)]
struct BatchSubResponse {
    id: String,
    status: u16,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: serde_json::Value,
}

impl From<AnalyticsResponse> for AccessStats {
    fn from(response: AnalyticsResponse) -> Self {
        let access = response.access.unwrap_or(ActionStat {
            action_count: 0,
            actor_count: 0,
        });
        AccessStats {
            action_count: access.action_count,
            actor_count: access.actor_count,
        }
    }
}

impl From<VersionsResponse> for VersionSummary {
    fn from(response: VersionsResponse) -> Self {
        VersionSummary {
            count: response.versions.len() as u64,
            total_size: response.versions.iter().map(|v| v.size).sum(),
        }
    }
}

fn analytics_path(item: &DriveRef) -> String {
    format!(
        "/drives/{}/items/{}/analytics/allTime",
        item.drive_id, item.item_id
    )
}

fn versions_path(item: &DriveRef) -> String {
    format!("/drives/{}/items/{}/versions", item.drive_id, item.item_id)
}

/// Enrichment API client over a throttled HTTP client
pub struct GraphEnrichmentClient {
    http: ThrottledClient,
    base_url: String,
    use_batch: bool,
}

impl GraphEnrichmentClient {
    pub fn new(http: ThrottledClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            use_batch: false,
        }
    }

    /// Sends each batch of documents as one `$batch` request
    pub fn with_batch_endpoint(mut self, enabled: bool) -> Self {
        self.use_batch = enabled;
        self
    }

    pub fn http(&self) -> &ThrottledClient {
        &self.http
    }

    async fn enrich_via_batch(&self, items: &[DriveRef]) -> Vec<EnrichmentOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for chunk in items.chunks(MAX_BATCH_SUB_REQUESTS / 2) {
            outcomes.extend(self.send_batch(chunk).await);
        }
        outcomes
    }

    async fn send_batch(&self, items: &[DriveRef]) -> Vec<EnrichmentOutcome> {
        let url = format!("{}/$batch", self.base_url);
        let mut requests = Vec::with_capacity(items.len() * 2);
        for (i, item) in items.iter().enumerate() {
            requests.push(BatchSubRequest {
                id: format!("{}-analytics", i),
                method: "GET",
                url: analytics_path(item),
            });
            requests.push(BatchSubRequest {
                id: format!("{}-versions", i),
                method: "GET",
                url: versions_path(item),
            });
        }
        let body = BatchRequest { requests };

        let response = match self
            .http
            .execute(&url, |client| client.post(&url).json(&body))
            .await
        {
            Ok(response) => crate::http::decode_json::<BatchResponse>(&url, response).await,
            Err(e) => Err(e),
        };

        let mut responses = match response {
            Ok(batch) => batch
                .responses
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect::<HashMap<_, _>>(),
            Err(e) => {
                tracing::warn!("Batch enrichment request failed: {}", e);
                return items
                    .iter()
                    .map(|item| {
                        let err = HarvestError::BatchRequest {
                            url: url.clone(),
                            message: e.to_string(),
                            transient: e.is_transient(),
                        };
                        (item.clone(), Err(err))
                    })
                    .collect();
            }
        };

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let access = self.sub_response::<AnalyticsResponse>(
                    responses.remove(&format!("{}-analytics", i)),
                    &analytics_path(item),
                );
                let versions = self.sub_response::<VersionsResponse>(
                    responses.remove(&format!("{}-versions", i)),
                    &versions_path(item),
                );
                let data = access.and_then(|access| {
                    versions.map(|versions| EnrichmentData {
                        access: access.into(),
                        versions: versions.into(),
                    })
                });
                (item.clone(), data)
            })
            .collect()
    }

    fn sub_response<T>(&self, response: Option<BatchSubResponse>, path: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = response.ok_or_else(|| HarvestError::BatchRequest {
            url: url.clone(),
            message: "sub-response missing from batch reply".to_string(),
            transient: true,
        })?;

        if response.status == 429 {
            let wait = response
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
                .and_then(|(_, v)| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            self.http.defer(self.http.policy().backoff(1, wait));
            return Err(HarvestError::Throttled { url, attempts: 1 });
        }

        if !(200..300).contains(&response.status) {
            return Err(HarvestError::HttpStatus {
                url,
                status: response.status,
            });
        }

        serde_json::from_value(response.body).map_err(|source| HarvestError::Json { url, source })
    }
}

#[async_trait]
impl EnrichmentApi for GraphEnrichmentClient {
    async fn item_analytics(&self, item: &DriveRef) -> Result<AccessStats> {
        let url = format!("{}{}", self.base_url, analytics_path(item));
        let response: AnalyticsResponse = self.http.get_json(&url).await?;
        Ok(response.into())
    }

    async fn version_history(&self, item: &DriveRef) -> Result<VersionSummary> {
        let url = format!("{}{}", self.base_url, versions_path(item));
        let response: VersionsResponse = self.http.get_json(&url).await?;
        Ok(response.into())
    }

    async fn enrich_batch(&self, items: &[DriveRef]) -> Vec<EnrichmentOutcome> {
        if self.use_batch {
            self.enrich_via_batch(items).await
        } else {
            enrich_each(self, items).await
        }
    }
}
