use crate::crawler::filter::{ListFilter, SiteFilter};
use serde::Deserialize;

/// Main configuration structure for Cold-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "content-store", default)]
    pub content_store: ContentStoreConfig,
    pub enrichment: EnrichmentConfig,
    pub auth: Option<AuthConfig>,
    pub output: OutputConfig,
    #[serde(rename = "site", default)]
    pub sites: Vec<SiteEntry>,
}

/// Harvest pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Files buffered before a staging write and enrichment hand-off
    #[serde(rename = "discovery-batch-size", default = "default_discovery_batch_size")]
    pub discovery_batch_size: usize,

    /// Documents per enrichment chunk
    #[serde(rename = "enrichment-chunk-size", default = "default_enrichment_chunk_size")]
    pub enrichment_chunk_size: usize,

    /// Enrichment chunks allowed in flight at once
    #[serde(rename = "max-concurrent-chunks", default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    /// Pause between drain passes (milliseconds)
    #[serde(rename = "drain-poll-interval-ms", default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,

    /// Interval between progress log lines (milliseconds)
    #[serde(rename = "status-interval-ms", default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Capacity of the crawler → orchestrator event channel
    #[serde(rename = "crawl-queue-capacity", default = "default_crawl_queue_capacity")]
    pub crawl_queue_capacity: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            discovery_batch_size: default_discovery_batch_size(),
            enrichment_chunk_size: default_enrichment_chunk_size(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
            status_interval_ms: default_status_interval_ms(),
            crawl_queue_capacity: default_crawl_queue_capacity(),
        }
    }
}

/// Throttled HTTP client behavior
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Throttled responses tolerated per request before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step used when no Retry-After is given (milliseconds)
    #[serde(rename = "backoff-step-ms", default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Ignore server-provided Retry-After values
    #[serde(rename = "ignore-retry-after", default)]
    pub ignore_retry_after: bool,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            ignore_retry_after: false,
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Content store paging
#[derive(Debug, Clone, Deserialize)]
pub struct ContentStoreConfig {
    /// Items requested per page (at most 5000)
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// Enrichment API endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Base URL, e.g. "https://graph.example.com/v1.0"
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Send each chunk as one JSON `$batch` request
    #[serde(rename = "use-batch-endpoint", default)]
    pub use_batch_endpoint: bool,
}

/// Bearer token source
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the bearer token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Audience requested for content store calls
    #[serde(rename = "content-audience", default)]
    pub content_audience: String,

    /// Audience requested for enrichment calls
    #[serde(rename = "enrichment-audience", default)]
    pub enrichment_audience: String,

    /// Assumed token lifetime (minutes)
    #[serde(rename = "token-lifetime-minutes", default = "default_token_lifetime_minutes")]
    pub token_lifetime_minutes: i64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// A site to harvest, with optional list and folder filters
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    /// Absolute site URL
    pub url: String,

    /// Lists to include; empty means every list
    #[serde(rename = "list", default)]
    pub lists: Vec<ListFilter>,
}

impl SiteEntry {
    pub fn filter(&self) -> SiteFilter {
        SiteFilter {
            lists: self.lists.clone(),
        }
    }
}

fn default_discovery_batch_size() -> usize {
    500
}

fn default_enrichment_chunk_size() -> usize {
    10
}

fn default_max_concurrent_chunks() -> usize {
    10
}

fn default_drain_poll_interval_ms() -> u64 {
    5_000
}

fn default_status_interval_ms() -> u64 {
    30_000
}

fn default_crawl_queue_capacity() -> usize {
    1_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_step_ms() -> u64 {
    2_000
}

fn default_request_timeout_secs() -> u64 {
    100
}

fn default_user_agent() -> String {
    format!("cold-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> u32 {
    5_000
}

fn default_token_lifetime_minutes() -> i64 {
    60
}
