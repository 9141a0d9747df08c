//! Cold-Harvest: an inventory harvester for throttled content stores
//!
//! This crate crawls a hierarchical remote content store (sites, lists,
//! items), enriches every document with usage and version metadata from a
//! second rate-limited API, and persists the inventory into SQLite through a
//! staged bulk-merge path.

pub mod config;
pub mod crawler;
pub mod enrichment;
pub mod harvest;
pub mod http;
pub mod output;
pub mod snapshot;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Cold-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Throttled by {url} after {attempts} attempt(s)")]
    Throttled { url: String, attempts: u32 },

    #[error("Batch request to {url} failed: {message}")]
    BatchRequest {
        url: String,
        message: String,
        transient: bool,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid JSON from {url}: {source}")]
    Json {
        url: String,
        source: serde_json::Error,
    },

    #[error("Malformed item {item_id} in list '{list}': {reason}")]
    MalformedItem {
        list: String,
        item_id: i64,
        reason: String,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("No document library with drive id {drive_id}")]
    UnknownContainer { drive_id: String },

    #[error("No file with item id {item_id} in drive {drive_id}")]
    UnknownFile { drive_id: String, item_id: String },

    #[error("Invalid analysis transition: {event:?} from {from:?}")]
    InvalidTransition {
        from: state::AnalysisState,
        event: state::AnalysisEvent,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl HarvestError {
    /// Returns true for failures that may succeed when retried later
    ///
    /// Throttling and transport-level failures are transient. Everything
    /// else (unexpected status codes, malformed payloads, storage failures)
    /// is permanent for the request that produced it.
    ///
    /// A `Throttled` error reaching the crawler means the content store retry
    /// ceiling was exhausted; the crawler fails that container regardless of
    /// this flag. Enrichment calls run without retries, so there it only marks
    /// the document for a later pass.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttled { .. } | Self::Http { .. } => true,
            Self::BatchRequest { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while constructing snapshot model values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid sub-folder '{0}': must not start or end with '/' or contain '//'")]
    InvalidSubFolder(String),
}

/// Result type alias for Cold-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{SiteHarvester, TenantHarvester};
pub use snapshot::{Container, FileKind, FileRecord, SiteSnapshot};
pub use state::AnalysisState;
