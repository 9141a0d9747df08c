//! Storage module for persisting harvest data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Run tracking and configured target sites
//! - The staging table and its set-based merge into the normalized tables
//! - Per-file enrichment results

mod schema;
mod sqlite;
pub mod staging;
mod traits;

pub use sqlite::SqliteStorage;
pub use staging::StagingMergeWriter;
pub use traits::{Storage, StorageError, StorageResult};

use crate::snapshot::{Container, FileKind, FileRecord};
use crate::state::AnalysisState;
use crate::{HarvestError, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage handle shared between async tasks
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Opens a storage database wrapped for sharing across tasks
pub fn open_shared(path: &Path) -> Result<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Runs a storage operation on the blocking pool
pub async fn with_storage<T, F>(storage: &SharedStorage, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteStorage) -> StorageResult<T> + Send + 'static,
{
    let storage = Arc::clone(storage);
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = storage.lock().map_err(|_| StorageError::Poisoned)?;
        op(&mut guard)
    })
    .await?;
    result.map_err(HarvestError::from)
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub site_url: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A configured site to harvest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSiteRecord {
    pub id: i64,
    pub root_url: String,
    pub filter_json: Option<String>,
}

/// One row of the staging table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub site_url: String,
    pub web_url: String,
    pub container_title: String,
    pub container_root: String,
    pub container_kind: String,
    pub container_drive_id: Option<String>,
    pub delta_token: Option<String>,
    pub url: String,
    pub server_relative_path: String,
    pub sub_folder: String,
    pub author: String,
    pub last_modified: String,
    pub size: i64,
    pub kind: String,
    pub drive_id: Option<String>,
    pub item_id: Option<String>,
}

impl StagedFile {
    /// Projects a discovered file and its container into a staging row
    pub fn new(file: &FileRecord, container: &Container) -> Self {
        let drive = file.drive_ref();
        Self {
            site_url: file.site_url.clone(),
            web_url: file.web_url.clone(),
            container_title: container.title.clone(),
            container_root: container.root_path.clone(),
            container_kind: container.kind.to_db_string().to_string(),
            container_drive_id: container.drive_id().map(str::to_string),
            delta_token: container.delta_token().map(str::to_string),
            url: file.full_url(),
            server_relative_path: file.server_relative_path.clone(),
            sub_folder: file.sub_folder.as_str().to_string(),
            author: file.author.clone(),
            last_modified: file.last_modified.to_rfc3339(),
            size: i64::try_from(file.size).unwrap_or(i64::MAX),
            kind: file.kind.to_db_string().to_string(),
            drive_id: drive.map(|d| d.drive_id.clone()),
            item_id: drive.map(|d| d.item_id.clone()),
        }
    }
}

/// A row of the normalized `files` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: i64,
    pub container_id: i64,
    pub web_id: i64,
    pub url: String,
    pub sub_folder: String,
    pub author: String,
    pub last_modified: String,
    pub size: i64,
    pub kind: String,
    pub drive_id: Option<String>,
    pub item_id: Option<String>,
}

/// Enrichment results of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatsRecord {
    pub url: String,
    pub access_count: Option<i64>,
    pub actor_count: Option<i64>,
    pub version_count: Option<i64>,
    pub versions_size: Option<i64>,
    pub state: AnalysisState,
    pub last_error: Option<String>,
}

impl FileStatsRecord {
    /// Builds the stats row of a document; None for non-documents
    pub fn from_file(file: &FileRecord) -> Option<Self> {
        let doc = match &file.kind {
            FileKind::Document(doc) => doc,
            _ => return None,
        };
        let to_i64 = |v: Option<u64>| v.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
        Some(Self {
            url: file.full_url(),
            access_count: to_i64(doc.access_count),
            actor_count: to_i64(doc.actor_count),
            version_count: to_i64(doc.version_count),
            versions_size: to_i64(doc.versions_size),
            state: doc.state,
            last_error: doc.last_error.clone(),
        })
    }
}

/// Result of staging and merging one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub batch_id: String,
    pub staged: usize,
    pub merged: usize,
}
