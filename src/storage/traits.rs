//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::AnalysisState;
use crate::storage::{
    FileStatsRecord, MergeOutcome, RunRecord, RunStatus, StagedFile, StoredFile, TargetSiteRecord,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Staging batch not found: {0}")]
    BatchNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the harvester.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new harvest run for a site
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, site_url: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run of a site
    fn get_latest_run(&self, site_url: &str) -> StorageResult<Option<RunRecord>>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Target Sites =====

    /// Inserts or updates a configured site
    fn upsert_target_site(&mut self, root_url: &str, filter_json: Option<&str>)
        -> StorageResult<i64>;

    /// Lists every configured site in insertion order
    fn list_target_sites(&self) -> StorageResult<Vec<TargetSiteRecord>>;

    // ===== Staging =====

    /// Bulk-loads files into the staging table under one batch id
    fn insert_staging_batch(&mut self, batch_id: &str, files: &[StagedFile])
        -> StorageResult<usize>;

    /// Merges one staged batch into the normalized tables and deletes it
    ///
    /// Runs in a single transaction; returns the number of file rows
    /// inserted or updated.
    fn merge_staging_batch(&mut self, batch_id: &str) -> StorageResult<usize>;

    /// Stages and merges a batch in one transaction
    fn stage_and_merge(&mut self, batch_id: &str, files: &[StagedFile])
        -> StorageResult<MergeOutcome>;

    /// Batch ids still present in the staging table
    fn pending_staging_batches(&self) -> StorageResult<Vec<String>>;

    /// Deletes a staged batch without merging it
    fn discard_staging_batch(&mut self, batch_id: &str) -> StorageResult<usize>;

    // ===== Files and Stats =====

    /// Gets a normalized file row by its absolute URL
    fn get_file_by_url(&self, url: &str) -> StorageResult<Option<StoredFile>>;

    /// Upserts enrichment results in one transaction
    ///
    /// Returns the number of rows written; stats for unknown URLs are skipped.
    fn save_file_stats(&mut self, stats: &[FileStatsRecord]) -> StorageResult<usize>;

    /// Gets the stored enrichment results of a file
    fn get_file_stats(&self, url: &str) -> StorageResult<Option<FileStatsRecord>>;

    // ===== Statistics =====

    fn count_sites(&self) -> StorageResult<u64>;

    fn count_containers(&self) -> StorageResult<u64>;

    fn count_files(&self) -> StorageResult<u64>;

    /// Counts files per kind ("plain", "drive", "document")
    fn count_files_by_kind(&self) -> StorageResult<HashMap<String, u64>>;

    fn count_stats_by_state(&self) -> StorageResult<HashMap<AnalysisState, u64>>;

    /// Sums access counts over all enriched files
    fn total_access_count(&self) -> StorageResult<u64>;

    fn count_runs_by_status(&self) -> StorageResult<HashMap<RunStatus, u64>>;
}
