//! Staged bulk persistence
//!
//! Discovery batches are bulk-inserted into `staging_files` under a fresh
//! batch id, merged into the normalized tables with set-based upserts, and
//! deleted again. All SQLite work runs on the blocking pool.

use crate::storage::{with_storage, MergeOutcome, SharedStorage, StagedFile, Storage};
use crate::Result;
use uuid::Uuid;

/// Writes discovery batches through the staging table
#[derive(Clone)]
pub struct StagingMergeWriter {
    storage: SharedStorage,
}

impl StagingMergeWriter {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Bulk-loads files under a new batch id and returns that id
    pub async fn insert_batch(&self, files: Vec<StagedFile>) -> Result<String> {
        let batch_id = Uuid::new_v4().to_string();
        let id = batch_id.clone();
        with_storage(&self.storage, move |s| s.insert_staging_batch(&id, &files)).await?;
        Ok(batch_id)
    }

    /// Merges a staged batch and removes it from staging
    pub async fn merge_and_clean(&self, batch_id: &str) -> Result<usize> {
        let id = batch_id.to_string();
        with_storage(&self.storage, move |s| s.merge_staging_batch(&id)).await
    }

    /// Stages, merges and cleans a batch atomically
    ///
    /// Either every file of the batch reaches the normalized tables or none
    /// does, and no staging rows are left behind.
    pub async fn write_batch(&self, files: Vec<StagedFile>) -> Result<MergeOutcome> {
        if files.is_empty() {
            return Ok(MergeOutcome {
                batch_id: String::new(),
                staged: 0,
                merged: 0,
            });
        }

        let batch_id = Uuid::new_v4().to_string();
        let outcome =
            with_storage(&self.storage, move |s| s.stage_and_merge(&batch_id, &files)).await?;
        tracing::debug!(
            "Merged staging batch {} ({} files)",
            outcome.batch_id,
            outcome.merged
        );
        Ok(outcome)
    }

    /// Merges batches left behind by an interrupted run
    ///
    /// Returns the number of batches recovered.
    pub async fn recover(&self) -> Result<usize> {
        let pending = with_storage(&self.storage, |s| s.pending_staging_batches()).await?;
        for batch_id in &pending {
            tracing::info!("Merging leftover staging batch {}", batch_id);
            self.merge_and_clean(batch_id).await?;
        }
        Ok(pending.len())
    }
}
