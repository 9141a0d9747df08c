//! Applies enrichment results to a site snapshot

use crate::enrichment::EnrichmentApi;
use crate::harvest::parallel::process_in_parallel;
use crate::snapshot::{DriveRef, SiteSnapshot};
use crate::storage::{with_storage, FileStatsRecord, SharedStorage, Storage};
use crate::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Running totals of enrichment outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentCounts {
    pub completed: u64,
    pub transient: u64,
    pub fatal: u64,
}

#[derive(Debug, Default)]
struct Tally {
    completed: AtomicU64,
    transient: AtomicU64,
    fatal: AtomicU64,
}

/// Submits documents to the enrichment API in bounded parallel chunks
///
/// Each chunk claims its documents (Pending → InProgress), fetches
/// analytics and versions for all of them, applies the outcomes to the
/// snapshot and persists the chunk's stats rows in one transaction.
#[derive(Clone)]
pub struct Enricher {
    snapshot: Arc<SiteSnapshot>,
    api: Arc<dyn EnrichmentApi>,
    storage: SharedStorage,
    chunk_size: usize,
    max_concurrent: usize,
    cancel: CancellationToken,
    tally: Arc<Tally>,
}

impl Enricher {
    pub fn new(
        snapshot: Arc<SiteSnapshot>,
        api: Arc<dyn EnrichmentApi>,
        storage: SharedStorage,
        chunk_size: usize,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            snapshot,
            api,
            storage,
            chunk_size,
            max_concurrent,
            cancel,
            tally: Arc::new(Tally::default()),
        }
    }

    pub fn counts(&self) -> EnrichmentCounts {
        EnrichmentCounts {
            completed: self.tally.completed.load(Ordering::SeqCst),
            transient: self.tally.transient.load(Ordering::SeqCst),
            fatal: self.tally.fatal.load(Ordering::SeqCst),
        }
    }

    /// Enriches the given documents
    ///
    /// Documents that are not Pending when their chunk starts are skipped.
    /// Once cancelled, chunks that have not started are skipped too.
    pub async fn enrich(&self, refs: Vec<DriveRef>) -> Result<()> {
        process_in_parallel(refs, self.chunk_size, self.max_concurrent, |chunk, index| {
            self.enrich_chunk(chunk, index)
        })
        .await
    }

    async fn enrich_chunk(&self, chunk: Vec<DriveRef>, index: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let claimed = self.snapshot.begin_analysis(&chunk);
        if claimed.is_empty() {
            return Ok(());
        }
        tracing::trace!("Enrichment chunk {}: {} documents", index, claimed.len());

        let outcomes = self.api.enrich_batch(&claimed).await;

        let mut answered = HashSet::with_capacity(outcomes.len());
        let mut stats = Vec::with_capacity(outcomes.len());
        for (drive, outcome) in outcomes {
            answered.insert(drive.clone());
            let applied = match outcome {
                Ok(data) => {
                    self.tally.completed.fetch_add(1, Ordering::SeqCst);
                    self.snapshot.update_file(&drive, &data)
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!("Enrichment of {} deferred: {}", drive, e);
                    self.tally.transient.fetch_add(1, Ordering::SeqCst);
                    self.snapshot.mark_transient(&drive, &e.to_string())
                }
                Err(e) => {
                    tracing::warn!("Enrichment of {} failed: {}", drive, e);
                    self.tally.fatal.fetch_add(1, Ordering::SeqCst);
                    self.snapshot.mark_fatal(&drive, &e.to_string())
                }
            };

            match applied {
                Ok(file) => stats.extend(FileStatsRecord::from_file(&file)),
                Err(e) => tracing::warn!("Could not apply enrichment of {}: {}", drive, e),
            }
        }

        for drive in claimed.iter().filter(|d| !answered.contains(*d)) {
            self.tally.transient.fetch_add(1, Ordering::SeqCst);
            if let Ok(file) = self.snapshot.mark_transient(drive, "no enrichment result") {
                stats.extend(FileStatsRecord::from_file(&file));
            }
        }

        if !stats.is_empty() {
            with_storage(&self.storage, move |s| s.save_file_stats(&stats)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{AccessStats, VersionSummary};
    use crate::snapshot::{Container, FileKind, FileRecord, SubFolder};
    use crate::state::AnalysisState;
    use crate::storage::{SqliteStorage, StagedFile, StagingMergeWriter};
    use crate::HarvestError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    const SITE: &str = "https://t.example.com/sites/hr";

    /// Succeeds for items starting with "ok", throttles "busy", fails the rest
    struct ScriptedApi;

    #[async_trait]
    impl EnrichmentApi for ScriptedApi {
        async fn item_analytics(&self, item: &DriveRef) -> Result<AccessStats> {
            if item.item_id.starts_with("ok") {
                Ok(AccessStats {
                    action_count: 7,
                    actor_count: 2,
                })
            } else if item.item_id.starts_with("busy") {
                Err(HarvestError::Throttled {
                    url: item.to_string(),
                    attempts: 1,
                })
            } else {
                Err(HarvestError::HttpStatus {
                    url: item.to_string(),
                    status: 500,
                })
            }
        }

        async fn version_history(&self, _item: &DriveRef) -> Result<VersionSummary> {
            Ok(VersionSummary {
                count: 3,
                total_size: 300,
            })
        }
    }

    fn document(item: &str) -> (FileRecord, Container) {
        let mut container = Container::document_library("Documents", "/sites/hr/Documents", SITE);
        container.learn_drive_id("d1");
        let file = FileRecord {
            site_url: SITE.to_string(),
            web_url: SITE.to_string(),
            server_relative_path: format!("/sites/hr/Documents/{}.docx", item),
            author: "ana@example.com".to_string(),
            last_modified: Utc::now(),
            size: 10,
            sub_folder: SubFolder::root(),
            kind: FileKind::Drive(DriveRef::new("d1", item)),
        }
        .into_document();
        (file, container)
    }

    async fn setup(items: &[&str]) -> (Arc<SiteSnapshot>, SharedStorage, Vec<DriveRef>) {
        let snapshot = Arc::new(SiteSnapshot::new(SITE));
        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let mut staged = Vec::new();
        let mut refs = Vec::new();
        for item in items {
            let (file, container) = document(item);
            staged.push(StagedFile::new(&file, &container));
            refs.push(file.drive_ref().unwrap().clone());
            snapshot.add_file(file, container);
        }
        StagingMergeWriter::new(storage.clone())
            .write_batch(staged)
            .await
            .unwrap();
        (snapshot, storage, refs)
    }

    #[tokio::test]
    async fn test_outcomes_map_to_states() {
        let (snapshot, storage, refs) = setup(&["ok-1", "busy-1", "bad-1"]).await;
        let enricher = Enricher::new(
            snapshot.clone(),
            Arc::new(ScriptedApi),
            storage.clone(),
            2,
            2,
            CancellationToken::new(),
        );

        enricher.enrich(refs.clone()).await.unwrap();

        let state = |i: usize| snapshot.find(&refs[i]).unwrap().analysis_state();
        assert_eq!(state(0), Some(AnalysisState::Complete));
        assert_eq!(state(1), Some(AnalysisState::TransientError));
        assert_eq!(state(2), Some(AnalysisState::FatalError));
        assert_eq!(
            enricher.counts(),
            EnrichmentCounts {
                completed: 1,
                transient: 1,
                fatal: 1
            }
        );

        let url = snapshot.find(&refs[0]).unwrap().full_url();
        let stored = storage.lock().unwrap().get_file_stats(&url).unwrap().unwrap();
        assert_eq!(stored.access_count, Some(7));
        assert_eq!(stored.versions_size, Some(300));
        assert_eq!(stored.state, AnalysisState::Complete);
    }

    #[tokio::test]
    async fn test_non_pending_documents_are_not_resubmitted() {
        let (snapshot, storage, refs) = setup(&["ok-1"]).await;
        let enricher = Enricher::new(
            snapshot.clone(),
            Arc::new(ScriptedApi),
            storage,
            10,
            1,
            CancellationToken::new(),
        );

        enricher.enrich(refs.clone()).await.unwrap();
        enricher.enrich(refs).await.unwrap();
        assert_eq!(enricher.counts().completed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_enricher_claims_nothing() {
        let (snapshot, storage, refs) = setup(&["ok-1", "ok-2"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let enricher = Enricher::new(snapshot.clone(), Arc::new(ScriptedApi), storage, 1, 1, cancel);

        enricher.enrich(refs).await.unwrap();
        assert_eq!(snapshot.files_pending_analysis().len(), 2);
        assert_eq!(enricher.counts(), EnrichmentCounts::default());
    }
}
