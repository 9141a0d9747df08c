//! Site harvest orchestration
//!
//! This module drives one site through the whole pipeline:
//! - Recording the run and recovering leftover staging batches
//! - Streaming crawl events into the snapshot and the discovery buffer
//! - Persisting discovery batches and enriching them in the background
//! - Draining outstanding documents until every one is terminal

use crate::config::Config;
use crate::crawler::{ContentStore, CrawlEvent, CrawlSummary, SiteCrawler, SiteFilter};
use crate::enrichment::EnrichmentApi;
use crate::harvest::enricher::{EnrichmentCounts, Enricher};
use crate::harvest::status::StatusReporter;
use crate::http::CallCounters;
use crate::snapshot::{DriveRef, SiteSnapshot};
use crate::state::AnalysisState;
use crate::storage::{
    with_storage, RunStatus, SharedStorage, StagedFile, StagingMergeWriter, Storage,
};
use crate::{HarvestError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pipeline tuning of one site harvest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestSettings {
    pub discovery_batch_size: usize,
    pub enrichment_chunk_size: usize,
    pub max_concurrent_chunks: usize,
    pub drain_poll_interval: Duration,
    pub status_interval: Duration,
    pub crawl_queue_capacity: usize,
    pub page_size: u32,
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Self {
        let harvest = &config.harvest;
        Self {
            discovery_batch_size: harvest.discovery_batch_size,
            enrichment_chunk_size: harvest.enrichment_chunk_size,
            max_concurrent_chunks: harvest.max_concurrent_chunks,
            drain_poll_interval: Duration::from_millis(harvest.drain_poll_interval_ms),
            status_interval: Duration::from_millis(harvest.status_interval_ms),
            crawl_queue_capacity: harvest.crawl_queue_capacity,
            page_size: config.content_store.page_size,
        }
    }
}

impl Default for HarvestSettings {
    fn default() -> Self {
        let harvest = crate::config::HarvestConfig::default();
        Self {
            discovery_batch_size: harvest.discovery_batch_size,
            enrichment_chunk_size: harvest.enrichment_chunk_size,
            max_concurrent_chunks: harvest.max_concurrent_chunks,
            drain_poll_interval: Duration::from_millis(harvest.drain_poll_interval_ms),
            status_interval: Duration::from_millis(harvest.status_interval_ms),
            crawl_queue_capacity: harvest.crawl_queue_capacity,
            page_size: crate::config::ContentStoreConfig::default().page_size,
        }
    }
}

/// Outcome of one site harvest
#[derive(Debug, Clone)]
pub struct SiteHarvestReport {
    pub site_url: String,
    pub run_id: i64,
    /// True when the crawl finished and every document is terminal
    pub finished: bool,
    pub files: usize,
    pub documents: usize,
    pub complete: usize,
    pub fatal: usize,
    pub container_failures: usize,
    pub enrichment: EnrichmentCounts,
    /// None if the crawl was cancelled or aborted
    pub crawl: Option<CrawlSummary>,
    pub snapshot: Arc<SiteSnapshot>,
}

/// Files waiting for the next staging write
#[derive(Debug, Default)]
struct PendingBatch {
    files: Vec<StagedFile>,
    refs: Vec<DriveRef>,
}

/// Accumulates discoveries until a batch is full
struct DiscoveryBuffer {
    capacity: usize,
    pending: Mutex<PendingBatch>,
}

impl DiscoveryBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Mutex::new(PendingBatch::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingBatch> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a file; returns the full batch once capacity is reached
    fn push(&self, file: StagedFile, drive: Option<DriveRef>) -> Option<PendingBatch> {
        let mut pending = self.lock();
        pending.files.push(file);
        pending.refs.extend(drive);
        if pending.files.len() >= self.capacity {
            Some(std::mem::take(&mut *pending))
        } else {
            None
        }
    }

    fn take(&self) -> PendingBatch {
        std::mem::take(&mut *self.lock())
    }
}

/// Harvests one site: crawl, persist, enrich
pub struct SiteHarvester {
    site_url: String,
    filter: SiteFilter,
    store: Arc<dyn ContentStore>,
    api: Arc<dyn EnrichmentApi>,
    storage: SharedStorage,
    settings: HarvestSettings,
    config_hash: String,
    clients: Vec<(String, Arc<CallCounters>)>,
}

impl SiteHarvester {
    pub fn new(
        site_url: impl Into<String>,
        filter: SiteFilter,
        store: Arc<dyn ContentStore>,
        api: Arc<dyn EnrichmentApi>,
        storage: SharedStorage,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            site_url: site_url.into(),
            filter,
            store,
            api,
            storage,
            settings,
            config_hash: String::new(),
            clients: Vec::new(),
        }
    }

    /// Config hash recorded on the run row
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Reports the counters of a client in the periodic status line
    pub fn with_client_counters(
        mut self,
        name: impl Into<String>,
        counters: Arc<CallCounters>,
    ) -> Self {
        self.clients.push((name.into(), counters));
        self
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// Runs the harvest until every document is terminal or `cancel` fires
    ///
    /// The run row is completed as `completed`, `interrupted` (cancelled or
    /// unfinished) or `failed` (an error was returned).
    ///
    /// # Returns
    ///
    /// * `Ok(SiteHarvestReport)` - The harvest ended, finished or not
    /// * `Err(HarvestError)` - The crawl root, storage or a worker failed
    pub async fn run(self, cancel: CancellationToken) -> Result<SiteHarvestReport> {
        let site_url = self.site_url.clone();
        let hash = self.config_hash.clone();
        let run_id = with_storage(&self.storage, move |s| s.create_run(&site_url, &hash)).await?;
        tracing::info!("Starting harvest run {} for {}", run_id, self.site_url);

        let result = self.harvest(run_id, &cancel).await;
        let status = match &result {
            Ok(report) if report.finished => RunStatus::Completed,
            Ok(_) => RunStatus::Interrupted,
            Err(_) => RunStatus::Failed,
        };

        if let Err(e) = with_storage(&self.storage, move |s| s.finish_run(run_id, status)).await {
            tracing::warn!("Failed to record end of run {}: {}", run_id, e);
        }

        match &result {
            Ok(report) => tracing::info!(
                "Harvest of {} {}: {} files, {} documents ({} complete, {} fatal)",
                report.site_url,
                status.to_db_string(),
                report.files,
                report.documents,
                report.complete,
                report.fatal
            ),
            Err(e) => tracing::error!("Harvest of {} failed: {}", self.site_url, e),
        }
        result
    }

    async fn harvest(&self, run_id: i64, cancel: &CancellationToken) -> Result<SiteHarvestReport> {
        let writer = StagingMergeWriter::new(Arc::clone(&self.storage));
        let recovered = writer.recover().await?;
        if recovered > 0 {
            tracing::info!("Recovered {} staging batches for {}", recovered, self.site_url);
        }

        let snapshot = Arc::new(SiteSnapshot::new(&self.site_url));
        let enricher = Enricher::new(
            Arc::clone(&snapshot),
            Arc::clone(&self.api),
            Arc::clone(&self.storage),
            self.settings.enrichment_chunk_size,
            self.settings.max_concurrent_chunks,
            cancel.clone(),
        );

        let mut work: JoinSet<Result<()>> = JoinSet::new();

        // Status reporter
        let status_cancel = cancel.child_token();
        let reporter = self.clients.iter().fold(
            StatusReporter::new(Arc::clone(&snapshot), self.settings.status_interval),
            |reporter, (name, counters)| reporter.with_client(name.clone(), Arc::clone(counters)),
        );
        let reporter_cancel = status_cancel.clone();
        work.spawn(async move {
            reporter.run(reporter_cancel).await;
            Ok(())
        });

        // Crawler
        let (events_tx, mut events_rx) = mpsc::channel(self.settings.crawl_queue_capacity.max(1));
        let crawler = SiteCrawler::new(
            Arc::clone(&self.store),
            self.site_url.clone(),
            self.settings.page_size,
        );
        let filter = self.filter.clone();
        let crawl_handle = work.spawn(async move {
            crawler.crawl(&filter, events_tx).await.map(|_| ())
        });

        // Background enrichment of freshly persisted batches
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Vec<DriveRef>>();
        let worker = enricher.clone();
        work.spawn(async move {
            while let Some(batch) = queue_rx.recv().await {
                worker.enrich(batch).await?;
            }
            Ok(())
        });

        let buffer = DiscoveryBuffer::new(self.settings.discovery_batch_size);
        let mut crawl_summary = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Harvest of {} cancelled during discovery", self.site_url);
                    break;
                }
                event = events_rx.recv() => event,
            };

            match event {
                Some(CrawlEvent::FileFound(found)) => {
                    let file = found.file.into_document();
                    let staged = StagedFile::new(&file, &found.container);
                    let drive = file.drive_ref().cloned();
                    if !snapshot.add_file(file, found.container) {
                        continue;
                    }
                    if let Some(batch) = buffer.push(staged, drive) {
                        flush(&writer, batch, &queue_tx).await?;
                    }
                }
                Some(CrawlEvent::ContainerFailed(failure)) => {
                    snapshot.record_container_failure(failure);
                }
                Some(CrawlEvent::Finished(summary)) => {
                    tracing::debug!("Discovery of {} done, draining", self.site_url);
                    crawl_summary = Some(summary);
                    break;
                }
                None => break,
            }
        }

        flush(&writer, buffer.take(), &queue_tx).await?;
        drop(queue_tx);
        drop(events_rx);
        if cancel.is_cancelled() {
            crawl_handle.abort();
        }

        if crawl_summary.is_some() {
            self.drain(&snapshot, &enricher, cancel).await?;
        }

        let finished =
            crawl_summary.is_some() && !cancel.is_cancelled() && snapshot.analysis_finished();
        if finished {
            snapshot.mark_finished();
        }

        status_cancel.cancel();
        join_work(&mut work).await?;

        let counts = snapshot.state_counts();
        let count = |state: AnalysisState| counts.get(&state).copied().unwrap_or(0);
        Ok(SiteHarvestReport {
            site_url: self.site_url.clone(),
            run_id,
            finished,
            files: snapshot.file_count(),
            documents: counts.values().sum(),
            complete: count(AnalysisState::Complete),
            fatal: count(AnalysisState::FatalError),
            container_failures: snapshot.container_failures().len(),
            enrichment: enricher.counts(),
            crawl: crawl_summary,
            snapshot,
        })
    }

    /// Resubmits outstanding documents until every one is terminal
    async fn drain(
        &self,
        snapshot: &SiteSnapshot,
        enricher: &Enricher,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut pass = 0u64;
        while !cancel.is_cancelled() {
            let requeued = snapshot.requeue_transient();
            let pending: Vec<DriveRef> = snapshot
                .files_pending_analysis()
                .iter()
                .filter_map(|f| f.drive_ref().cloned())
                .collect();

            if !pending.is_empty() {
                pass += 1;
                tracing::debug!(
                    "Drain pass {} for {}: {} pending ({} requeued)",
                    pass,
                    self.site_url,
                    pending.len(),
                    requeued
                );
                enricher.enrich(pending).await?;
            }

            if snapshot.analysis_finished() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.drain_poll_interval) => {}
            }
        }
        Ok(())
    }
}

async fn flush(
    writer: &StagingMergeWriter,
    batch: PendingBatch,
    queue: &mpsc::UnboundedSender<Vec<DriveRef>>,
) -> Result<()> {
    if batch.files.is_empty() {
        return Ok(());
    }

    let outcome = writer.write_batch(batch.files).await?;
    tracing::debug!("Persisted {} discovered files", outcome.merged);

    if !batch.refs.is_empty() && queue.send(batch.refs).is_err() {
        tracing::debug!("Enrichment worker stopped, leaving batch to the drain loop");
    }
    Ok(())
}

/// Waits for every task of the work group; returns the first failure
async fn join_work(work: &mut JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;
    while let Some(joined) = work.join_next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => HarvestError::Task(e),
        };
        tracing::warn!("Harvest task failed: {}", error);
        first_error.get_or_insert(error);
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
