//! Thread-safe in-memory inventory of one site harvest

use crate::enrichment::EnrichmentData;
use crate::snapshot::model::{Container, DocumentFile, DriveRef, FileKind, FileRecord};
use crate::state::{AnalysisEvent, AnalysisState};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A container that could not be crawled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFailure {
    pub web_url: String,
    pub title: String,
    pub reason: String,
}

/// Derived views served from the memo table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum View {
    All,
    PendingAnalysis,
    InProgress,
    TransientError,
    Complete,
    FatalError,
}

impl View {
    fn matches(self, file: &FileRecord) -> bool {
        let state = file.analysis_state();
        match self {
            Self::All => true,
            Self::PendingAnalysis => state.map(|s| s.is_outstanding()).unwrap_or(false),
            Self::InProgress => state == Some(AnalysisState::InProgress),
            Self::TransientError => state == Some(AnalysisState::TransientError),
            Self::Complete => state == Some(AnalysisState::Complete),
            Self::FatalError => state == Some(AnalysisState::FatalError),
        }
    }
}

struct ContainerFiles {
    container: Container,
    files: Vec<FileRecord>,
}

/// Memoized views tagged with the generation they were computed at
#[derive(Default)]
struct ViewCache {
    generation: u64,
    files: HashMap<View, Arc<Vec<FileRecord>>>,
    document_containers: Option<Arc<Vec<Container>>>,
    state_counts: Option<HashMap<AnalysisState, usize>>,
}

impl ViewCache {
    fn sync(&mut self, generation: u64) {
        if self.generation != generation {
            self.files.clear();
            self.document_containers = None;
            self.state_counts = None;
            self.generation = generation;
        }
    }
}

#[derive(Default)]
struct Inner {
    containers: Vec<ContainerFiles>,
    by_identity: HashMap<(String, String), usize>,
    by_drive: HashMap<String, usize>,
    by_item: HashMap<DriveRef, (usize, usize)>,
    paths: HashSet<String>,
    failures: Vec<ContainerFailure>,
    finished_at: Option<DateTime<Utc>>,
    generation: u64,
    cache: ViewCache,
}

impl Inner {
    fn bump(&mut self) {
        self.generation += 1;
    }

    fn view(&mut self, view: View) -> Arc<Vec<FileRecord>> {
        self.cache.sync(self.generation);
        if let Some(cached) = self.cache.files.get(&view) {
            return Arc::clone(cached);
        }

        let files: Vec<FileRecord> = self
            .containers
            .iter()
            .flat_map(|c| c.files.iter())
            .filter(|f| view.matches(f))
            .cloned()
            .collect();
        let files = Arc::new(files);
        self.cache.files.insert(view, Arc::clone(&files));
        files
    }

    /// Documents per analysis state, counted without copying any file
    fn state_counts(&mut self) -> &HashMap<AnalysisState, usize> {
        self.cache.sync(self.generation);
        let containers = &self.containers;
        self.cache.state_counts.get_or_insert_with(|| {
            let mut counts = HashMap::new();
            for state in containers
                .iter()
                .flat_map(|c| c.files.iter())
                .filter_map(|f| f.analysis_state())
            {
                *counts.entry(state).or_insert(0) += 1;
            }
            counts
        })
    }

    fn container_index(&mut self, container: Container) -> usize {
        let key = (container.title.clone(), container.root_path.clone());
        let idx = match self.by_identity.get(&key) {
            Some(&idx) => {
                self.containers[idx].container.absorb(&container);
                idx
            }
            None => {
                self.containers.push(ContainerFiles {
                    container,
                    files: Vec::new(),
                });
                let idx = self.containers.len() - 1;
                self.by_identity.insert(key, idx);
                idx
            }
        };

        if let Some(drive_id) = self.containers[idx].container.drive_id() {
            self.by_drive.entry(drive_id.to_string()).or_insert(idx);
        }
        idx
    }

    fn document_mut(&mut self, drive: &DriveRef) -> Result<&mut DocumentFile> {
        let container_idx = *self
            .by_drive
            .get(&drive.drive_id)
            .ok_or_else(|| HarvestError::UnknownContainer {
                drive_id: drive.drive_id.clone(),
            })?;

        let unknown_file = || HarvestError::UnknownFile {
            drive_id: drive.drive_id.clone(),
            item_id: drive.item_id.clone(),
        };

        let (c, f) = match self.by_item.get(drive) {
            Some(&(c, f)) if c == container_idx => (c, f),
            _ => return Err(unknown_file()),
        };

        let file = &mut self.containers[c].files[f];
        if let FileKind::Drive(d) = &file.kind {
            let drive = d.clone();
            file.kind = FileKind::Document(DocumentFile::new(drive));
        }
        match &mut file.kind {
            FileKind::Document(doc) => Ok(doc),
            _ => Err(unknown_file()),
        }
    }
}

/// The evolving inventory of one site
///
/// All reads and writes go through one lock. Every mutation bumps a
/// generation counter; derived views are recomputed lazily when the
/// generation they were computed at is stale.
pub struct SiteSnapshot {
    site_url: String,
    started_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for SiteSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSnapshot")
            .field("site_url", &self.site_url)
            .field("started_at", &self.started_at)
            .field("files", &self.file_count())
            .finish()
    }
}

impl SiteSnapshot {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            started_at: Utc::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Mutations =====

    /// Adds a file under its container, creating the container on first sight
    ///
    /// Returns false if a file with the same server-relative path is
    /// already present.
    pub fn add_file(&self, file: FileRecord, container: Container) -> bool {
        let mut inner = self.lock();
        let container_idx = inner.container_index(container);

        if !inner.paths.insert(file.server_relative_path.clone()) {
            inner.bump();
            return false;
        }

        if let Some(drive) = file.drive_ref().cloned() {
            let file_idx = inner.containers[container_idx].files.len();
            inner.by_item.insert(drive, (container_idx, file_idx));
        }
        inner.containers[container_idx].files.push(file);
        inner.bump();
        true
    }

    /// Applies enrichment results to a document and marks it complete
    ///
    /// Repeating an update with the same data leaves the document unchanged.
    pub fn update_file(&self, drive: &DriveRef, data: &EnrichmentData) -> Result<FileRecord> {
        let mut inner = self.lock();
        let doc = inner.document_mut(drive)?;

        let next = doc.state.transition(AnalysisEvent::Succeed)?;
        doc.access_count = Some(data.access.action_count);
        doc.actor_count = Some(data.access.actor_count);
        doc.version_count = Some(data.versions.count);
        doc.versions_size = Some(data.versions.total_size);
        doc.last_error = None;
        doc.state = next;

        let (c, f) = inner.by_item[drive];
        let updated = inner.containers[c].files[f].clone();
        inner.bump();
        Ok(updated)
    }

    /// Claims pending documents for enrichment
    ///
    /// Only documents that are still Pending are moved to InProgress and
    /// returned, so the same document is never handed out twice.
    pub fn begin_analysis(&self, refs: &[DriveRef]) -> Vec<DriveRef> {
        let mut inner = self.lock();
        let mut claimed = Vec::with_capacity(refs.len());

        for drive in refs {
            if let Ok(doc) = inner.document_mut(drive) {
                if let Ok(next) = doc.state.transition(AnalysisEvent::Submit) {
                    doc.state = next;
                    claimed.push(drive.clone());
                }
            }
        }

        if !claimed.is_empty() {
            inner.bump();
        }
        claimed
    }

    /// Records a retryable enrichment failure
    pub fn mark_transient(&self, drive: &DriveRef, reason: &str) -> Result<FileRecord> {
        self.apply_failure(drive, AnalysisEvent::Throttle, reason)
    }

    /// Records a permanent enrichment failure
    pub fn mark_fatal(&self, drive: &DriveRef, reason: &str) -> Result<FileRecord> {
        self.apply_failure(drive, AnalysisEvent::Fail, reason)
    }

    fn apply_failure(
        &self,
        drive: &DriveRef,
        event: AnalysisEvent,
        reason: &str,
    ) -> Result<FileRecord> {
        let mut inner = self.lock();
        let doc = inner.document_mut(drive)?;
        doc.state = doc.state.transition(event)?;
        doc.last_error = Some(reason.to_string());

        let (c, f) = inner.by_item[drive];
        let updated = inner.containers[c].files[f].clone();
        inner.bump();
        Ok(updated)
    }

    /// Moves every TransientError document back to Pending
    pub fn requeue_transient(&self) -> usize {
        let mut inner = self.lock();
        let mut requeued = 0;

        for container in &mut inner.containers {
            for file in &mut container.files {
                if let FileKind::Document(doc) = &mut file.kind {
                    if let Ok(next) = doc.state.transition(AnalysisEvent::Requeue) {
                        doc.state = next;
                        requeued += 1;
                    }
                }
            }
        }

        if requeued > 0 {
            inner.bump();
        }
        requeued
    }

    pub fn record_container_failure(&self, failure: ContainerFailure) {
        let mut inner = self.lock();
        inner.failures.push(failure);
        inner.bump();
    }

    pub fn mark_finished(&self) {
        let mut inner = self.lock();
        inner.finished_at = Some(Utc::now());
        inner.bump();
    }

    // ===== Derived Views =====

    pub fn all_files(&self) -> Arc<Vec<FileRecord>> {
        self.lock().view(View::All)
    }

    /// Documents that still need to be submitted (Pending or TransientError)
    pub fn files_pending_analysis(&self) -> Arc<Vec<FileRecord>> {
        self.lock().view(View::PendingAnalysis)
    }

    pub fn files_in_progress(&self) -> Arc<Vec<FileRecord>> {
        self.lock().view(View::InProgress)
    }

    pub fn files_with_transient_error(&self) -> Arc<Vec<FileRecord>> {
        self.lock().view(View::TransientError)
    }

    pub fn files_complete(&self) -> Arc<Vec<FileRecord>> {
        self.lock().view(View::Complete)
    }

    pub fn files_with_fatal_error(&self) -> Arc<Vec<FileRecord>> {
        self.lock().view(View::FatalError)
    }

    pub fn document_containers(&self) -> Arc<Vec<Container>> {
        let mut inner = self.lock();
        let generation = inner.generation;
        inner.cache.sync(generation);
        if let Some(cached) = &inner.cache.document_containers {
            return Arc::clone(cached);
        }

        let containers: Vec<Container> = inner
            .containers
            .iter()
            .filter(|c| c.container.is_document_library())
            .map(|c| c.container.clone())
            .collect();
        let containers = Arc::new(containers);
        inner.cache.document_containers = Some(Arc::clone(&containers));
        containers
    }

    pub fn containers(&self) -> Vec<Container> {
        self.lock()
            .containers
            .iter()
            .map(|c| c.container.clone())
            .collect()
    }

    pub fn container_failures(&self) -> Vec<ContainerFailure> {
        self.lock().failures.clone()
    }

    /// Looks up a document by its drive address
    pub fn find(&self, drive: &DriveRef) -> Option<FileRecord> {
        let inner = self.lock();
        let &(c, f) = inner.by_item.get(drive)?;
        Some(inner.containers[c].files[f].clone())
    }

    pub fn file_count(&self) -> usize {
        self.lock().paths.len()
    }

    /// Number of Pending or TransientError documents
    pub fn outstanding_count(&self) -> usize {
        self.lock()
            .state_counts()
            .iter()
            .filter(|(state, _)| state.is_outstanding())
            .map(|(_, count)| count)
            .sum()
    }

    /// True when every document is Complete or FatalError
    pub fn analysis_finished(&self) -> bool {
        self.lock()
            .state_counts()
            .iter()
            .all(|(state, count)| *count == 0 || state.is_terminal())
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at().is_some()
    }

    /// Counts documents per analysis state
    pub fn state_counts(&self) -> HashMap<AnalysisState, usize> {
        self.lock().state_counts().clone()
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.lock().generation
    }
}
