//! Document enrichment: usage analytics and version history
//!
//! [`EnrichmentApi`] is the seam between the harvest pipeline and the remote
//! metadata API. [`GraphEnrichmentClient`] is the HTTP implementation.

mod client;

pub use client::{GraphEnrichmentClient, MAX_BATCH_SUB_REQUESTS};

use crate::snapshot::DriveRef;
use crate::Result;
use async_trait::async_trait;

/// All-time access statistics of a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub action_count: u64,
    pub actor_count: u64,
}

/// Aggregate of a document's version history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionSummary {
    pub count: u64,
    pub total_size: u64,
}

/// Everything the enrichment API reports about one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentData {
    pub access: AccessStats,
    pub versions: VersionSummary,
}

/// Per-document enrichment result
pub type EnrichmentOutcome = (DriveRef, Result<EnrichmentData>);

/// Remote API that supplies usage and version metadata
#[async_trait]
pub trait EnrichmentApi: Send + Sync {
    async fn item_analytics(&self, item: &DriveRef) -> Result<AccessStats>;

    async fn version_history(&self, item: &DriveRef) -> Result<VersionSummary>;

    /// Enriches a set of documents; both calls must succeed for a document
    ///
    /// Returns one outcome per input, in input order.
    async fn enrich_batch(&self, items: &[DriveRef]) -> Vec<EnrichmentOutcome> {
        enrich_each(self, items).await
    }
}

/// Issues the analytics and version calls of every item concurrently
pub async fn enrich_each<A>(api: &A, items: &[DriveRef]) -> Vec<EnrichmentOutcome>
where
    A: EnrichmentApi + ?Sized,
{
    let calls = items.iter().map(|item| async move {
        let (access, versions) = tokio::join!(api.item_analytics(item), api.version_history(item));
        let data = access.and_then(|access| {
            versions.map(|versions| EnrichmentData { access, versions })
        });
        (item.clone(), data)
    });
    futures::future::join_all(calls).await
}
