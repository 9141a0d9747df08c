//! Harvest pipeline
//!
//! This module wires crawling, persistence and enrichment together:
//! - `parallel`: bounded chunked fan-out used by enrichment
//! - `enricher`: claims documents and applies enrichment outcomes
//! - `status`: periodic progress logging
//! - `site`: the per-site orchestrator
//! - `tenant`: runs every target site concurrently

mod enricher;
mod parallel;
mod status;
mod site;
mod tenant;

pub use enricher::{EnrichmentCounts, Enricher};
pub use parallel::process_in_parallel;
pub use site::{HarvestSettings, SiteHarvestReport, SiteHarvester};
pub use status::StatusReporter;
pub use tenant::{RestHarvesterFactory, SiteHarvesterFactory, TenantHarvestReport, TenantHarvester};
