//! Output module for harvest summaries
//!
//! This module handles:
//! - Reading aggregate statistics back from the database
//! - Printing the outcome of a tenant harvest

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics};

use crate::harvest::TenantHarvestReport;

/// Prints one line per harvested site and every site failure
pub fn print_tenant_report(report: &TenantHarvestReport) {
    println!("=== Harvest Report ===\n");

    for site in &report.sites {
        let status = if site.finished { "finished" } else { "unfinished" };
        println!("{} (run {}, {})", site.site_url, site.run_id, status);
        println!(
            "  {} files, {} documents: {} complete, {} fatal",
            site.files, site.documents, site.complete, site.fatal
        );
        if site.container_failures > 0 {
            println!("  {} containers failed", site.container_failures);
        }
    }

    if !report.failures.is_empty() {
        println!();
        println!("Failed Sites ({}):", report.failures.len());
        for (url, reason) in &report.failures {
            println!("  - {}: {}", url, reason);
        }
    }
}
