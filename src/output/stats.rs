//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! inventory and enrichment statistics from the storage layer.

use crate::state::AnalysisState;
use crate::storage::{RunStatus, Storage};
use crate::Result;
use std::collections::HashMap;

/// Harvest statistics summary
#[derive(Debug, Clone, Default)]
pub struct HarvestStatistics {
    pub sites: u64,

    /// Lists and document libraries
    pub containers: u64,

    pub files: u64,

    /// Files per kind ("plain", "drive", "document")
    pub files_by_kind: HashMap<String, u64>,

    /// Documents per analysis state
    pub documents_by_state: HashMap<AnalysisState, u64>,

    /// Sum of access counts over enriched documents
    pub total_accesses: u64,

    pub runs_by_status: HashMap<RunStatus, u64>,
}

impl HarvestStatistics {
    pub fn documents(&self) -> u64 {
        self.documents_by_state.values().sum()
    }

    pub fn documents_in(&self, state: AnalysisState) -> u64 {
        self.documents_by_state.get(&state).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics> {
    Ok(HarvestStatistics {
        sites: storage.count_sites()?,
        containers: storage.count_containers()?,
        files: storage.count_files()?,
        files_by_kind: storage.count_files_by_kind()?,
        documents_by_state: storage.count_stats_by_state()?,
        total_accesses: storage.total_access_count()?,
        runs_by_status: storage.count_runs_by_status()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Inventory:");
    println!("  Sites: {}", stats.sites);
    println!("  Containers: {}", stats.containers);
    println!("  Files: {}", stats.files);
    let mut kinds: Vec<_> = stats.files_by_kind.iter().collect();
    kinds.sort_by(|a, b| b.1.cmp(a.1));
    for (kind, count) in kinds {
        println!("    {}: {}", kind, count);
    }
    println!();

    println!("Documents by Analysis State:");
    let documents = stats.documents();
    for state in AnalysisState::all_states() {
        let count = stats.documents_in(*state);
        if count == 0 {
            continue;
        }
        let percentage = if documents > 0 {
            (count as f64 / documents as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!("  Total accesses: {}", stats.total_accesses);
    println!();

    if !stats.runs_by_status.is_empty() {
        println!("Runs:");
        let mut runs: Vec<_> = stats.runs_by_status.iter().collect();
        runs.sort_by_key(|(status, _)| status.to_db_string());
        for (status, count) in runs {
            println!("  {}: {}", status.to_db_string(), count);
        }
        println!();
    }

    let complete = stats.documents_in(AnalysisState::Complete);
    let completion = if documents > 0 {
        (complete as f64 / documents as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Enrichment: {:.1}% ({} / {} documents complete)",
        completion, complete, documents
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_totals() {
        let mut documents_by_state = HashMap::new();
        documents_by_state.insert(AnalysisState::Complete, 8);
        documents_by_state.insert(AnalysisState::FatalError, 2);

        let stats = HarvestStatistics {
            files: 12,
            documents_by_state,
            ..Default::default()
        };

        assert_eq!(stats.documents(), 10);
        assert_eq!(stats.documents_in(AnalysisState::Complete), 8);
        assert_eq!(stats.documents_in(AnalysisState::Pending), 0);
    }
}
