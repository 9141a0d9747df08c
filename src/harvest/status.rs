//! Periodic progress logging for one site harvest

use crate::http::CallCounters;
use crate::snapshot::SiteSnapshot;
use crate::state::AnalysisState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Logs snapshot totals and client call counters at a fixed interval
pub struct StatusReporter {
    snapshot: Arc<SiteSnapshot>,
    clients: Vec<(String, Arc<CallCounters>)>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(snapshot: Arc<SiteSnapshot>, interval: Duration) -> Self {
        Self {
            snapshot,
            clients: Vec::new(),
            interval,
        }
    }

    /// Adds a named client whose counters are reported
    pub fn with_client(mut self, name: impl Into<String>, counters: Arc<CallCounters>) -> Self {
        self.clients.push((name.into(), counters));
        self
    }

    /// Reports until cancelled, then logs a final line
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.report(),
            }
        }
        self.report();
    }

    pub fn report(&self) {
        let counts = self.snapshot.state_counts();
        let count = |state: AnalysisState| counts.get(&state).copied().unwrap_or(0);

        tracing::info!(
            "{}: {} files, documents: {} pending, {} in progress, {} complete, {} transient, {} fatal",
            self.snapshot.site_url(),
            self.snapshot.file_count(),
            count(AnalysisState::Pending),
            count(AnalysisState::InProgress),
            count(AnalysisState::Complete),
            count(AnalysisState::TransientError),
            count(AnalysisState::FatalError),
        );

        for (name, counters) in &self.clients {
            let stats = counters.snapshot();
            tracing::info!(
                "{} {} calls: {} in flight, {} throttled, {} completed",
                self.snapshot.site_url(),
                name,
                stats.in_flight,
                stats.throttled,
                stats.completed
            );
        }
    }
}
