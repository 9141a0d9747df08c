/// Analysis state definitions for tracking document enrichment
///
/// Every document discovered during a harvest carries one of these states.
/// The enrichment pipeline moves documents through them via [`AnalysisEvent`]s.
use crate::{HarvestError, Result};
use std::fmt;

/// Represents the enrichment progress of a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnalysisState {
    // ===== Active States =====
    /// Discovered, waiting to be submitted for enrichment
    #[default]
    Pending,

    /// Claimed by an enrichment chunk
    InProgress,

    /// Enrichment hit a retryable failure; will be requeued
    TransientError,

    // ===== Terminal States =====
    /// Enrichment data has been applied
    Complete,

    /// Enrichment failed permanently
    FatalError,
}

/// Events that drive [`AnalysisState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisEvent {
    /// Document submitted to the enrichment API
    Submit,
    /// Enrichment data arrived
    Succeed,
    /// Enrichment API throttled or the transport failed
    Throttle,
    /// Enrichment failed in a non-retryable way
    Fail,
    /// Transient failure returned to the pending pool
    Requeue,
}

impl AnalysisState {
    /// Applies an event, returning the next state
    ///
    /// `Succeed` is accepted from every non-fatal state so that applying the
    /// same enrichment result twice is harmless.
    pub fn transition(self, event: AnalysisEvent) -> Result<Self> {
        use AnalysisEvent::*;
        use AnalysisState::*;

        match (self, event) {
            (Pending, Submit) => Ok(InProgress),
            (InProgress, Throttle) => Ok(TransientError),
            (InProgress, Fail) => Ok(FatalError),
            (TransientError, Requeue) => Ok(Pending),
            (Pending | InProgress | TransientError | Complete, Succeed) => Ok(Complete),
            (from, event) => Err(HarvestError::InvalidTransition { from, event }),
        }
    }

    /// Returns true if no further enrichment will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::FatalError)
    }

    /// Returns true if the document still needs to be submitted
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::TransientError)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::TransientError | Self::FatalError)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::TransientError => "transient_error",
            Self::Complete => "complete",
            Self::FatalError => "fatal_error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "transient_error" => Some(Self::TransientError),
            "complete" => Some(Self::Complete),
            "fatal_error" => Some(Self::FatalError),
            _ => None,
        }
    }

    pub fn all_states() -> &'static [AnalysisState] {
        &[
            Self::Pending,
            Self::InProgress,
            Self::TransientError,
            Self::Complete,
            Self::FatalError,
        ]
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
