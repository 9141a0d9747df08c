//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `AnalysisState`: Tracks the enrichment state of individual documents
//! - `ThrottleState`: Tracks the shared "do not call before" mark of a throttled API

mod analysis_state;
mod throttle_state;

// Re-export main types
pub use analysis_state::{AnalysisEvent, AnalysisState};
pub use throttle_state::ThrottleState;
