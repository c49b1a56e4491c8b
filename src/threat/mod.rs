//! Content threat scoring.
//!
//! [`ThreatEngine::analyze`] runs an ordered battery of checks over one input
//! string: compiled signature rules first, then statistical anomaly checks.
//! Every matched check adds its configured score once.

mod engine;
mod rules;
pub mod stats;

pub use engine::{ThreatAnalysisContext, ThreatAnalysisResult, ThreatDetail, ThreatEngine};
pub use rules::ThreatType;
