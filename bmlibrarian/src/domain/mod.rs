//! Domain types shared across the queue, orchestrator, and agents.
//!
//! Every persisted entity implements [`bmlibrarian_store::Record`]; the
//! rest are plain value types produced and consumed by specific agents.

mod citation;
mod counterfactual;
mod document;
mod id;
mod metrics;
mod priority;
mod reference;
mod report;
mod scoring;
mod task;
mod verdict;

pub use citation::Citation;
pub use counterfactual::{ConfidenceLevel, CounterfactualAnalysis, CounterfactualQuestion, QuestionPriority};
pub use document::Document;
pub use id::generate_task_id;
pub use metrics::{CallTimer, CallUsage, PerformanceMetrics, SharedMetrics};
pub use priority::Priority;
pub use reference::{Reference, build_references};
pub use report::{EvidenceStrength, Report, assess_evidence_strength, extract_markers};
pub use scoring::ScoringResult;
pub use task::{Task, TaskStatus};
pub use verdict::{Confidence, Verdict, VerdictOutcome, aggregate_verdicts};

// Re-export the generic store types for convenience, so callers reach
// for `bmlibrarian::domain::{Store, Filter, ...}` without a second crate
// import.
pub use bmlibrarian_store::{Filter, FilterOp, IndexValue, Record, Store};
