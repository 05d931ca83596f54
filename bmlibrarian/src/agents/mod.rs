//! The common agent contract (§4.3) plus the six specialised agents
//! built on top of it.
//!
//! Every agent wraps a [`BaseAgent`], which owns the [`LlmGateway`]
//! handle, a per-agent [`SharedMetrics`] accumulator, and an optional
//! [`EventBus`] for progress reporting. Specialised agents implement
//! [`AgentHandler`] so the orchestrator can dispatch `(method, data)`
//! pairs to them without reflection (§9 design note).

mod base;
mod citation;
mod counterfactual;
mod query;
mod reporting;
mod scoring;
mod verdict;

pub use base::BaseAgent;
pub use citation::CitationFinderAgent;
pub use counterfactual::CounterfactualAgent;
pub use query::QueryAgent;
pub use reporting::ReportingAgent;
pub use scoring::DocumentScoringAgent;
pub use verdict::VerdictAgent;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::PerformanceMetrics;
use crate::error::BmResult;

/// Implemented by every specialised agent so the orchestrator can bind
/// `(target_agent, method)` to a callable at registration time, rather
/// than resolving it dynamically per task (§9 design note).
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Short identifier reported by `get_agent_type()` in the source
    /// design (§4.3).
    fn agent_type(&self) -> &'static str;

    /// Invoke `method` with a JSON object of arguments, returning a JSON
    /// value on success. Unknown methods are a caller bug, not a
    /// retryable failure — implementations return
    /// [`crate::error::BmError::UnknownMethod`].
    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value>;

    fn performance_metrics(&self) -> PerformanceMetrics;
}

pub(crate) fn required_str<'a>(data: &'a Value, field: &str) -> BmResult<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| crate::error::BmError::validation(format!("missing required field: {field}")))
}
