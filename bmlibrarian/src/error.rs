//! Error kinds per the core's error-handling design: each carries enough
//! shape for callers to decide whether to retry, surface, or fail a task.

use thiserror::Error;

/// Top-level error type threaded through the queue, orchestrator, agents,
/// and gateway. Variants map 1:1 onto the error kinds of the design: bad
/// caller input is never recorded as a task failure, storage failures
/// stop new claims until cleared, LLM errors distinguish transient from
/// permanent, and parse/agent failures always terminate the task.
#[derive(Debug, Error)]
pub enum BmError {
    /// Bad arguments from a caller: empty question, negative batch size,
    /// missing required field. Surfaced to the caller directly; never
    /// recorded as a task failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// The queue's backing file is unreadable or unwritable.
    #[error("storage error: {0}")]
    Storage(#[from] bmlibrarian_store::StoreError),

    /// Network timeout, provider rate limit, or 5xx from an LLM backend.
    /// Retried by the gateway with backoff; triggers fallback if retries
    /// are exhausted.
    #[error("transient LLM error: {0}")]
    LlmTransient(String),

    /// Bad request, missing model, or auth failure from an LLM backend.
    /// Surfaced immediately; the owning task transitions to FAILED.
    #[error("permanent LLM error: {0}")]
    LlmPermanent(String),

    /// LLM output could not be parsed, even after repair.
    #[error("parse error: {0}")]
    Parse(String),

    /// An agent method raised/returned an error during execution.
    #[error("agent method error in {agent}.{method}: {message}")]
    AgentMethod {
        agent: String,
        method: String,
        message: String,
    },

    /// The per-call deadline elapsed before the provider responded.
    #[error("LLM call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An operation was requested against an unregistered agent or
    /// unknown method name.
    #[error("no such agent/method: {agent}.{method}")]
    UnknownMethod { agent: String, method: String },
}

impl BmError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn agent_method(agent: impl Into<String>, method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentMethod {
            agent: agent.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    /// Whether the gateway should retry this error against the same
    /// provider before giving up and trying the fallback.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BmError::LlmTransient(_) | BmError::Timeout(_))
    }
}

pub type BmResult<T> = Result<T, BmError>;
