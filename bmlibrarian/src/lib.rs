//! bmlibrarian-core: a durable task queue, worker-pool orchestrator, and
//! multi-agent pipeline for biomedical literature research.
//!
//! # Modules
//!
//! - [`queue`] - durable, priority-ordered task queue
//! - [`orchestrator`] - worker pool that claims tasks and dispatches to agents
//! - [`agents`] - the six specialized agents and their shared base
//! - [`search`] - iterative, adaptively-broadening retrieval
//! - [`pipeline`] - composes the agents into the research and paper-checker flows
//! - [`llm`] - provider-agnostic chat/embedding gateway
//! - [`json_repair`] - best-effort repair of near-miss LLM JSON output
//! - [`backend`] - the external full-text search interface
//! - [`domain`] - shared value types (documents, citations, reports, verdicts, ...)
//! - [`events`] - typed progress-event bus
//! - [`config`] - hierarchical configuration
//! - [`cli`] - command-line interface

pub mod agents;
pub mod backend;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod json_repair;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod search;

pub use config::Config;
pub use error::{BmError, BmResult};
pub use events::{EventBus, ProgressEvent, event_type};
pub use orchestrator::Orchestrator;
pub use pipeline::PipelineController;
pub use queue::TaskQueue;
