//! Typed progress events and a non-blocking subscriber fan-out (§6,
//! §9 design notes). The source uses loosely-typed callables for
//! progress reporting; here a [`ProgressEvent`] is a plain value and
//! [`EventBus::publish`] never blocks a worker on a slow subscriber —
//! each subscriber gets its own bounded channel, and a full channel
//! just drops the event rather than stalling the publisher.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

/// One of the known event vocabulary entries from §6. Kept as a plain
/// string (not an enum) so agents and the pipeline controller can
/// extend the vocabulary without a central registry, while the well-
/// known names below stay as constants to catch typos at the call site.
pub mod event_type {
    pub const TASK_ENQUEUED: &str = "task.enqueued";
    pub const TASK_CLAIMED: &str = "task.claimed";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const WORKER_STARTED: &str = "worker.started";
    pub const WORKER_STOPPED: &str = "worker.stopped";
    pub const QUEUE_EMPTY: &str = "queue.empty";
    pub const PIPELINE_STAGE_START: &str = "pipeline.stage_start";
    pub const PIPELINE_STAGE_END: &str = "pipeline.stage_end";
    pub const SEARCH_BATCH: &str = "search.batch";
    pub const SEARCH_EXHAUSTED: &str = "search.exhausted";
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub event_type: String,
    pub message: String,
    pub data: Value,
}

impl ProgressEvent {
    pub fn new(event_type: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self { event_type: event_type.into(), message: message.into(), data }
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// A broadcast bus: every `publish` reaches every live subscriber's
/// queue. A subscriber that never drains falls behind and starts
/// missing the oldest events rather than back-pressuring the
/// publisher — exactly the "must not block" contract §4.2 asks for.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        // No subscribers is the common case in tests and one-shot CLI
        // runs; `send` erroring then is expected, not a fault.
        if self.sender.send(event).is_err() {
            warn!("EventBus::publish: no active subscribers");
        }
    }

    pub fn emit(&self, event_type: impl Into<String>, message: impl Into<String>, data: Value) {
        self.publish(ProgressEvent::new(event_type, message, data));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
