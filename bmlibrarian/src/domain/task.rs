//! The durable unit of work handed from a submitter to a worker through
//! the [`crate::queue::TaskQueue`].

use bmlibrarian_store::{Record, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::generate_task_id;
use super::priority::Priority;

/// Lifecycle status of a [`Task`]. Exactly one status holds at any
/// instant (§3 invariant i). Transitions: `Pending -> Processing`;
/// `Processing -> {Completed, Failed}` or back to `Pending` on an
/// explicit retry; `Completed`/`Failed`/`Cancelled` are terminal unless
/// explicitly requeued by an admin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// A durable unit of work: "invoke `method` on `target_agent` with
/// `data`". See §3 of the design for the full invariant set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub target_agent: String,
    pub method: String,
    pub data: Value,
    pub priority: Priority,
    /// `priority.rank()`, duplicated into the body so `claim_next` can
    /// order pending tasks via `json_extract` on an integer: `Priority`
    /// itself serializes to its lowercase name, and sorting that string
    /// does not agree with priority order (`"high" > "low" > "normal" >
    /// "urgent"` lexicographically).
    pub priority_rank: i64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(target_agent: impl Into<String>, method: impl Into<String>, data: Value, priority: Priority, max_attempts: u32) -> Self {
        let now = now_ms();
        Self {
            id: generate_task_id(),
            target_agent: target_agent.into(),
            method: method.into(),
            data,
            priority_rank: priority.rank(),
            priority,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition Pending -> Processing, incrementing the attempt count.
    /// Called exactly once by `claim_next`, inside the same transaction
    /// that selected this row, so the increment and the status write are
    /// atomic with respect to other claimants.
    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.attempts += 1;
        self.updated_at = now_ms();
    }

    /// Terminal success. A completed task always has a result and no
    /// error (§3 invariant ii).
    pub fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.updated_at = now_ms();
    }

    /// Terminal failure. A failed task always has an error and may keep
    /// whatever result (normally none) was already set (§3 invariant iii).
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now_ms();
    }

    /// Idempotent cancellation: a terminal state always wins, so calling
    /// this on an already-terminal task is a no-op.
    pub fn mark_cancelled(&mut self) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Cancelled;
            self.updated_at = now_ms();
        }
    }

    /// Sweep a stale `Processing` task back to `Pending` (if attempts
    /// remain) or to terminal `Failed` with a lease-expired error.
    pub fn recover_stale_lease(&mut self) {
        if self.attempts < self.max_attempts {
            self.status = TaskStatus::Pending;
            self.updated_at = now_ms();
        } else {
            self.mark_failed("lease-expired");
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending() {
        let task = Task::new("query_agent", "convert_question", serde_json::json!({}), Priority::Normal, 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn mark_processing_increments_attempts() {
        let mut task = Task::new("a", "m", serde_json::json!({}), Priority::Normal, 3);
        task.mark_processing();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.attempts, 1);
    }

    #[test]
    fn mark_completed_clears_error() {
        let mut task = Task::new("a", "m", serde_json::json!({}), Priority::Normal, 3);
        task.mark_processing();
        task.error = Some("stale".to_string());
        task.mark_completed(serde_json::json!({"ok": true}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error.is_none());
        assert!(task.result.is_some());
    }

    #[test]
    fn cancel_is_idempotent_after_terminal() {
        let mut task = Task::new("a", "m", serde_json::json!({}), Priority::Normal, 3);
        task.mark_completed(serde_json::json!(null));
        let updated_before = task.updated_at;
        task.mark_cancelled();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.updated_at, updated_before);
    }

    #[test]
    fn stale_lease_recovers_to_pending_while_attempts_remain() {
        let mut task = Task::new("a", "m", serde_json::json!({}), Priority::Normal, 3);
        task.mark_processing();
        task.recover_stale_lease();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn stale_lease_fails_when_attempts_exhausted() {
        let mut task = Task::new("a", "m", serde_json::json!({}), Priority::Normal, 1);
        task.mark_processing();
        task.recover_stale_lease();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("lease-expired"));
    }

    #[test]
    fn priority_rank_matches_priority_and_outranks_lexicographic_name_order() {
        let task = Task::new("scoring_agent", "evaluate_document", serde_json::json!({}), Priority::Urgent, 3);
        assert_eq!(task.priority_rank, 3);
        // "high" < "low" < "normal" < "urgent" lexicographically, but
        // High must still outrank Low and Normal numerically.
        let high = Task::new("a", "m", serde_json::json!({}), Priority::High, 3);
        let low = Task::new("a", "m", serde_json::json!({}), Priority::Low, 3);
        assert!(high.priority_rank > low.priority_rank);
    }
}
