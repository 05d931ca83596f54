//! The durable, priority-ordered work queue (§4.1).
//!
//! A [`TaskQueue`] wraps a [`bmlibrarian_store::Store<Task>`] behind a
//! mutex. The store itself documents that it is not safe for concurrent
//! writers sharing one `rusqlite::Connection`; rather than hand each
//! worker its own connection (and reintroduce SQLite's own
//! writer-serialization under the hood) the queue serializes access at
//! the Rust level, which also gives `claim_next` a trivial way to make
//! "select the best pending row, then flip it to processing" atomic:
//! the whole operation holds the lock for its duration.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use bmlibrarian_store::{Filter, FilterOp, IndexValue, Store, now_ms};
use serde_json::Value;

use crate::domain::{Priority, Task, TaskStatus};
use crate::error::{BmError, BmResult};

/// Snapshot of task counts by status, as returned by [`TaskQueue::stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct TaskQueue {
    store: Mutex<Store<Task>>,
}

impl TaskQueue {
    /// Open (or create) a queue backed by the file at `path`.
    pub fn open(path: &Path) -> BmResult<Self> {
        let store = Store::open(path)?;
        Ok(Self { store: Mutex::new(store) })
    }

    /// An ephemeral, in-memory queue. Used by tests and by short-lived
    /// tools that do not need durability across process restarts.
    pub fn open_in_memory() -> BmResult<Self> {
        let store = Store::open_in_memory()?;
        Ok(Self { store: Mutex::new(store) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store<Task>> {
        self.store.lock().expect("task queue store mutex poisoned")
    }

    /// Durably store a new task and make it immediately eligible for
    /// `claim_next` by a worker filtering on `target_agent` (§4.1).
    pub fn enqueue(
        &self,
        target_agent: impl Into<String>,
        method: impl Into<String>,
        data: Value,
        priority: Priority,
        max_attempts: u32,
    ) -> BmResult<String> {
        let target_agent = target_agent.into();
        let method = method.into();
        if target_agent.trim().is_empty() {
            return Err(BmError::validation("target_agent must not be empty"));
        }
        if method.trim().is_empty() {
            return Err(BmError::validation("method must not be empty"));
        }

        let task = Task::new(target_agent, method, data, priority, max_attempts);
        let id = task.id.clone();
        self.lock().insert(&task)?;
        Ok(id)
    }

    /// Claim the oldest `Pending` task whose `target_agent` matches,
    /// breaking ties by `(priority desc, created_at asc)`. Atomically
    /// transitions it to `Processing` and increments `attempts`.
    ///
    /// No two concurrent callers ever receive the same task: the select
    /// and the status flip happen inside one SQLite transaction while
    /// this process holds the queue-wide lock (§8 property 2).
    pub fn claim_next(&self, target_agent: &str) -> BmResult<Option<Task>> {
        let mut store = self.lock();
        let filters = [
            Filter::eq("target_agent", IndexValue::String(target_agent.to_string())),
            Filter::eq("status", IndexValue::String(TaskStatus::Pending.to_string())),
        ];
        // priority desc, created_at asc. Order against `priority_rank`
        // (an integer), not `priority` (its serialized name) — DESC over
        // the lowercase name string does not agree with priority order.
        let order_by = [("priority_rank".to_string(), true), ("created_at".to_string(), false)];

        let mut candidates = store.list_ordered(&filters, &order_by)?;
        let Some(mut task) = candidates.drain(..).next() else {
            return Ok(None);
        };

        task.mark_processing();
        store.upsert(&task)?;
        Ok(Some(task))
    }

    /// Terminal success: populate `result`, clear `error`. A no-op if
    /// the task was already cancelled — an idempotent terminal state
    /// wins over a race with a completing worker (§4.1).
    pub fn complete(&self, task_id: &str, result: Value) -> BmResult<()> {
        self.finish(task_id, |task| task.mark_completed(result))
    }

    /// Terminal failure: populate `error`. Per the default policy
    /// specified in §4.1, `fail` is always terminal — the orchestrator
    /// performs explicit retry by re-enqueueing a fresh task.
    pub fn fail(&self, task_id: &str, error: impl Into<String>) -> BmResult<()> {
        let error = error.into();
        self.finish(task_id, move |task| task.mark_failed(error))
    }

    fn finish(&self, task_id: &str, apply: impl FnOnce(&mut Task)) -> BmResult<()> {
        let store = self.lock();
        let Some(mut task) = store.get(task_id)? else {
            return Err(BmError::validation(format!("no such task: {task_id}")));
        };
        if task.status.is_terminal() {
            return Ok(());
        }
        apply(&mut task);
        store.upsert(&task)?;
        Ok(())
    }

    /// Cancel a task from `Pending` or `Processing`. Idempotent: a task
    /// already in a terminal state keeps that state.
    pub fn cancel(&self, task_id: &str) -> BmResult<()> {
        let store = self.lock();
        let Some(mut task) = store.get(task_id)? else {
            return Err(BmError::validation(format!("no such task: {task_id}")));
        };
        task.mark_cancelled();
        store.upsert(&task)?;
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> BmResult<Option<Task>> {
        Ok(self.lock().get(task_id)?)
    }

    /// Snapshot counts by status, optionally filtered to one agent.
    pub fn stats(&self, target_agent: Option<&str>) -> BmResult<QueueStats> {
        let store = self.lock();
        let mut stats = QueueStats::default();
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let mut filters = vec![Filter::eq("status", IndexValue::String(status.to_string()))];
            if let Some(agent) = target_agent {
                filters.push(Filter::eq("target_agent", IndexValue::String(agent.to_string())));
            }
            let count = store.count(&filters)?;
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Processing => stats.processing = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
                TaskStatus::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }

    /// Remove `Completed`/`Failed`/`Cancelled` tasks last updated more
    /// than `older_than` ago. Returns the number of rows removed.
    pub fn cleanup(&self, older_than: Duration) -> BmResult<usize> {
        let store = self.lock();
        let cutoff = now_ms() - older_than.as_millis() as i64;
        let mut removed = 0;
        for status in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            let filters = [
                Filter::eq("status", IndexValue::String(status.to_string())),
                Filter::new("updated_at", FilterOp::Lt, IndexValue::Int(cutoff)),
            ];
            removed += store.delete_where(&filters)?;
        }
        Ok(removed)
    }

    /// Crash-recovery sweep: every `Processing` task whose `updated_at`
    /// is older than `stale_lease` is either returned to `Pending` (if
    /// attempts remain) or moved to terminal `Failed` with a
    /// "lease-expired" error. Run once at startup, before workers begin
    /// claiming (§4.1 failure model).
    pub fn recover_stale_leases(&self, stale_lease: Duration) -> BmResult<usize> {
        let store = self.lock();
        let cutoff = now_ms() - stale_lease.as_millis() as i64;
        let filters = [
            Filter::eq("status", IndexValue::String(TaskStatus::Processing.to_string())),
            Filter::new("updated_at", FilterOp::Lt, IndexValue::Int(cutoff)),
        ];
        let stale = store.list(&filters)?;
        let count = stale.len();
        for mut task in stale {
            task.recover_stale_lease();
            store.upsert(&task)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> TaskQueue {
        TaskQueue::open_in_memory().unwrap()
    }

    #[test]
    fn enqueue_rejects_empty_identifiers() {
        let q = queue();
        assert!(q.enqueue("", "m", json!({}), Priority::Normal, 3).is_err());
        assert!(q.enqueue("a", "", json!({}), Priority::Normal, 3).is_err());
    }

    #[test]
    fn claim_next_returns_none_on_empty_queue() {
        let q = queue();
        assert!(q.claim_next("query_agent").unwrap().is_none());
    }

    #[test]
    fn claim_next_transitions_to_processing_and_increments_attempts() {
        let q = queue();
        let id = q.enqueue("query_agent", "convert_question", json!({}), Priority::Normal, 3).unwrap();

        let task = q.claim_next("query_agent").unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.attempts, 1);

        assert!(q.claim_next("query_agent").unwrap().is_none());
    }

    #[test]
    fn claim_next_filters_by_target_agent() {
        let q = queue();
        q.enqueue("scoring_agent", "evaluate_document", json!({}), Priority::Normal, 3).unwrap();
        assert!(q.claim_next("query_agent").unwrap().is_none());
    }

    #[test]
    fn priority_beats_fifo_order() {
        let q = queue();
        let low = q.enqueue("a", "m", json!({"n": 1}), Priority::Normal, 3).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let _ = q.enqueue("a", "m", json!({"n": 2}), Priority::Normal, 3).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let urgent = q.enqueue("a", "m", json!({"n": 3}), Priority::Urgent, 3).unwrap();

        let first = q.claim_next("a").unwrap().unwrap();
        assert_eq!(first.id, urgent);

        let second = q.claim_next("a").unwrap().unwrap();
        assert_eq!(second.id, low);
    }

    /// Priority names serialize lowercase (`domain::Priority`); sorting the
    /// *name* string gives `urgent > normal > low > high`, silently
    /// reordering High behind Normal and Low. Exercise all four levels out
    /// of rank order so a regression back to string-ordering fails here.
    #[test]
    fn claim_order_follows_priority_rank_not_serialized_name() {
        let q = queue();
        let normal = q.enqueue("a", "m", json!({"n": 1}), Priority::Normal, 3).unwrap();
        let low = q.enqueue("a", "m", json!({"n": 2}), Priority::Low, 3).unwrap();
        let high = q.enqueue("a", "m", json!({"n": 3}), Priority::High, 3).unwrap();
        let urgent = q.enqueue("a", "m", json!({"n": 4}), Priority::Urgent, 3).unwrap();

        let claimed: Vec<String> = (0..4).map(|_| q.claim_next("a").unwrap().unwrap().id).collect();
        assert_eq!(claimed, vec![urgent, high, normal, low]);
    }

    #[test]
    fn complete_sets_result_and_clears_error() {
        let q = queue();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        q.claim_next("a").unwrap();
        q.complete(&id, json!({"ok": true})).unwrap();

        let task = q.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"ok": true})));
        assert!(task.error.is_none());
    }

    #[test]
    fn fail_sets_error() {
        let q = queue();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        q.claim_next("a").unwrap();
        q.fail(&id, "boom").unwrap();

        let task = q.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_then_complete_is_ignored() {
        let q = queue();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        q.claim_next("a").unwrap();
        q.cancel(&id).unwrap();
        q.complete(&id, json!({"ok": true})).unwrap();

        let task = q.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn stats_counts_by_status() {
        let q = queue();
        q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        q.claim_next("a").unwrap();
        q.complete(&id, json!(null)).unwrap();

        let stats = q.stats(Some("a")).unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn recover_stale_leases_requeues_when_attempts_remain() {
        let q = queue();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        q.claim_next("a").unwrap();

        let recovered = q.recover_stale_leases(Duration::from_millis(0)).unwrap();
        assert_eq!(recovered, 1);

        let task = q.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn recover_stale_leases_fails_when_attempts_exhausted() {
        let q = queue();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 1).unwrap();
        q.claim_next("a").unwrap();

        q.recover_stale_leases(Duration::from_millis(0)).unwrap();
        let task = q.get(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("lease-expired"));
    }

    #[test]
    fn cleanup_removes_only_old_terminal_tasks() {
        let q = queue();
        let id = q.enqueue("a", "m", json!({}), Priority::Normal, 3).unwrap();
        q.claim_next("a").unwrap();
        q.complete(&id, json!(null)).unwrap();

        let removed = q.cleanup(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(q.get(&id).unwrap().is_some());

        let removed = q.cleanup(Duration::from_millis(0)).unwrap();
        assert_eq!(removed, 1);
        assert!(q.get(&id).unwrap().is_none());
    }
}
