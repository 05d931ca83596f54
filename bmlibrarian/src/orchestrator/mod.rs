//! The worker pool that drains the [`crate::queue::TaskQueue`] and
//! dispatches claimed tasks to registered agents (§4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agents::AgentHandler;
use crate::config::OrchestratorConfig;
use crate::domain::{Priority, Task, TaskStatus};
use crate::error::BmResult;
use crate::events::{EventBus, ProgressEvent, event_type};
use crate::queue::TaskQueue;

/// One unit of work for [`Orchestrator::submit_batch`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub target_agent: String,
    pub method: String,
    pub data: Value,
    pub priority: Priority,
    pub max_attempts: u32,
}

impl SubmitRequest {
    pub fn new(target_agent: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
        Self { target_agent: target_agent.into(), method: method.into(), data, priority: Priority::Normal, max_attempts: 3 }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

type Registry = RwLock<HashMap<String, Arc<dyn AgentHandler>>>;

pub struct Orchestrator {
    queue: Arc<TaskQueue>,
    registry: Arc<Registry>,
    config: OrchestratorConfig,
    events: EventBus,
    running: Arc<AtomicBool>,
    in_flight: Arc<Mutex<std::collections::HashSet<String>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(queue: Arc<TaskQueue>, config: OrchestratorConfig) -> Self {
        Self {
            queue,
            registry: Arc::new(RwLock::new(HashMap::new())),
            config,
            events: EventBus::new(),
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(Mutex::new(std::collections::HashSet::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Binds `name` to an agent. Names are unique; re-registration
    /// replaces the binding (§4.2).
    pub fn register_agent(&self, name: impl Into<String>, agent: Arc<dyn AgentHandler>) {
        self.registry.write().expect("registry lock poisoned").insert(name.into(), agent);
    }

    /// Registers an observer invoked with every [`ProgressEvent`] this
    /// orchestrator publishes. Runs on its own task, so a slow or
    /// panicking callback can never block a worker (§4.2).
    pub fn add_progress_callback<F>(&self, callback: F)
    where
        F: Fn(ProgressEvent) + Send + 'static,
    {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                callback(event);
            }
        });
    }

    pub fn submit(&self, target_agent: impl Into<String>, method: impl Into<String>, data: Value, priority: Priority, max_attempts: u32) -> BmResult<String> {
        let target_agent = target_agent.into();
        let method = method.into();
        let id = self.queue.enqueue(target_agent.clone(), method.clone(), data, priority, max_attempts)?;
        self.events.emit(event_type::TASK_ENQUEUED, format!("enqueued {target_agent}.{method}"), json!({ "task_id": id }));
        Ok(id)
    }

    pub fn submit_batch(&self, requests: Vec<SubmitRequest>) -> BmResult<Vec<String>> {
        requests.into_iter().map(|r| self.submit(r.target_agent, r.method, r.data, r.priority, r.max_attempts)).collect()
    }

    /// Blocks (async) until every named task reaches a terminal status
    /// or `timeout` elapses, polling with exponential backoff capped at
    /// 500ms. Returns whatever is known at that point (§4.2).
    pub async fn wait(&self, task_ids: &[String], timeout: Duration) -> HashMap<String, Task> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(20);
        let mut results = HashMap::new();

        loop {
            let mut all_terminal = true;
            for id in task_ids {
                if results.contains_key(id) {
                    continue;
                }
                match self.queue.get(id) {
                    Ok(Some(task)) if task.status.is_terminal() => {
                        results.insert(id.clone(), task);
                    }
                    _ => all_terminal = false,
                }
            }

            if all_terminal || Instant::now() >= deadline {
                return results;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_millis(500));
        }
    }

    /// Idempotent: starting an already-running orchestrator is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock().expect("handles lock poisoned");
        for worker_id in 0..self.config.max_workers.max(1) {
            let queue = self.queue.clone();
            let registry = self.registry.clone();
            let running = self.running.clone();
            let in_flight = self.in_flight.clone();
            let events = self.events.clone();
            let polling_interval = Duration::from_millis(self.config.polling_interval_ms.max(1));

            handles.push(tokio::spawn(worker_loop(worker_id, queue, registry, running, in_flight, events, polling_interval)));
        }
    }

    /// Cooperative shutdown: signals workers to exit after finishing
    /// their current task, then awaits them.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles = { std::mem::take(&mut *self.handles.lock().expect("handles lock poisoned")) };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Hard shutdown: as [`Orchestrator::stop`], but any task still
    /// `Processing` after `kill_after` is forcibly marked `Failed` with
    /// a "shutdown" error rather than waiting indefinitely (§4.2, §5).
    pub async fn stop_after(&self, kill_after: Duration) {
        self.running.store(false, Ordering::SeqCst);
        let handles = { std::mem::take(&mut *self.handles.lock().expect("handles lock poisoned")) };

        if tokio::time::timeout(kill_after, futures::future::join_all(handles)).await.is_err() {
            let stuck: Vec<String> = self.in_flight.lock().expect("in_flight lock poisoned").iter().cloned().collect();
            for task_id in stuck {
                if let Err(e) = self.queue.fail(&task_id, "shutdown") {
                    warn!(task_id, error = %e, "stop_after: failed to mark stuck task as failed");
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<TaskQueue>,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    in_flight: Arc<Mutex<std::collections::HashSet<String>>>,
    events: EventBus,
    polling_interval: Duration,
) {
    events.emit(event_type::WORKER_STARTED, format!("worker {worker_id} started"), json!({ "worker_id": worker_id }));

    while running.load(Ordering::SeqCst) {
        let names: Vec<String> = registry.read().expect("registry lock poisoned").keys().cloned().collect();
        let claimed = names.iter().find_map(|name| match queue.claim_next(name) {
            Ok(Some(task)) => Some(task),
            Ok(None) => None,
            Err(e) => {
                warn!(worker_id, agent = name.as_str(), error = %e, "worker: claim_next failed");
                None
            }
        });

        let Some(task) = claimed else {
            events.emit(event_type::QUEUE_EMPTY, "no pending task matched this worker's registry", json!({ "worker_id": worker_id }));
            tokio::time::sleep(polling_interval).await;
            continue;
        };

        events.emit(
            event_type::TASK_CLAIMED,
            format!("claimed {}.{}", task.target_agent, task.method),
            json!({ "task_id": task.id, "target_agent": task.target_agent, "method": task.method, "worker_id": worker_id }),
        );
        in_flight.lock().expect("in_flight lock poisoned").insert(task.id.clone());

        // A cancel() racing the gap between claim and dispatch wins:
        // re-check status before invoking (§4.2 cancellation).
        let still_processing = matches!(queue.get(&task.id), Ok(Some(t)) if t.status == TaskStatus::Processing);
        if !still_processing {
            debug!(task_id = task.id, "worker: task was cancelled before dispatch, skipping");
            in_flight.lock().expect("in_flight lock poisoned").remove(&task.id);
            continue;
        }

        let agent = registry.read().expect("registry lock poisoned").get(&task.target_agent).cloned();
        match agent {
            None => {
                let _ = queue.fail(&task.id, format!("no agent registered for target_agent={}", task.target_agent));
                events.emit(event_type::TASK_FAILED, "no such agent", json!({ "task_id": task.id }));
            }
            Some(agent) => match agent.invoke(&task.method, task.data.clone()).await {
                Ok(result) => {
                    let _ = queue.complete(&task.id, result);
                    events.emit(event_type::TASK_COMPLETED, format!("completed {}.{}", task.target_agent, task.method), json!({ "task_id": task.id }));
                }
                Err(e) => {
                    let _ = queue.fail(&task.id, e.to_string());
                    events.emit(event_type::TASK_FAILED, e.to_string(), json!({ "task_id": task.id, "error": e.to_string() }));
                }
            },
        }

        in_flight.lock().expect("in_flight lock poisoned").remove(&task.id);
    }

    events.emit(event_type::WORKER_STOPPED, format!("worker {worker_id} stopped"), json!({ "worker_id": worker_id }));
}
