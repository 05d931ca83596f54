//! Per-agent accumulator of LLM usage, updated under a mutex rather than
//! as a lock-free atomic struct: throughput here is LLM-bound, not
//! metric-bound, so a single mutex is not a contention risk (§9 design
//! note).

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A single accounting snapshot for one `_call_llm` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub retries: u32,
    pub wall_time_ms: u64,
    /// Model-reported evaluation duration, in milliseconds. Used (not
    /// wall time) to derive tokens-per-second, so network jitter never
    /// pollutes the throughput figure.
    pub model_eval_ms: u64,
}

/// Accumulated counters for one agent instance across its lifetime (or
/// since the last [`PerformanceMetrics::reset`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub request_count: u64,
    pub retry_count: u64,
    pub wall_time_ms: u64,
    pub model_eval_ms: u64,
    #[serde(skip)]
    started_at: Option<i64>,
}

impl PerformanceMetrics {
    pub fn record_call(&mut self, usage: CallUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.request_count += 1;
        self.retry_count += usage.retries as u64;
        self.wall_time_ms += usage.wall_time_ms;
        self.model_eval_ms += usage.model_eval_ms;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// `completion_tokens / model_eval_seconds`, the throughput figure
    /// recommended by the design notes. `None` if no model time has
    /// been recorded yet.
    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.model_eval_ms == 0 {
            return None;
        }
        Some(self.completion_tokens as f64 / (self.model_eval_ms as f64 / 1000.0))
    }

    pub fn average_tokens_per_request(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_tokens() as f64 / self.request_count as f64
        }
    }

    pub fn elapsed_wall_time_ms(&self) -> u64 {
        self.wall_time_ms
    }

    pub fn reset(&mut self) {
        *self = PerformanceMetrics::default();
    }

    pub fn start(&mut self) {
        self.started_at = Some(bmlibrarian_store::now_ms());
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }
}

/// Shared, mutex-guarded handle an agent keeps alongside its
/// configuration. Cloning is cheap (an `Arc` bump); every clone observes
/// the same underlying counters.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics(Arc<Mutex<PerformanceMetrics>>);

impl SharedMetrics {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(PerformanceMetrics::default())))
    }

    pub fn record_call(&self, usage: CallUsage) {
        self.0.lock().expect("metrics mutex poisoned").record_call(usage);
    }

    /// Snapshot (a cheap clone) of the current counters.
    pub fn snapshot(&self) -> PerformanceMetrics {
        self.0.lock().expect("metrics mutex poisoned").clone()
    }

    pub fn reset(&self) {
        self.0.lock().expect("metrics mutex poisoned").reset();
    }

    pub fn start(&self) {
        self.0.lock().expect("metrics mutex poisoned").start();
    }

    pub fn stop(&self) {
        self.0.lock().expect("metrics mutex poisoned").stop();
    }
}

/// Measures elapsed wall time for one call, intended to be constructed
/// right before issuing a provider request and consumed right after.
pub struct CallTimer(Instant);

impl CallTimer {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_calls() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record_call(CallUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            retries: 1,
            wall_time_ms: 100,
            model_eval_ms: 50,
        });
        metrics.record_call(CallUsage {
            prompt_tokens: 5,
            completion_tokens: 10,
            retries: 0,
            wall_time_ms: 50,
            model_eval_ms: 25,
        });

        assert_eq!(metrics.total_tokens(), 45);
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.retry_count, 1);
    }

    #[test]
    fn tokens_per_second_uses_model_time_not_wall_time() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record_call(CallUsage {
            prompt_tokens: 0,
            completion_tokens: 100,
            retries: 0,
            wall_time_ms: 10_000,
            model_eval_ms: 2_000,
        });

        assert_eq!(metrics.tokens_per_second(), Some(50.0));
    }

    #[test]
    fn shared_metrics_clones_observe_same_counters() {
        let metrics = SharedMetrics::new();
        let clone = metrics.clone();
        clone.record_call(CallUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            retries: 0,
            wall_time_ms: 1,
            model_eval_ms: 1,
        });

        assert_eq!(metrics.snapshot().request_count, 1);
    }

    #[test]
    fn reset_clears_counters() {
        let metrics = SharedMetrics::new();
        metrics.record_call(CallUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            retries: 0,
            wall_time_ms: 1,
            model_eval_ms: 1,
        });
        metrics.reset();
        assert_eq!(metrics.snapshot().request_count, 0);
    }
}
