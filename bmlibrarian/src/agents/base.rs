//! [`BaseAgent`]: the configuration and plumbing shared by every
//! specialised agent (§4.3).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{CallTimer, CallUsage, PerformanceMetrics, SharedMetrics};
use crate::error::{BmError, BmResult};
use crate::events::EventBus;
use crate::json_repair::safe_json_loads;
use crate::llm::{ChatParams, LlmGateway, Message};

/// Shared state and helpers every specialised agent composes rather
/// than inherits. `model` carries the full `[<provider>:]<model>`
/// string so each agent can be pointed at a different backend/model via
/// configuration without code changes.
pub struct BaseAgent {
    agent_type: &'static str,
    gateway: Arc<LlmGateway>,
    model: String,
    params: ChatParams,
    system_prompt: Option<String>,
    metrics: SharedMetrics,
    events: Option<EventBus>,
}

impl BaseAgent {
    pub fn new(agent_type: &'static str, gateway: Arc<LlmGateway>, model: impl Into<String>, params: ChatParams, system_prompt: Option<String>) -> Self {
        Self {
            agent_type,
            gateway,
            model: model.into(),
            params,
            system_prompt,
            metrics: SharedMetrics::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn agent_type(&self) -> &'static str {
        self.agent_type
    }

    pub async fn test_connection(&self) -> bool {
        self.gateway.test_model(&self.model).await
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn start_metrics(&self) {
        self.metrics.start();
    }

    pub fn stop_metrics(&self) {
        self.metrics.stop();
    }

    /// Emit a progress event if this agent was wired to an [`EventBus`];
    /// a no-op otherwise. Mirrors the "callbacks must not block, never
    /// abort the primary operation" contract of §4.3 by construction —
    /// `EventBus::publish` never blocks or panics.
    pub fn emit(&self, event_type: &str, message: impl Into<String>, data: Value) {
        if let Some(bus) = &self.events {
            bus.emit(event_type.to_string(), message, data);
        }
    }

    /// A clone of this agent's event bus handle, if it has one. Used to
    /// thread progress reporting into collaborators that outlive a
    /// single agent call, such as [`crate::search::IterativeSearchDriver`].
    pub fn events(&self) -> Option<EventBus> {
        self.events.clone()
    }

    /// One user-turn chat call, prepending the agent's system prompt if
    /// configured. Wraps [`LlmGateway::chat`] with metric capture
    /// (prompt/completion tokens, model eval time, wall time) per §4.3.
    pub async fn call_llm(&self, prompt: &str) -> BmResult<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let timer = CallTimer::start();
        let response = self.gateway.chat(&messages, Some(&self.model), self.params).await?;
        let wall_time_ms = timer.elapsed_ms();

        self.metrics.record_call(CallUsage {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            retries: 0,
            wall_time_ms,
            model_eval_ms: response.usage.model_eval_ms.unwrap_or(0),
        });

        Ok(response.content)
    }

    /// Extract, repair, and validate structured output from free-form
    /// LLM text against the target type's `Deserialize` impl. Delegates
    /// to [`crate::json_repair`] (§4.3 `_parse_structured`).
    pub fn parse_structured<T: DeserializeOwned>(&self, text: &str) -> BmResult<T> {
        let value = safe_json_loads(text, true).map_err(|e| BmError::Parse(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| BmError::Parse(e.to_string()))
    }
}
