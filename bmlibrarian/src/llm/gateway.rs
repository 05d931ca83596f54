//! [`LlmGateway`]: the single façade for all LLM traffic (§4.4).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::anthropic::AnthropicProvider;
use super::local::LocalProvider;
use super::openai::OpenAiProvider;
use super::provider::{ModelRef, Provider};
use super::token_tracker::{CostTable, TokenTracker, UsageTotals};
use super::types::{ChatParams, ChatResponse, EmbedResponse, Message};
use crate::config::LlmConfig;
use crate::error::{BmError, BmResult};

const KNOWN_PROVIDERS: &[&str] = &["local", "openai", "anthropic"];

/// Fixed retry budget for a `LlmTransientError` against the primary
/// provider before the gateway gives up and tries the fallback (§7).
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 250;

pub struct LlmGateway {
    providers: Vec<Arc<dyn Provider>>,
    default_provider: String,
    default_model: String,
    fallback_model: Option<String>,
    per_call_timeout: Duration,
    tracker: TokenTracker,
}

impl LlmGateway {
    pub fn new(config: &LlmConfig) -> BmResult<Self> {
        let timeout = Duration::from_secs(config.per_call_timeout_seconds);
        let mut providers: Vec<Arc<dyn Provider>> = vec![Arc::new(LocalProvider::new(config.local_base_url.clone(), timeout)?)];

        if let Ok(key) = std::env::var(&config.openai_api_key_env) {
            providers.push(Arc::new(OpenAiProvider::new(key, timeout)?));
        }
        if let Ok(key) = std::env::var(&config.anthropic_api_key_env) {
            providers.push(Arc::new(AnthropicProvider::new(key, timeout)?));
        }

        let costs = CostTable::new(config.cost_table.clone());
        Ok(Self {
            providers,
            default_provider: config.default_provider.clone(),
            default_model: config.default_model.clone(),
            fallback_model: config.fallback_model.clone(),
            per_call_timeout: timeout,
            tracker: TokenTracker::new(costs),
        })
    }

    fn resolve(&self, model_spec: &str) -> BmResult<(Arc<dyn Provider>, String)> {
        let ModelRef { provider, model } = ModelRef::parse(model_spec, KNOWN_PROVIDERS);
        let provider_name = provider.unwrap_or_else(|| self.default_provider.clone());
        let provider = self
            .providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(&provider_name))
            .cloned()
            .ok_or_else(|| BmError::LlmPermanent(format!("unknown or unconfigured provider: {provider_name}")))?;
        Ok((provider, model))
    }

    /// `chat` with retries against the primary provider, then a single
    /// fallback attempt — unless the fallback resolves to the same
    /// provider as the primary, which would loop (§4.4).
    pub async fn chat(&self, messages: &[Message], model: Option<&str>, params: ChatParams) -> BmResult<ChatResponse> {
        let model_spec = model.unwrap_or(&self.default_model);
        let (provider, model_name) = self.resolve(model_spec)?;

        match self.chat_with_retry(&provider, &model_name, messages, params).await {
            Ok(response) => {
                self.tracker.record(&response.provider, &response.model, response.usage);
                Ok(response)
            }
            Err(primary_err) => {
                let Some(fallback_spec) = &self.fallback_model else {
                    return Err(primary_err);
                };
                let (fallback_provider, fallback_model_name) = self.resolve(fallback_spec)?;
                if fallback_provider.name() == provider.name() {
                    debug!(provider = provider.name(), "chat: fallback is same provider as primary, not retrying");
                    return Err(primary_err);
                }

                warn!(error = %primary_err, fallback = %fallback_spec, "chat: primary provider failed, trying fallback");
                let response = self.chat_with_retry(&fallback_provider, &fallback_model_name, messages, params).await?;
                self.tracker.record(&response.provider, &response.model, response.usage);
                Ok(response)
            }
        }
    }

    /// Completion-style variant: a single user turn, no system prompt.
    pub async fn generate(&self, prompt: &str, model: Option<&str>, params: ChatParams) -> BmResult<ChatResponse> {
        self.chat(&[Message::user(prompt)], model, params).await
    }

    pub async fn embed(&self, text: &str, model: Option<&str>) -> BmResult<EmbedResponse> {
        let model_spec = model.unwrap_or(&self.default_model);
        let (provider, model_name) = self.resolve(model_spec)?;
        let response = self.with_deadline(provider.embed(&model_name, text)).await?;
        self.tracker.record(&response.provider, &response.model, response.usage);
        Ok(response)
    }

    /// Cheap liveness check of the provider a model string resolves to.
    /// Used by [`crate::agents::BaseAgent::test_connection`] so each
    /// agent can report its own backend's health without duplicating
    /// the resolution logic.
    pub async fn test_model(&self, model_spec: &str) -> bool {
        match self.resolve(model_spec) {
            Ok((provider, _)) => self.with_deadline(provider.health_check()).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn test_provider(&self, provider_name: &str) -> bool {
        match self.providers.iter().find(|p| p.name().eq_ignore_ascii_case(provider_name)) {
            Some(provider) => self.with_deadline(provider.health_check()).await.is_ok(),
            None => false,
        }
    }

    pub async fn list_models(&self, provider_name: Option<&str>) -> BmResult<Vec<(String, Vec<String>)>> {
        let mut out = Vec::new();
        for provider in &self.providers {
            if let Some(name) = provider_name {
                if !provider.name().eq_ignore_ascii_case(name) {
                    continue;
                }
            }
            let models = self.with_deadline(provider.list_models()).await?;
            out.push((provider.name().to_string(), models));
        }
        Ok(out)
    }

    pub fn usage_for(&self, provider: &str, model: &str) -> UsageTotals {
        self.tracker.totals_for(provider, model)
    }

    pub fn total_cost(&self) -> f64 {
        self.tracker.grand_total_cost()
    }

    /// Build a gateway directly from a set of providers, bypassing
    /// environment-variable API-key discovery. Used by agent tests to
    /// inject a [`super::mock::MockProvider`].
    #[cfg(test)]
    pub fn from_providers(
        providers: Vec<Arc<dyn Provider>>,
        default_provider: impl Into<String>,
        default_model: impl Into<String>,
        fallback_model: Option<String>,
    ) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
            default_model: default_model.into(),
            fallback_model,
            per_call_timeout: Duration::from_secs(30),
            tracker: TokenTracker::new(CostTable::default()),
        }
    }

    async fn chat_with_retry(
        &self,
        provider: &Arc<dyn Provider>,
        model: &str,
        messages: &[Message],
        params: ChatParams,
    ) -> BmResult<ChatResponse> {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            match self.with_deadline(provider.chat(model, messages, params)).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    debug!(attempt, provider = provider.name(), error = %e, "chat_with_retry: transient failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| BmError::LlmTransient("exhausted retries".to_string())))
    }

    async fn with_deadline<T>(&self, fut: impl std::future::Future<Output = BmResult<T>>) -> BmResult<T> {
        match tokio::time::timeout(self.per_call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BmError::Timeout(self.per_call_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> LlmConfig {
        LlmConfig {
            default_provider: "local".to_string(),
            default_model: "medgemma".to_string(),
            fallback_model: None,
            per_call_timeout_seconds: 1,
            cost_table: HashMap::new(),
            local_base_url: "http://127.0.0.1:1".to_string(),
            openai_api_key_env: "BML_TEST_NO_SUCH_OPENAI_KEY".to_string(),
            anthropic_api_key_env: "BML_TEST_NO_SUCH_ANTHROPIC_KEY".to_string(),
        }
    }

    #[test]
    fn resolve_defaults_to_configured_provider() {
        let gateway = LlmGateway::new(&config()).unwrap();
        let (provider, model) = gateway.resolve("medgemma").unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(model, "medgemma");
    }

    #[test]
    fn resolve_honours_explicit_provider_prefix() {
        let mut cfg = config();
        cfg.default_provider = "local".to_string();
        let gateway = LlmGateway::new(&cfg).unwrap();
        let result = gateway.resolve("openai:gpt-4o-mini");
        assert!(result.is_err(), "openai provider is not configured without an API key");
    }

    #[test]
    fn unconfigured_provider_is_a_permanent_error() {
        let gateway = LlmGateway::new(&config()).unwrap();
        let err = gateway.resolve("anthropic:claude-3-5-haiku-latest").unwrap_err();
        assert!(matches!(err, BmError::LlmPermanent(_)));
    }
}
