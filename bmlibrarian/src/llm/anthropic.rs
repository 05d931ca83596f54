//! Anthropic's Messages API, normalised to the gateway's shape.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::provider::Provider;
use super::types::{ChatParams, ChatResponse, EmbedResponse, Message, Role, Usage};
use crate::error::BmError;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, BmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BmError::LlmPermanent(format!("failed to build anthropic client: {e}")))?;
        Ok(Self { http, base_url: "https://api.anthropic.com/v1".to_string(), api_key: api_key.into() })
    }
}

#[derive(Deserialize)]
struct AnthropicChatResponse {
    content: Vec<AnthropicBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

fn classify(status: reqwest::StatusCode, body: String) -> BmError {
    match status.as_u16() {
        401 | 400 | 404 => BmError::LlmPermanent(format!("anthropic {status}: {body}")),
        408 | 429 | 500..=599 => BmError::LlmTransient(format!("anthropic {status}: {body}")),
        _ => BmError::LlmPermanent(format!("anthropic {status}: {body}")),
    }
}

fn classify_transport_error(e: reqwest::Error) -> BmError {
    if e.is_timeout() {
        BmError::Timeout(Duration::from_secs(0))
    } else {
        BmError::LlmTransient(e.to_string())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn chat(&self, model: &str, messages: &[Message], params: ChatParams) -> Result<ChatResponse, BmError> {
        let start = Instant::now();
        let system: Vec<&str> = messages.iter().filter(|m| m.role == Role::System).map(|m| m.content.as_str()).collect();
        let turns: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": if m.role == Role::User { "user" } else { "assistant" },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": turns,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status, text));
        }

        let parsed: AnthropicChatResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        let content = parsed.content.into_iter().find_map(|b| b.text).unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: model.to_string(),
            provider: self.name().to_string(),
            usage: Usage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                model_eval_ms: None,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<EmbedResponse, BmError> {
        Err(BmError::LlmPermanent("anthropic does not expose an embeddings endpoint".to_string()))
    }

    async fn health_check(&self) -> Result<(), BmError> {
        // Anthropic has no unauthenticated health endpoint; a minimal,
        // cheap completion stands in for liveness.
        self.chat(
            "claude-3-5-haiku-latest",
            &[Message::user("ping")],
            ChatParams { max_tokens: 1, ..ChatParams::default() },
        )
        .await
        .map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<String>, BmError> {
        #[derive(Deserialize)]
        struct ModelsResponse {
            data: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        struct ModelEntry {
            id: String,
        }

        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let parsed: ModelsResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}
