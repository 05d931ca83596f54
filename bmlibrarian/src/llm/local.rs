//! The local model server backend: an Ollama-style HTTP chat endpoint
//! that returns `message.content` plus `prompt_eval_count`,
//! `eval_count`, `eval_duration`, and `prompt_eval_duration` in
//! nanoseconds (§6). This is the default provider when a model string
//! carries no explicit prefix.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::provider::Provider;
use super::types::{ChatParams, ChatResponse, EmbedResponse, Message, Role, Usage};
use crate::error::BmError;

pub struct LocalProvider {
    http: Client,
    base_url: String,
}

impl LocalProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BmError::LlmPermanent(format!("failed to build local provider client: {e}")))?;
        Ok(Self { http, base_url: base_url.into() })
    }
}

#[derive(Deserialize)]
struct LocalChatResponse {
    message: LocalMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
    #[serde(default)]
    #[allow(dead_code)]
    prompt_eval_duration: u64,
}

#[derive(Deserialize)]
struct LocalMessage {
    content: String,
}

#[derive(Deserialize)]
struct LocalEmbedResponse {
    embedding: Vec<f32>,
}

fn classify_transport_error(e: reqwest::Error) -> BmError {
    if e.is_timeout() {
        BmError::Timeout(Duration::from_secs(0))
    } else if e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(true) {
        BmError::LlmTransient(e.to_string())
    } else {
        BmError::LlmPermanent(e.to_string())
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn chat(&self, model: &str, messages: &[Message], params: ChatParams) -> Result<ChatResponse, BmError> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": model,
            "stream": false,
            "messages": messages.iter().map(|m| serde_json::json!({
                "role": match m.role { Role::System => "system", Role::User => "user", Role::Assistant => "assistant" },
                "content": m.content,
            })).collect::<Vec<_>>(),
            "options": {
                "temperature": params.temperature,
                "top_p": params.top_p,
                "num_predict": params.max_tokens,
            },
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                BmError::LlmTransient(format!("local provider {status}: {text}"))
            } else {
                BmError::LlmPermanent(format!("local provider {status}: {text}"))
            });
        }

        let parsed: LocalChatResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;

        Ok(ChatResponse {
            content: parsed.message.content,
            model: model.to_string(),
            provider: self.name().to_string(),
            usage: Usage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                model_eval_ms: Some(parsed.eval_duration / 1_000_000),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<EmbedResponse, BmError> {
        let body = serde_json::json!({ "model": model, "prompt": text });
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(BmError::LlmPermanent(format!("local embed provider returned {}", response.status())));
        }

        let parsed: LocalEmbedResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        let dimensions = parsed.embedding.len();
        Ok(EmbedResponse {
            embedding: parsed.embedding,
            dimensions,
            model: model.to_string(),
            provider: self.name().to_string(),
            usage: Usage::default(),
        })
    }

    async fn health_check(&self) -> Result<(), BmError> {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(classify_transport_error)?;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, BmError> {
        #[derive(Deserialize)]
        struct TagsResponse {
            models: Vec<TagEntry>,
        }
        #[derive(Deserialize)]
        struct TagEntry {
            name: String,
        }

        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(classify_transport_error)?;
        let parsed: TagsResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}
