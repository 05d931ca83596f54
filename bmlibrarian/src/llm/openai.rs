//! OpenAI's Chat Completions API, normalised to the gateway's shape.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::provider::Provider;
use super::types::{ChatParams, ChatResponse, EmbedResponse, Message, Role, Usage};
use crate::error::BmError;

pub struct OpenAiProvider {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, BmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BmError::LlmPermanent(format!("failed to build openai client: {e}")))?;
        Ok(Self { http, base_url: "https://api.openai.com/v1".to_string(), api_key: api_key.into() })
    }
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedEntry>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiEmbedEntry {
    embedding: Vec<f32>,
}

fn classify(status: reqwest::StatusCode, body: String) -> BmError {
    match status.as_u16() {
        401 | 400 | 404 => BmError::LlmPermanent(format!("openai {status}: {body}")),
        408 | 429 | 500..=599 => BmError::LlmTransient(format!("openai {status}: {body}")),
        _ => BmError::LlmPermanent(format!("openai {status}: {body}")),
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
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, model: &str, messages: &[Message], params: ChatParams) -> Result<ChatResponse, BmError> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": model,
            "messages": messages.iter().map(|m| serde_json::json!({
                "role": match m.role { Role::System => "system", Role::User => "user", Role::Assistant => "assistant" },
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status, text));
        }

        let parsed: OpenAiChatResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BmError::LlmPermanent("openai response had no choices".to_string()))?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: model.to_string(),
            provider: self.name().to_string(),
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                // The Chat Completions API reports no model-side eval
                // duration; callers fall back to wall time for
                // tokens-per-second on this provider.
                model_eval_ms: None,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<EmbedResponse, BmError> {
        let body = serde_json::json!({ "model": model, "input": text });
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status, text));
        }

        let parsed: OpenAiEmbedResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        let usage = parsed.usage.unwrap_or_default();
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| BmError::LlmPermanent("openai embed response had no data".to_string()))?;
        let dimensions = embedding.len();

        Ok(EmbedResponse {
            embedding,
            dimensions,
            model: model.to_string(),
            provider: self.name().to_string(),
            usage: Usage { prompt_tokens: usage.prompt_tokens, completion_tokens: 0, model_eval_ms: None },
        })
    }

    async fn health_check(&self) -> Result<(), BmError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(classify(response.status(), String::new()));
        }
        Ok(())
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
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let parsed: ModelsResponse = response.json().await.map_err(|e| BmError::LlmPermanent(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}
