//! A scripted [`Provider`] for agent unit tests — returns queued
//! responses in order, recording how many times it was called.

use std::sync::Mutex;

use async_trait::async_trait;

use super::provider::Provider;
use super::types::{ChatParams, ChatResponse, EmbedResponse, Message, Usage};
use crate::error::BmError;

pub struct MockProvider {
    name: &'static str,
    responses: Mutex<Vec<Result<String, BmError>>>,
    call_count: Mutex<usize>,
}

impl MockProvider {
    /// Queue of scripted chat replies, consumed front-to-back.
    pub fn new(name: &'static str, responses: Vec<Result<String, BmError>>) -> Self {
        Self { name, responses: Mutex::new(responses), call_count: Mutex::new(0) }
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn chat(&self, model: &str, _messages: &[Message], _params: ChatParams) -> Result<ChatResponse, BmError> {
        *self.call_count.lock().unwrap() += 1;
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(BmError::LlmPermanent("mock provider exhausted".to_string()));
            }
            responses.remove(0)
        };
        next.map(|content| ChatResponse {
            content,
            model: model.to_string(),
            provider: self.name.to_string(),
            usage: Usage { prompt_tokens: 10, completion_tokens: 10, model_eval_ms: Some(5) },
            latency_ms: 1,
        })
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<EmbedResponse, BmError> {
        Err(BmError::LlmPermanent("mock provider does not support embeddings".to_string()))
    }

    async fn health_check(&self) -> Result<(), BmError> {
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, BmError> {
        Ok(vec![])
    }
}
