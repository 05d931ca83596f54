//! Wire-agnostic request/response shapes every provider normalises to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Sampling parameters common to every provider's chat/generate call.
#[derive(Debug, Clone, Copy)]
pub struct ChatParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self { temperature: 0.7, top_p: 0.9, max_tokens: 1024 }
    }
}

/// Token and timing usage for one call, in the shape every provider
/// response is normalised into regardless of its native wire format
/// (§6: `prompt_eval_count`, `eval_count`, `eval_duration`,
/// `prompt_eval_duration`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Model-reported (not wall-clock) generation time, when the
    /// backend exposes it. `None` for providers that only report
    /// tokens, not timing; callers fall back to wall time.
    pub model_eval_ms: Option<u64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A normalised chat/generate response (§4.4).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: Usage,
    pub latency_ms: u64,
}

/// A normalised embedding response.
#[derive(Debug, Clone)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
    pub dimensions: usize,
    pub model: String,
    pub provider: String,
    pub usage: Usage,
}
