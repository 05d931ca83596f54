//! The per-backend contract and the `[<provider>:]<model>` grammar
//! (§4.4) that routes a call to one of them.

use async_trait::async_trait;

use super::types::{ChatParams, ChatResponse, EmbedResponse, Message};
use crate::error::BmError;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Lowercase, canonical name this provider is known by (e.g.
    /// `"local"`, `"openai"`, `"anthropic"`). Matched case-insensitively
    /// against a model string's provider prefix.
    fn name(&self) -> &'static str;

    async fn chat(&self, model: &str, messages: &[Message], params: ChatParams) -> Result<ChatResponse, BmError>;

    async fn embed(&self, model: &str, text: &str) -> Result<EmbedResponse, BmError>;

    /// Cheap liveness probe; used by `test_connection` / `test_provider`.
    async fn health_check(&self) -> Result<(), BmError>;

    /// The models this provider currently knows how to serve. Hosted
    /// providers may query a `/models`-style endpoint; a local server
    /// may return a fixed or configured list.
    async fn list_models(&self) -> Result<Vec<String>, BmError>;
}

/// A model string, split into its provider prefix (if any) and the
/// model name. The provider prefix is only the leading token if it
/// matches a known provider name (case-insensitively); this lets model
/// names that themselves contain colons (rare, but seen with some
/// hosted naming schemes) pass through untouched when no prefix
/// matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: Option<String>,
    pub model: String,
}

impl ModelRef {
    pub fn parse(spec: &str, known_providers: &[&str]) -> Self {
        if let Some((prefix, rest)) = spec.split_once(':') {
            let lower = prefix.to_ascii_lowercase();
            if known_providers.iter().any(|p| p.eq_ignore_ascii_case(&lower)) {
                return Self { provider: Some(lower), model: rest.to_string() };
            }
        }
        Self { provider: None, model: spec.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDERS: &[&str] = &["local", "openai", "anthropic"];

    #[test]
    fn parses_explicit_provider() {
        let r = ModelRef::parse("openai:gpt-4o-mini", PROVIDERS);
        assert_eq!(r.provider.as_deref(), Some("openai"));
        assert_eq!(r.model, "gpt-4o-mini");
    }

    #[test]
    fn provider_matching_is_case_insensitive() {
        let r = ModelRef::parse("OpenAI:gpt-4o-mini", PROVIDERS);
        assert_eq!(r.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn absent_prefix_leaves_provider_none() {
        let r = ModelRef::parse("medgemma", PROVIDERS);
        assert_eq!(r.provider, None);
        assert_eq!(r.model, "medgemma");
    }

    #[test]
    fn colon_in_model_name_is_preserved_when_prefix_unknown() {
        let r = ModelRef::parse("medgemma:27b", PROVIDERS);
        assert_eq!(r.provider, None);
        assert_eq!(r.model, "medgemma:27b");
    }

    #[test]
    fn known_prefix_with_colon_in_model_name_still_splits_once() {
        let r = ModelRef::parse("local:medgemma:27b", PROVIDERS);
        assert_eq!(r.provider.as_deref(), Some("local"));
        assert_eq!(r.model, "medgemma:27b");
    }
}
