//! `DocumentScoringAgent`: relevance scoring of one document against one
//! question (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{AgentHandler, BaseAgent};
use crate::config::ScoringAgentConfig;
use crate::domain::{Document, PerformanceMetrics, ScoringResult};
use crate::error::{BmError, BmResult};
use crate::llm::{ChatParams, LlmGateway};

const SYSTEM_PROMPT: &str = "You score how relevant a biomedical abstract is to a research question, \
on an integer scale of 1 (irrelevant) to 5 (directly answers the question). Respond with a JSON \
object: {\"score\": <integer 1-5>, \"reasoning\": \"<one sentence>\"}. No other text.";

pub struct DocumentScoringAgent {
    base: BaseAgent,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f32,
    reasoning: String,
}

impl DocumentScoringAgent {
    pub fn new(gateway: Arc<LlmGateway>, config: &ScoringAgentConfig) -> Self {
        let params = ChatParams { temperature: config.temperature, ..ChatParams::default() };
        Self { base: BaseAgent::new("scoring_agent", gateway, config.model.clone(), params, Some(SYSTEM_PROMPT.to_string())) }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Must tolerate missing fields (§4.3): an empty abstract is scored
    /// from the title alone rather than rejected.
    pub async fn evaluate_document(&self, question: &str, document: &Document) -> BmResult<ScoringResult> {
        let abstract_text = if document.abstract_text.trim().is_empty() { "(no abstract available)" } else { &document.abstract_text };

        let prompt = format!(
            "Research question: {question}\n\nDocument title: {}\nDocument abstract: {abstract_text}\n\nScore:",
            document.title
        );

        let raw = self.base.call_llm(&prompt).await?;
        let parsed: ScoreResponse = self.base.parse_structured(&raw)?;

        Ok(ScoringResult::new(document.id, parsed.score, parsed.reasoning))
    }
}

#[derive(Debug, Deserialize)]
struct EvaluateArgs {
    question: String,
    document: Document,
}

#[async_trait]
impl AgentHandler for DocumentScoringAgent {
    fn agent_type(&self) -> &'static str {
        "scoring_agent"
    }

    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value> {
        match method {
            "evaluate_document" => {
                let args: EvaluateArgs = serde_json::from_value(data).map_err(|e| BmError::validation(e.to_string()))?;
                let result = self.evaluate_document(&args.question, &args.document).await?;
                Ok(serde_json::to_value(result).map_err(|e| BmError::Parse(e.to_string()))?)
            }
            other => Err(BmError::UnknownMethod { agent: "scoring_agent".to_string(), method: other.to_string() }),
        }
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.base.performance_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockProvider;

    fn doc(id: i64, abstract_text: &str) -> Document {
        Document {
            id,
            title: "Exercise and heart failure".to_string(),
            abstract_text: abstract_text.to_string(),
            authors: vec![],
            publication_date: None,
            journal: None,
            pmid: None,
            doi: None,
            source_id: None,
        }
    }

    fn agent(responses: Vec<Result<String, BmError>>) -> DocumentScoringAgent {
        let provider = Arc::new(MockProvider::new("local", responses));
        let gateway = Arc::new(LlmGateway::from_providers(vec![provider], "local", "test-model", None));
        DocumentScoringAgent::new(gateway, &ScoringAgentConfig::default())
    }

    #[tokio::test]
    async fn parses_score_and_reasoning() {
        let agent = agent(vec![Ok(r#"{"score": 4, "reasoning": "directly on topic"}"#.to_string())]);
        let result = agent.evaluate_document("does exercise help?", &doc(1, "trial results...")).await.unwrap();
        assert_eq!(result.document_id, 1);
        assert_eq!(result.score, 4.0);
    }

    #[tokio::test]
    async fn tolerates_missing_abstract() {
        let agent = agent(vec![Ok(r#"{"score": 1, "reasoning": "no content"}"#.to_string())]);
        let result = agent.evaluate_document("q", &doc(2, "")).await.unwrap();
        assert_eq!(result.document_id, 2);
    }

    #[tokio::test]
    async fn unrepairable_output_is_a_parse_error() {
        let agent = agent(vec![Ok("not json at all, sorry".to_string())]);
        let err = agent.evaluate_document("q", &doc(3, "text")).await.unwrap_err();
        assert!(matches!(err, BmError::Parse(_)));
    }
}
