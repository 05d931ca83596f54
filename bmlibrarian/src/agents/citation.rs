//! `CitationFinderAgent`: extracts a grounded, quoted passage from a
//! document in support of a research question (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::{AgentHandler, BaseAgent};
use crate::config::CitationAgentConfig;
use crate::domain::{Citation, Document, PerformanceMetrics};
use crate::error::{BmError, BmResult};
use crate::llm::{ChatParams, LlmGateway};

const SYSTEM_PROMPT: &str = "You find the single passage in a biomedical abstract that most directly \
supports or addresses a research question. Quote the passage VERBATIM from the text given — do not \
paraphrase it. Respond with a JSON object: {\"found\": <bool>, \"passage\": \"<verbatim quote or \
empty>\", \"summary\": \"<one sentence paraphrase>\", \"relevance_score\": <0.0-1.0>}. If nothing in \
the text addresses the question, set found to false.";

pub struct CitationFinderAgent {
    base: BaseAgent,
    default_min_relevance: f32,
}

#[derive(Debug, Deserialize)]
struct CitationResponse {
    found: bool,
    #[serde(default)]
    passage: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    relevance_score: f32,
}

impl CitationFinderAgent {
    pub fn new(gateway: Arc<LlmGateway>, config: &CitationAgentConfig) -> Self {
        Self {
            base: BaseAgent::new("citation_agent", gateway, config.model.clone(), ChatParams::default(), Some(SYSTEM_PROMPT.to_string())),
            default_min_relevance: config.min_relevance,
        }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Returns `None` when the model reports no relevant content, when
    /// the reported relevance is below `min_relevance`, or when the
    /// quoted passage cannot be found verbatim in the document — the
    /// core never fabricates a grounded citation (§3, §8 invariant 5).
    /// `document_id` is always taken from `document.id`, never from the
    /// model's output.
    pub async fn extract_citation_from_document(&self, question: &str, document: &Document, min_relevance: Option<f32>) -> BmResult<Option<Citation>> {
        let min_relevance = min_relevance.unwrap_or(self.default_min_relevance);

        let prompt = format!(
            "Research question: {question}\n\nDocument title: {}\nDocument abstract: {}\n\nJSON:",
            document.title, document.abstract_text
        );
        let raw = self.base.call_llm(&prompt).await?;
        let parsed: CitationResponse = self.base.parse_structured(&raw)?;

        if !parsed.found || parsed.relevance_score < min_relevance {
            return Ok(None);
        }

        if !document.abstract_text.contains(&parsed.passage) {
            warn!(document_id = document.id, "citation_agent: quoted passage not found verbatim in source text, discarding");
            return Ok(None);
        }

        Ok(Some(Citation::new(
            parsed.passage,
            parsed.summary,
            parsed.relevance_score,
            document.id,
            document.title.clone(),
            document.authors.clone(),
            document.publication_date,
            document.pmid.clone(),
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    question: String,
    document: Document,
    #[serde(default)]
    min_relevance: Option<f32>,
}

#[async_trait]
impl AgentHandler for CitationFinderAgent {
    fn agent_type(&self) -> &'static str {
        "citation_agent"
    }

    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value> {
        match method {
            "extract_citation_from_document" => {
                let args: ExtractArgs = serde_json::from_value(data).map_err(|e| BmError::validation(e.to_string()))?;
                let citation = self.extract_citation_from_document(&args.question, &args.document, args.min_relevance).await?;
                Ok(match citation {
                    Some(c) => serde_json::to_value(c).map_err(|e| BmError::Parse(e.to_string()))?,
                    None => json!(null),
                })
            }
            other => Err(BmError::UnknownMethod { agent: "citation_agent".to_string(), method: other.to_string() }),
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

    fn doc() -> Document {
        Document {
            id: 42,
            title: "Exercise and heart failure".to_string(),
            abstract_text: "In a randomized trial, exercise reduced hospitalisation rates significantly.".to_string(),
            authors: vec!["Smith J".to_string()],
            publication_date: None,
            journal: None,
            pmid: Some("12345".to_string()),
            doi: None,
            source_id: None,
        }
    }

    fn agent(responses: Vec<Result<String, BmError>>) -> CitationFinderAgent {
        let provider = Arc::new(MockProvider::new("local", responses));
        let gateway = Arc::new(LlmGateway::from_providers(vec![provider], "local", "test-model", None));
        CitationFinderAgent::new(gateway, &CitationAgentConfig::default())
    }

    #[tokio::test]
    async fn document_id_is_always_taken_from_the_document() {
        let agent = agent(vec![Ok(
            r#"{"found": true, "passage": "exercise reduced hospitalisation rates significantly", "summary": "exercise helps", "relevance_score": 0.9}"#.to_string(),
        )]);
        let citation = agent.extract_citation_from_document("does exercise help?", &doc(), None).await.unwrap().unwrap();
        assert_eq!(citation.document_id, 42);
        assert!(citation.passage_is_grounded(&doc().abstract_text));
    }

    #[tokio::test]
    async fn below_min_relevance_returns_none() {
        let agent = agent(vec![Ok(
            r#"{"found": true, "passage": "exercise reduced hospitalisation rates significantly", "summary": "s", "relevance_score": 0.1}"#.to_string(),
        )]);
        let citation = agent.extract_citation_from_document("q", &doc(), Some(0.5)).await.unwrap();
        assert!(citation.is_none());
    }

    #[tokio::test]
    async fn not_found_returns_none() {
        let agent = agent(vec![Ok(r#"{"found": false}"#.to_string())]);
        let citation = agent.extract_citation_from_document("q", &doc(), None).await.unwrap();
        assert!(citation.is_none());
    }

    #[tokio::test]
    async fn non_verbatim_passage_is_rejected_rather_than_fabricated() {
        let agent = agent(vec![Ok(
            r#"{"found": true, "passage": "this quote does not appear anywhere", "summary": "s", "relevance_score": 0.9}"#.to_string(),
        )]);
        let citation = agent.extract_citation_from_document("q", &doc(), None).await.unwrap();
        assert!(citation.is_none());
    }
}
