//! `QueryAgent`: natural-language question to tsquery, plus the two
//! retrieval entry points (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AgentHandler, BaseAgent, required_str};
use crate::backend::SearchBackend;
use crate::config::QueryAgentConfig;
use crate::domain::{Document, PerformanceMetrics};
use crate::error::{BmError, BmResult};
use crate::llm::{ChatParams, LlmGateway};
use crate::search::IterativeSearchDriver;

use super::scoring::DocumentScoringAgent;

const SYSTEM_PROMPT: &str = "You translate a biomedical research question into a full-text search \
query. Emit only the query string: AND/OR/NOT operators, parentheses for grouping, \
single-quoted multi-word phrases. No prose, no explanation.";

pub struct QueryAgent {
    base: BaseAgent,
    backend: Arc<dyn SearchBackend>,
}

impl QueryAgent {
    pub fn new(gateway: Arc<LlmGateway>, config: &QueryAgentConfig, backend: Arc<dyn SearchBackend>) -> Self {
        let params = ChatParams { temperature: config.temperature, top_p: config.top_p, max_tokens: config.max_tokens };
        Self {
            base: BaseAgent::new("query_agent", gateway, config.model.clone(), params, Some(SYSTEM_PROMPT.to_string())),
            backend,
        }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Convert a natural-language question into a tsquery-style search
    /// string. Never empty on success (§4.3).
    pub async fn convert_question(&self, natural_question: &str) -> BmResult<String> {
        if natural_question.trim().is_empty() {
            return Err(BmError::validation("question must not be empty"));
        }

        let prompt = format!("Research question: {natural_question}\n\nSearch query:");
        let raw = self.base.call_llm(&prompt).await?;
        let query = strip_wrapping(&raw);

        if query.is_empty() {
            return Err(BmError::Parse("model returned an empty search query".to_string()));
        }
        Ok(query)
    }

    pub fn find_abstracts(&self, query: &str, offset: usize, limit: usize) -> BmResult<Vec<Document>> {
        self.backend.find_abstracts(query, limit, offset)
    }

    /// Produce a broader variant of `current_query` for the given
    /// 1-based broadening attempt, per §4.6's attempt-dependent
    /// instructions: attempt 1 expands synonyms, attempt 2 drops the
    /// least-central term, attempt 3+ generalises specific entities to
    /// categories.
    pub async fn broaden_query(&self, original_question: &str, current_query: &str, attempt: u32) -> BmResult<String> {
        let instruction = match attempt {
            1 => "Expand the query with synonyms for its key terms.",
            2 => "Drop the least-central term from the query to widen the match.",
            _ => "Generalise specific entities in the query to their broader categories.",
        };

        let prompt = format!(
            "Original research question: {original_question}\nCurrent search query: {current_query}\n\n{instruction}\n\nBroader search query:"
        );
        let raw = self.base.call_llm(&prompt).await?;
        let query = strip_wrapping(&raw);

        if query.is_empty() {
            return Err(BmError::Parse("model returned an empty broadened query".to_string()));
        }
        Ok(query)
    }

    /// Delegates to [`IterativeSearchDriver`] (§4.6); kept as a
    /// `QueryAgent` method per §4.3's contract so callers don't need to
    /// reach into the search module directly.
    pub async fn find_abstracts_iterative(
        &self,
        question: &str,
        min_relevant: usize,
        score_threshold: f32,
        max_retry: u32,
        batch_size: usize,
        scoring_agent: &DocumentScoringAgent,
    ) -> BmResult<(Vec<Document>, Vec<crate::domain::ScoringResult>)> {
        let driver = IterativeSearchDriver::new(self, scoring_agent, self.base.events());
        driver
            .search(question, min_relevant, score_threshold, max_retry, batch_size)
            .await
    }
}

/// Strip Markdown code fences and surrounding quotes the model
/// sometimes wraps a one-line answer in.
fn strip_wrapping(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        text = stripped.trim_start_matches(|c: char| c.is_alphabetic()).trim_start_matches('\n');
    }
    text = text.trim_end_matches("```").trim();
    text.trim_matches('"').trim_matches('`').trim().to_string()
}

#[derive(Debug, Deserialize)]
struct FindAbstractsArgs {
    query: String,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[async_trait]
impl AgentHandler for QueryAgent {
    fn agent_type(&self) -> &'static str {
        "query_agent"
    }

    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value> {
        match method {
            "convert_question" => {
                let question = required_str(&data, "question")?;
                let query = self.convert_question(question).await?;
                Ok(json!({ "query": query }))
            }
            "find_abstracts" => {
                let args: FindAbstractsArgs = serde_json::from_value(data).map_err(|e| BmError::validation(e.to_string()))?;
                let docs = self.find_abstracts(&args.query, args.offset, args.limit)?;
                Ok(serde_json::to_value(docs).map_err(|e| BmError::Parse(e.to_string()))?)
            }
            other => Err(BmError::UnknownMethod { agent: "query_agent".to_string(), method: other.to_string() }),
        }
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.base.performance_metrics()
    }
}
