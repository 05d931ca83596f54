//! `CounterfactualAgent`: extracts a document's main claims and
//! generates adversarial search questions against them (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AgentHandler, BaseAgent};
use crate::config::CounterfactualAgentConfig;
use crate::domain::{ConfidenceLevel, CounterfactualAnalysis, CounterfactualQuestion, PerformanceMetrics, QuestionPriority};
use crate::error::{BmError, BmResult};
use crate::llm::{ChatParams, LlmGateway};

const SYSTEM_PROMPT: &str = "You analyze a biomedical text for its main factual claims, then generate \
counterfactual questions that would challenge each claim if true. For each question, supply search \
keywords suitable for a full-text retrieval engine (quote multi-word phrases, combine terms with AND/OR \
explicitly). Respond with a JSON object: {\"main_claims\": [string], \"questions\": [{\"counterfactual_statement\": \
string, \"question\": string, \"reasoning\": string, \"target_claim\": string, \"search_keywords\": [string], \
\"priority\": \"HIGH\"|\"MEDIUM\"|\"LOW\"}], \"overall_assessment\": string, \"confidence_level\": \
\"HIGH\"|\"MEDIUM\"|\"LOW\"}. If the text contains no checkable claims, return an empty main_claims list.";

pub struct CounterfactualAgent {
    base: BaseAgent,
}

#[derive(Debug, Deserialize)]
struct QuestionResponse {
    counterfactual_statement: String,
    question: String,
    reasoning: String,
    target_claim: String,
    #[serde(default)]
    search_keywords: Vec<String>,
    priority: QuestionPriority,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    main_claims: Vec<String>,
    #[serde(default)]
    questions: Vec<QuestionResponse>,
    #[serde(default)]
    overall_assessment: String,
    #[serde(default = "default_confidence")]
    confidence_level: ConfidenceLevel,
}

fn default_confidence() -> ConfidenceLevel {
    ConfidenceLevel::Low
}

impl CounterfactualAgent {
    pub fn new(gateway: Arc<LlmGateway>, config: &CounterfactualAgentConfig) -> Self {
        Self { base: BaseAgent::new("counterfactual_agent", gateway, config.model.clone(), ChatParams::default(), Some(SYSTEM_PROMPT.to_string())) }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Returns `None` when the model finds no checkable claims in the
    /// content (§4.3).
    pub async fn analyze_document(&self, content: &str, title: Option<&str>) -> BmResult<Option<CounterfactualAnalysis>> {
        let prompt = match title {
            Some(title) => format!("Title: {title}\n\nText:\n{content}\n\nJSON:"),
            None => format!("Text:\n{content}\n\nJSON:"),
        };

        let raw = self.base.call_llm(&prompt).await?;
        let parsed: AnalysisResponse = self.base.parse_structured(&raw)?;

        if parsed.main_claims.is_empty() {
            return Ok(None);
        }

        let questions = parsed
            .questions
            .into_iter()
            .map(|q| CounterfactualQuestion::new(q.counterfactual_statement, q.question, q.reasoning, q.target_claim, q.search_keywords, q.priority))
            .collect();

        Ok(Some(CounterfactualAnalysis::new(
            title.map(str::to_string),
            parsed.main_claims,
            questions,
            parsed.overall_assessment,
            parsed.confidence_level,
        )))
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
    content: String,
    #[serde(default)]
    title: Option<String>,
}

#[async_trait]
impl AgentHandler for CounterfactualAgent {
    fn agent_type(&self) -> &'static str {
        "counterfactual_agent"
    }

    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value> {
        match method {
            "analyze_document" => {
                let args: AnalyzeArgs = serde_json::from_value(data).map_err(|e| BmError::validation(e.to_string()))?;
                let analysis = self.analyze_document(&args.content, args.title.as_deref()).await?;
                Ok(match analysis {
                    Some(a) => serde_json::to_value(a).map_err(|e| BmError::Parse(e.to_string()))?,
                    None => json!(null),
                })
            }
            other => Err(BmError::UnknownMethod { agent: "counterfactual_agent".to_string(), method: other.to_string() }),
        }
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.base.performance_metrics()
    }
}
