//! `VerdictAgent`: judges a single statement against a counter-evidence
//! report (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{AgentHandler, BaseAgent};
use crate::config::VerdictAgentConfig;
use crate::domain::{Confidence, PerformanceMetrics, Verdict, VerdictOutcome};
use crate::error::{BmError, BmResult};
use crate::llm::{ChatParams, LlmGateway};

const SYSTEM_PROMPT: &str = "You judge whether a body of evidence supports, contradicts, or leaves \
undecided a given statement. Respond with a JSON object: {\"outcome\": \"supports\"|\"contradicts\"| \
\"undecided\", \"confidence\": \"low\"|\"medium\"|\"high\", \"rationale\": \"<prose justification>\"}.";

pub struct VerdictAgent {
    base: BaseAgent,
    min_rationale_length: usize,
}

#[derive(Debug, Deserialize)]
struct VerdictResponse {
    outcome: VerdictOutcome,
    confidence: Confidence,
    rationale: String,
}

impl VerdictAgent {
    pub fn new(gateway: Arc<LlmGateway>, config: &VerdictAgentConfig) -> Self {
        Self {
            base: BaseAgent::new("verdict_agent", gateway, config.model.clone(), ChatParams::default(), Some(SYSTEM_PROMPT.to_string())),
            min_rationale_length: config.min_rationale_length,
        }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Validates the LLM's choice against the `VerdictOutcome`/
    /// `Confidence` enums via `serde`, and the rationale length via
    /// [`Verdict::new`] (§4.3, §8 scenario F).
    pub async fn analyze(&self, statement: &str, counter_report: &str) -> BmResult<Verdict> {
        let prompt = format!("Statement: {statement}\n\nCounter-evidence report:\n{counter_report}\n\nJSON:");
        let raw = self.base.call_llm(&prompt).await?;
        let parsed: VerdictResponse = self.base.parse_structured(&raw)?;

        Verdict::new(parsed.outcome, parsed.confidence, parsed.rationale, statement, self.min_rationale_length)
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
    statement: String,
    counter_report: String,
}

#[async_trait]
impl AgentHandler for VerdictAgent {
    fn agent_type(&self) -> &'static str {
        "verdict_agent"
    }

    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value> {
        match method {
            "analyze" => {
                let args: AnalyzeArgs = serde_json::from_value(data).map_err(|e| BmError::validation(e.to_string()))?;
                let verdict = self.analyze(&args.statement, &args.counter_report).await?;
                Ok(serde_json::to_value(verdict).map_err(|e| BmError::Parse(e.to_string()))?)
            }
            other => Err(BmError::UnknownMethod { agent: "verdict_agent".to_string(), method: other.to_string() }),
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

    fn agent(responses: Vec<Result<String, BmError>>) -> VerdictAgent {
        let provider = Arc::new(MockProvider::new("local", responses));
        let gateway = Arc::new(LlmGateway::from_providers(vec![provider], "local", "test-model", None));
        VerdictAgent::new(gateway, &VerdictAgentConfig::default())
    }

    #[tokio::test]
    async fn parses_a_valid_verdict() {
        let agent = agent(vec![Ok(
            r#"{"outcome": "contradicts", "confidence": "high", "rationale": "Multiple large trials found no significant benefit."}"#.to_string(),
        )]);
        let verdict = agent.analyze("exercise prevents all heart failure readmissions", "report text").await.unwrap();
        assert_eq!(verdict.outcome, VerdictOutcome::Contradicts);
        assert_eq!(verdict.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn rationale_below_minimum_length_is_rejected() {
        let agent = agent(vec![Ok(r#"{"outcome": "undecided", "confidence": "low", "rationale": "too short"}"#.to_string())]);
        let err = agent.analyze("stmt", "report").await.unwrap_err();
        assert!(matches!(err, BmError::Validation(_)));
    }
}
