//! `ReportingAgent`: synthesises a prose answer with inline `[N]`
//! citation markers from a set of already-extracted citations (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AgentHandler, BaseAgent};
use crate::config::ReportingAgentConfig;
use crate::domain::{Citation, PerformanceMetrics, Report};
use crate::error::{BmError, BmResult};
use crate::llm::{ChatParams, LlmGateway};

const SYSTEM_PROMPT: &str = "You write a concise, evidence-based answer to a biomedical research \
question using only the citations provided. Cite every claim with an inline marker like [1], [2], \
referring to the citation's position in the list given to you (first citation is [1]). Do not \
invent facts beyond what the citations support.";

pub struct ReportingAgent {
    base: BaseAgent,
    default_min_citations: usize,
}

impl ReportingAgent {
    pub fn new(gateway: Arc<LlmGateway>, config: &ReportingAgentConfig) -> Self {
        Self {
            base: BaseAgent::new("reporting_agent", gateway, config.model.clone(), ChatParams::default(), Some(SYSTEM_PROMPT.to_string())),
            default_min_citations: config.min_citations,
        }
    }

    pub fn base(&self) -> &BaseAgent {
        &self.base
    }

    /// Returns `None` when fewer than `min_citations` citations are
    /// available — the agent never synthesises a report from
    /// insufficient evidence (§4.3).
    pub async fn synthesize_report(&self, question: &str, citations: &[Citation], min_citations: Option<usize>) -> BmResult<Option<Report>> {
        let min_citations = min_citations.unwrap_or(self.default_min_citations);
        if citations.len() < min_citations {
            return Ok(None);
        }

        let listing = citations
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}: \"{}\"", i + 1, c.document_title, c.passage))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!("Research question: {question}\n\nCitations:\n{listing}\n\nAnswer:");
        let raw_answer = self.base.call_llm(&prompt).await?;

        let methodology_note = format!(
            "Synthesized from {} citation(s) across {} unique document(s) using {}.",
            citations.len(),
            citations.iter().map(|c| c.document_id).collect::<std::collections::HashSet<_>>().len(),
            self.base.agent_type()
        );

        Ok(Some(Report::synthesize(question, citations, &raw_answer, methodology_note)))
    }
}

#[derive(Debug, Deserialize)]
struct SynthesizeArgs {
    question: String,
    citations: Vec<Citation>,
    #[serde(default)]
    min_citations: Option<usize>,
}

#[async_trait]
impl AgentHandler for ReportingAgent {
    fn agent_type(&self) -> &'static str {
        "reporting_agent"
    }

    async fn invoke(&self, method: &str, data: Value) -> BmResult<Value> {
        match method {
            "synthesize_report" => {
                let args: SynthesizeArgs = serde_json::from_value(data).map_err(|e| BmError::validation(e.to_string()))?;
                let report = self.synthesize_report(&args.question, &args.citations, args.min_citations).await?;
                Ok(match report {
                    Some(r) => serde_json::to_value(r).map_err(|e| BmError::Parse(e.to_string()))?,
                    None => json!(null),
                })
            }
            other => Err(BmError::UnknownMethod { agent: "reporting_agent".to_string(), method: other.to_string() }),
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

    fn citation(document_id: i64) -> Citation {
        Citation::new("passage text", "summary", 0.8, document_id, "Title", vec!["Author".to_string()], None, None)
    }

    fn agent(responses: Vec<Result<String, BmError>>, min_citations: usize) -> ReportingAgent {
        let provider = Arc::new(MockProvider::new("local", responses));
        let gateway = Arc::new(LlmGateway::from_providers(vec![provider], "local", "test-model", None));
        let mut config = ReportingAgentConfig::default();
        config.min_citations = min_citations;
        ReportingAgent::new(gateway, &config)
    }

    #[tokio::test]
    async fn below_min_citations_returns_none() {
        let agent = agent(vec![], 3);
        let report = agent.synthesize_report("q", &[citation(1)], None).await.unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn synthesizes_report_with_markers_in_range() {
        let agent = agent(vec![Ok("Exercise helps [1] and is well tolerated [2].".to_string())], 1);
        let citations = vec![citation(1), citation(2)];
        let report = agent.synthesize_report("q", &citations, None).await.unwrap().unwrap();
        assert_eq!(report.references.len(), 2);
        assert!(report.markers_are_in_range());
    }
}
