//! `PipelineController`: composes the agents into the end-to-end
//! research and paper-checker flows, and owns the cross-agent
//! invariants neither agent can enforce alone (§4.7).

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::agents::{CitationFinderAgent, CounterfactualAgent, DocumentScoringAgent, QueryAgent, ReportingAgent, VerdictAgent};
use crate::domain::{Citation, Confidence, Document, Report, Verdict, aggregate_verdicts};
use crate::error::BmResult;
use crate::events::{EventBus, event_type};

/// Tuning knobs for [`PipelineController::research`], mirroring the
/// parameters `IterativeSearchDriver::search` and the citation/reporting
/// agents already take individually.
#[derive(Debug, Clone, Copy)]
pub struct ResearchParams {
    pub min_relevant: usize,
    pub score_threshold: f32,
    pub max_retry: u32,
    pub batch_size: usize,
    pub min_citations: usize,
}

impl Default for ResearchParams {
    fn default() -> Self {
        Self { min_relevant: 5, score_threshold: 3.0, max_retry: 3, batch_size: 20, min_citations: 1 }
    }
}

pub struct PipelineController {
    query_agent: QueryAgent,
    scoring_agent: DocumentScoringAgent,
    citation_agent: CitationFinderAgent,
    reporting_agent: ReportingAgent,
    counterfactual_agent: CounterfactualAgent,
    verdict_agent: VerdictAgent,
    events: EventBus,
}

impl PipelineController {
    pub fn new(
        query_agent: QueryAgent,
        scoring_agent: DocumentScoringAgent,
        citation_agent: CitationFinderAgent,
        reporting_agent: ReportingAgent,
        counterfactual_agent: CounterfactualAgent,
        verdict_agent: VerdictAgent,
    ) -> Self {
        Self { query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent, events: EventBus::new() }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    fn emit(&self, event_type: &str, message: impl Into<String>, data: serde_json::Value) {
        self.events.emit(event_type.to_string(), message, data);
    }

    /// Standard research flow: search, score, cite, and synthesize a
    /// report. Returns `None` when too few citations were found to
    /// synthesize (delegated to [`ReportingAgent::synthesize_report`]).
    pub async fn research(&self, question: &str, params: ResearchParams) -> BmResult<Option<Report>> {
        self.emit(event_type::PIPELINE_STAGE_START, "search", json!({ "stage": "search", "question": question }));
        let (documents, scored) = self
            .query_agent
            .find_abstracts_iterative(question, params.min_relevant, params.score_threshold, params.max_retry, params.batch_size, &self.scoring_agent)
            .await?;

        let by_id: HashMap<i64, &Document> = documents.iter().map(|d| (d.id, d)).collect();
        let relevant_ids: HashSet<i64> = scored.iter().filter(|s| s.meets_threshold(params.score_threshold)).map(|s| s.document_id).collect();

        self.emit(
            event_type::PIPELINE_STAGE_START,
            "cite",
            json!({ "stage": "cite", "candidate_documents": relevant_ids.len() }),
        );
        let citations = self.cite_documents(question, relevant_ids.iter().filter_map(|id| by_id.get(id).copied())).await;

        self.emit(event_type::PIPELINE_STAGE_START, "synthesize", json!({ "stage": "synthesize", "citation_count": citations.len() }));
        let report = self.reporting_agent.synthesize_report(question, &citations, Some(params.min_citations)).await?;

        self.emit(
            event_type::PIPELINE_STAGE_START,
            "complete",
            json!({ "stage": "complete", "produced_report": report.is_some() }),
        );
        Ok(report)
    }

    /// Extracts a grounded citation from each candidate document,
    /// skipping documents the `CitationFinderAgent` declines to ground
    /// (logged, not fatal — §4.3, §8 invariant 5). `document_id` always
    /// comes from the `Document` the pipeline itself retrieved, never
    /// from agent output (§4.7 key rule).
    async fn cite_documents<'a>(&self, question: &str, documents: impl Iterator<Item = &'a Document>) -> Vec<Citation> {
        let mut citations = Vec::new();
        for document in documents {
            match self.citation_agent.extract_citation_from_document(question, document, None).await {
                Ok(Some(citation)) => {
                    debug_assert_eq!(citation.document_id, document.id);
                    citations.push(citation);
                }
                Ok(None) => {}
                Err(e) => warn!(document_id = document.id, error = %e, "pipeline: citation extraction failed for document, skipping"),
            }
        }
        citations
    }
}

/// Name of one of the three search constructions the paper-checker
/// fans a counterfactual question's keywords out to (§4.7: "semantic,
/// hypothetical-document-embedding, keyword"). This core has no vector
/// index, so "semantic" and "HyDE" are both realized as distinct
/// LLM-mediated tsquery reformulations of the same question rather than
/// embedding lookups; "keyword" is the question's own keyword list.
/// DESIGN.md records this as the Open-Question decision for the
/// multi-strategy search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SearchStrategy {
    Keyword,
    Semantic,
    HydeLike,
}

impl SearchStrategy {
    fn event_label(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::HydeLike => "hyde_like",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvenancedDocument {
    pub document: Document,
    pub found_by: Vec<SearchStrategy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementVerdict {
    pub target_claim: String,
    pub verdict: Verdict,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaperCheckResult {
    pub main_claims: Vec<String>,
    pub statements: Vec<StatementVerdict>,
    pub overall_assessment: String,
    pub overall_confidence: Confidence,
}

impl PipelineController {
    /// The paper-checker flow (§4.7): extract claims, generate
    /// counterfactual questions per claim, run a multi-strategy search
    /// for counter-evidence, de-duplicate across strategies while
    /// recording provenance, score and cite the survivors, then ask the
    /// `VerdictAgent` to judge each claim and aggregate.
    pub async fn check_paper(&self, abstract_text: &str, title: Option<&str>, params: ResearchParams) -> BmResult<PaperCheckResult> {
        self.emit(event_type::PIPELINE_STAGE_START, "extract_claims", json!({ "stage": "extract_claims" }));
        let analysis = self.counterfactual_agent.analyze_document(abstract_text, title).await?;

        let Some(analysis) = analysis else {
            return Ok(PaperCheckResult {
                main_claims: Vec::new(),
                statements: Vec::new(),
                overall_assessment: "No checkable claims were found in the provided text.".to_string(),
                overall_confidence: Confidence::Low,
            });
        };

        let mut statements = Vec::new();
        for question in &analysis.counterfactual_questions {
            self.emit(
                event_type::PIPELINE_STAGE_START,
                "counter_search",
                json!({ "stage": "counter_search", "target_claim": question.target_claim }),
            );

            let candidates = self.multi_strategy_search(&question.question, &question.to_tsquery(), params.batch_size).await?;
            let scored = self.score_candidates(&question.question, &candidates).await;
            let relevant: Vec<&Document> = scored
                .iter()
                .filter(|(_, score)| score.meets_threshold(params.score_threshold))
                .map(|(doc, _)| doc)
                .collect();

            let citations = self.cite_documents(&question.question, relevant.into_iter()).await;

            let counter_report = self.reporting_agent.synthesize_report(&question.question, &citations, Some(1)).await?;
            let counter_report_text = counter_report.as_ref().map(|r| r.synthesized_answer.clone()).unwrap_or_else(|| "No counter-evidence was found.".to_string());

            match self.verdict_agent.analyze(&question.target_claim, &counter_report_text).await {
                Ok(verdict) => statements.push(StatementVerdict { target_claim: question.target_claim.clone(), verdict, citations }),
                Err(e) => warn!(target_claim = question.target_claim.as_str(), error = %e, "pipeline: verdict failed for claim, skipping"),
            }
        }

        let verdicts: Vec<Verdict> = statements.iter().map(|s| s.verdict.clone()).collect();
        let (overall_assessment, overall_confidence) = aggregate_verdicts(&verdicts);

        self.emit(
            event_type::PIPELINE_STAGE_START,
            "complete",
            json!({ "stage": "complete", "statements_evaluated": statements.len() }),
        );

        Ok(PaperCheckResult { main_claims: analysis.main_claims, statements, overall_assessment, overall_confidence })
    }

    /// Runs the question through three distinct tsquery constructions
    /// and de-duplicates the results by document id, recording which
    /// strategies surfaced each document (§4.7).
    async fn multi_strategy_search(&self, natural_question: &str, keyword_query: &str, batch_size: usize) -> BmResult<Vec<ProvenancedDocument>> {
        let mut by_id: HashMap<i64, ProvenancedDocument> = HashMap::new();

        let mut record = |strategy: SearchStrategy, docs: Vec<Document>| {
            for document in docs {
                by_id
                    .entry(document.id)
                    .and_modify(|existing| existing.found_by.push(strategy))
                    .or_insert_with(|| ProvenancedDocument { document, found_by: vec![strategy] });
            }
        };

        record(SearchStrategy::Keyword, self.query_agent.find_abstracts(keyword_query, 0, batch_size)?);

        match self.query_agent.convert_question(natural_question).await {
            Ok(semantic_query) => record(SearchStrategy::Semantic, self.query_agent.find_abstracts(&semantic_query, 0, batch_size)?),
            Err(e) => warn!(error = %e, "pipeline: semantic query construction failed, continuing with keyword results only"),
        }

        // A HyDE-style pass asks the model to phrase the query as if
        // quoting the hypothetical answer itself, then searches on
        // that; this core has no embedding index, so both the
        // "semantic" and "HyDE-like" passes reuse the same tsquery
        // backend rather than a vector store (see module docs).
        match self.query_agent.broaden_query(natural_question, keyword_query, 1).await {
            Ok(hyde_query) => record(SearchStrategy::HydeLike, self.query_agent.find_abstracts(&hyde_query, 0, batch_size)?),
            Err(e) => warn!(error = %e, "pipeline: hyde-like query construction failed, continuing without it"),
        }

        let mut per_strategy: HashMap<&'static str, usize> = HashMap::new();
        for provenanced in by_id.values() {
            for strategy in &provenanced.found_by {
                *per_strategy.entry(strategy.event_label()).or_default() += 1;
            }
        }
        self.emit(
            event_type::SEARCH_BATCH,
            format!("multi-strategy search surfaced {} unique documents", by_id.len()),
            json!({ "unique_documents": by_id.len(), "per_strategy": per_strategy }),
        );

        Ok(by_id.into_values().collect())
    }

    async fn score_candidates(&self, question: &str, candidates: &[ProvenancedDocument]) -> Vec<(Document, crate::domain::ScoringResult)> {
        let mut scored = Vec::new();
        for candidate in candidates {
            match self.scoring_agent.evaluate_document(question, &candidate.document).await {
                Ok(result) => scored.push((candidate.document.clone(), result)),
                Err(e) => warn!(document_id = candidate.document.id, error = %e, "pipeline: scoring failed for counter-evidence candidate, skipping"),
            }
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::InMemoryBackend;
    use crate::config::{CitationAgentConfig, CounterfactualAgentConfig, QueryAgentConfig, ReportingAgentConfig, ScoringAgentConfig, VerdictAgentConfig};
    use crate::domain::VerdictOutcome;
    use crate::error::BmError;
    use crate::llm::LlmGateway;
    use crate::llm::mock::MockProvider;

    fn doc(id: i64, title: &str, abstract_text: &str) -> Document {
        Document {
            id,
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            authors: vec!["Smith J".to_string()],
            publication_date: None,
            journal: None,
            pmid: None,
            doi: None,
            source_id: None,
        }
    }

    fn gateway(responses: Vec<Result<String, BmError>>) -> Arc<LlmGateway> {
        let provider = Arc::new(MockProvider::new("local", responses));
        Arc::new(LlmGateway::from_providers(vec![provider], "local", "test-model", None))
    }

    #[tokio::test]
    async fn research_produces_a_report_from_relevant_documents() {
        let backend = Arc::new(InMemoryBackend::new(vec![
            doc(1, "Exercise trial", "A randomized trial found exercise reduced readmissions."),
            doc(2, "Unrelated trial", "A study about diet and cholesterol."),
        ]));

        let query_agent = QueryAgent::new(gateway(vec![Ok("exercise".to_string())]), &QueryAgentConfig::default(), backend);
        let scoring_agent = DocumentScoringAgent::new(
            gateway(vec![Ok(r#"{"score": 4, "reasoning": "on topic"}"#.to_string()), Ok(r#"{"score": 2, "reasoning": "off topic"}"#.to_string())]),
            &ScoringAgentConfig::default(),
        );
        let citation_agent = CitationFinderAgent::new(
            gateway(vec![Ok(r#"{"found": true, "passage": "A randomized trial found exercise reduced readmissions.", "summary": "exercise helps", "relevance_score": 0.9}"#.to_string())]),
            &CitationAgentConfig::default(),
        );
        let reporting_agent = ReportingAgent::new(gateway(vec![Ok("Exercise reduces readmissions [1].".to_string())]), &ReportingAgentConfig::default());
        let counterfactual_agent = CounterfactualAgent::new(gateway(vec![]), &CounterfactualAgentConfig::default());
        let verdict_agent = VerdictAgent::new(gateway(vec![]), &VerdictAgentConfig::default());

        let pipeline = PipelineController::new(query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent);
        let report = pipeline
            .research("does exercise reduce readmissions?", ResearchParams { min_relevant: 1, score_threshold: 3.0, max_retry: 2, batch_size: 2, min_citations: 1 })
            .await
            .unwrap()
            .expect("enough citations were found to synthesize a report");

        assert_eq!(report.citation_count, 1);
        assert!(report.markers_are_in_range());
    }

    #[tokio::test]
    async fn check_paper_with_no_claims_returns_empty_result() {
        let backend = Arc::new(InMemoryBackend::new(vec![]));
        let query_agent = QueryAgent::new(gateway(vec![]), &QueryAgentConfig::default(), backend);
        let scoring_agent = DocumentScoringAgent::new(gateway(vec![]), &ScoringAgentConfig::default());
        let citation_agent = CitationFinderAgent::new(gateway(vec![]), &CitationAgentConfig::default());
        let reporting_agent = ReportingAgent::new(gateway(vec![]), &ReportingAgentConfig::default());
        let counterfactual_agent = CounterfactualAgent::new(gateway(vec![Ok(r#"{"main_claims": []}"#.to_string())]), &CounterfactualAgentConfig::default());
        let verdict_agent = VerdictAgent::new(gateway(vec![]), &VerdictAgentConfig::default());

        let pipeline = PipelineController::new(query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent);
        let result = pipeline.check_paper("some text with no checkable claims", None, ResearchParams::default()).await.unwrap();

        assert!(result.main_claims.is_empty());
        assert!(result.statements.is_empty());
    }

    #[tokio::test]
    async fn check_paper_evaluates_each_counterfactual_question() {
        let backend = Arc::new(InMemoryBackend::new(vec![doc(1, "Counter trial", "A trial found no benefit of exercise on readmissions.")]));

        let query_agent = QueryAgent::new(
            gateway(vec![Ok("exercise".to_string()), Ok("exercise & readmission".to_string())]),
            &QueryAgentConfig::default(),
            backend,
        );
        let scoring_agent = DocumentScoringAgent::new(gateway(vec![Ok(r#"{"score": 4, "reasoning": "directly contradicts"}"#.to_string())]), &ScoringAgentConfig::default());
        let citation_agent = CitationFinderAgent::new(
            gateway(vec![Ok(r#"{"found": true, "passage": "A trial found no benefit of exercise on readmissions.", "summary": "no benefit found", "relevance_score": 0.8}"#.to_string())]),
            &CitationAgentConfig::default(),
        );
        let reporting_agent = ReportingAgent::new(gateway(vec![Ok("No benefit was found [1].".to_string())]), &ReportingAgentConfig::default());
        let counterfactual_agent = CounterfactualAgent::new(
            gateway(vec![Ok(
                r#"{"main_claims": ["exercise reduces readmissions"], "questions": [{"counterfactual_statement": "exercise has no effect", "question": "does exercise fail to reduce readmissions?", "reasoning": "check for null results", "target_claim": "exercise reduces readmissions", "search_keywords": ["exercise", "readmission"], "priority": "HIGH"}], "overall_assessment": "one claim found", "confidence_level": "MEDIUM"}"#
                    .to_string(),
            )]),
            &CounterfactualAgentConfig::default(),
        );
        let verdict_agent = VerdictAgent::new(
            gateway(vec![Ok(
                r#"{"outcome": "contradicts", "confidence": "high", "rationale": "The single retrieved trial reports no significant benefit."}"#.to_string(),
            )]),
            &VerdictAgentConfig::default(),
        );

        let pipeline = PipelineController::new(query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent);
        let result = pipeline.check_paper("Exercise reduces readmissions.", Some("Exercise study"), ResearchParams { min_relevant: 1, score_threshold: 3.0, max_retry: 1, batch_size: 5, min_citations: 1 }).await.unwrap();

        assert_eq!(result.statements.len(), 1);
        assert_eq!(result.statements[0].verdict.outcome, VerdictOutcome::Contradicts);
        assert_eq!(result.overall_confidence, Confidence::High);
    }
}
