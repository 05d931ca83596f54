//! `IterativeSearchDriver` (§4.6): interleaves retrieval with
//! relevance scoring and adaptively broadens the query until a
//! relevance target is met or the retry budget is exhausted.

use std::collections::HashSet;

use serde_json::json;
use tracing::warn;

use crate::agents::{DocumentScoringAgent, QueryAgent};
use crate::domain::Document;
use crate::domain::ScoringResult;
use crate::error::BmResult;
use crate::events::{EventBus, event_type};

/// Sits above [`QueryAgent`] and [`DocumentScoringAgent`]; the
/// requirement that it never calls the backend without a scoring agent
/// (§4.6) is enforced by construction — there is no way to build a
/// driver without one.
pub struct IterativeSearchDriver<'a> {
    query_agent: &'a QueryAgent,
    scoring_agent: &'a DocumentScoringAgent,
    events: Option<EventBus>,
}

impl<'a> IterativeSearchDriver<'a> {
    pub fn new(query_agent: &'a QueryAgent, scoring_agent: &'a DocumentScoringAgent, events: Option<EventBus>) -> Self {
        Self { query_agent, scoring_agent, events }
    }

    fn emit(&self, event_type: &str, message: impl Into<String>, data: serde_json::Value) {
        if let Some(bus) = &self.events {
            bus.emit(event_type.to_string(), message, data);
        }
    }

    /// Runs both phases and returns `(all_unique_documents,
    /// all_scored_documents)` regardless of whether `min_relevant` was
    /// met — the driver never raises on exhaustion (§4.6).
    pub async fn search(&self, question: &str, min_relevant: usize, score_threshold: f32, max_retry: u32, batch_size: usize) -> BmResult<(Vec<Document>, Vec<ScoringResult>)> {
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut all_documents: Vec<Document> = Vec::new();
        let mut all_scored: Vec<ScoringResult> = Vec::new();

        let mut relevant_count = 0usize;
        let query = self.query_agent.convert_question(question).await?;

        // Phase 1: offset pagination on the original query.
        let mut offset = 0usize;
        for attempt in 0..max_retry {
            if relevant_count >= min_relevant {
                break;
            }
            let batch = self.query_agent.find_abstracts(&query, offset, batch_size)?;
            offset += batch_size;

            if batch.is_empty() {
                self.emit(event_type::SEARCH_EXHAUSTED, "offset pagination returned no further documents", json!({ "phase": 1, "attempt": attempt }));
                break;
            }

            let newly_scored = self.score_unseen(question, &batch, score_threshold, &mut seen_ids, &mut all_documents, &mut all_scored).await;
            relevant_count += newly_scored;

            self.emit(
                event_type::SEARCH_BATCH,
                format!("phase 1 batch {attempt}: {} new documents scored", batch.len()),
                json!({ "phase": 1, "attempt": attempt, "relevant_count": relevant_count }),
            );
        }

        // Phase 2: query broadening, up to max_retry attempts.
        let mut broadened_query = query.clone();
        let mut inner_retry = 0u32;
        while relevant_count < min_relevant && inner_retry < max_retry {
            inner_retry += 1;
            broadened_query = match self.query_agent.broaden_query(question, &broadened_query, inner_retry).await {
                Ok(q) => q,
                Err(e) => {
                    warn!(error = %e, attempt = inner_retry, "iterative search: query broadening failed, stopping phase 2");
                    break;
                }
            };

            let batch = self.query_agent.find_abstracts(&broadened_query, 0, batch_size * 2)?;
            if batch.is_empty() {
                self.emit(
                    event_type::SEARCH_EXHAUSTED,
                    "broadened query returned no further documents",
                    json!({ "phase": 2, "attempt": inner_retry }),
                );
                continue;
            }

            let newly_scored = self.score_unseen(question, &batch, score_threshold, &mut seen_ids, &mut all_documents, &mut all_scored).await;
            relevant_count += newly_scored;

            self.emit(
                event_type::SEARCH_BATCH,
                format!("phase 2 attempt {inner_retry}: {} new documents scored", batch.len()),
                json!({ "phase": 2, "attempt": inner_retry, "relevant_count": relevant_count }),
            );
        }

        if relevant_count < min_relevant {
            self.emit(
                event_type::SEARCH_EXHAUSTED,
                format!("search exhausted with only {relevant_count}/{min_relevant} relevant documents found"),
                json!({ "relevant_count": relevant_count, "min_relevant": min_relevant }),
            );
        }

        Ok((all_documents, all_scored))
    }

    /// Score every document in `batch` not already in `seen_ids`,
    /// appending to the accumulators. A scoring failure on one document
    /// is logged and skipped, never aborting the search (§4.6).
    /// Returns the count of newly-scored documents meeting
    /// `score_threshold`.
    async fn score_unseen(
        &self,
        question: &str,
        batch: &[Document],
        score_threshold: f32,
        seen_ids: &mut HashSet<i64>,
        all_documents: &mut Vec<Document>,
        all_scored: &mut Vec<ScoringResult>,
    ) -> usize {
        let mut newly_relevant = 0;
        for document in batch {
            if !seen_ids.insert(document.id) {
                continue;
            }
            all_documents.push(document.clone());

            match self.scoring_agent.evaluate_document(question, document).await {
                Ok(result) => {
                    if result.meets_threshold(score_threshold) {
                        newly_relevant += 1;
                    }
                    all_scored.push(result);
                }
                Err(e) => {
                    warn!(document_id = document.id, error = %e, "iterative search: scoring failed for document, skipping");
                }
            }
        }
        newly_relevant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::{QueryAgentConfig, ScoringAgentConfig};
    use crate::error::BmError;
    use crate::llm::mock::MockProvider;
    use crate::llm::LlmGateway;
    use std::sync::Arc;

    fn doc(id: i64, score_hint: &str) -> Document {
        Document {
            id,
            title: format!("Document {id}"),
            abstract_text: format!("exercise study {score_hint}"),
            authors: vec![],
            publication_date: None,
            journal: None,
            pmid: None,
            doi: None,
            source_id: None,
        }
    }

    fn scoring_response(score: u32) -> Result<String, BmError> {
        Ok(format!(r#"{{"score": {score}, "reasoning": "auto"}}"#))
    }

    #[tokio::test]
    async fn phase_one_succeeds_without_broadening() {
        let backend = Arc::new(InMemoryBackend::new((1..=6).map(|i| doc(i, "exercise")).collect()));

        let query_provider = Arc::new(MockProvider::new("local", vec![Ok("exercise".to_string())]));
        let query_gateway = Arc::new(LlmGateway::from_providers(vec![query_provider], "local", "test-model", None));
        let query_agent = QueryAgent::new(query_gateway, &QueryAgentConfig::default(), backend);

        let scoring_provider = Arc::new(MockProvider::new("local", (0..6).map(|_| scoring_response(5)).collect()));
        let scoring_gateway = Arc::new(LlmGateway::from_providers(vec![scoring_provider], "local", "test-model", None));
        let scoring_agent = DocumentScoringAgent::new(scoring_gateway, &ScoringAgentConfig::default());

        let driver = IterativeSearchDriver::new(&query_agent, &scoring_agent, None);
        let (docs, scored) = driver.search("does exercise help?", 3, 2.5, 3, 3).await.unwrap();

        assert!(docs.len() >= 3);
        assert_eq!(docs.len(), scored.len());
        let unique_ids: HashSet<_> = scored.iter().map(|s| s.document_id).collect();
        assert_eq!(unique_ids.len(), scored.len(), "no duplicate scored ids (§8 property 7)");
    }

    #[tokio::test]
    async fn exhaustion_returns_whatever_was_found_without_raising() {
        let backend = Arc::new(InMemoryBackend::new(vec![doc(1, "exercise"), doc(2, "exercise")]));

        let query_provider = Arc::new(MockProvider::new("local", vec![Ok("exercise".to_string())]));
        let query_gateway = Arc::new(LlmGateway::from_providers(vec![query_provider], "local", "test-model", None));
        let query_agent = QueryAgent::new(query_gateway, &QueryAgentConfig::default(), backend);

        let scoring_provider = Arc::new(MockProvider::new("local", (0..2).map(|_| scoring_response(4)).collect()));
        let scoring_gateway = Arc::new(LlmGateway::from_providers(vec![scoring_provider], "local", "test-model", None));
        let scoring_agent = DocumentScoringAgent::new(scoring_gateway, &ScoringAgentConfig::default());

        let driver = IterativeSearchDriver::new(&query_agent, &scoring_agent, None);
        let (docs, scored) = driver.search("does exercise help?", 10, 2.5, 2, 3).await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(scored.len(), 2);
    }
}
