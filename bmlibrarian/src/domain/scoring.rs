//! Relevance scores produced by the `DocumentScoringAgent`.

use serde::{Deserialize, Serialize};

/// A relevance judgement for one document against one question.
/// Immutable once returned; `score` is constrained to `[1, 5]` per §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringResult {
    pub document_id: i64,
    pub score: f32,
    pub reasoning: String,
}

impl ScoringResult {
    pub fn new(document_id: i64, score: f32, reasoning: impl Into<String>) -> Self {
        Self {
            document_id,
            score: score.clamp(1.0, 5.0),
            reasoning: reasoning.into(),
        }
    }

    pub fn meets_threshold(&self, threshold: f32) -> bool {
        self.score >= threshold
    }
}
