//! Citations extracted by the `CitationFinderAgent`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use bmlibrarian_store::now_ms;

/// A quoted passage tying a claim back to a specific, already-seen
/// document. `document_id` is never supplied by the LLM — callers must
/// set it from the `Document` they handed to the agent (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub passage: String,
    pub summary: String,
    pub relevance_score: f32,
    pub document_id: i64,
    pub document_title: String,
    pub authors: Vec<String>,
    pub publication_date: Option<NaiveDate>,
    pub pmid: Option<String>,
    pub created_at: i64,
}

impl Citation {
    pub fn new(
        passage: impl Into<String>,
        summary: impl Into<String>,
        relevance_score: f32,
        document_id: i64,
        document_title: impl Into<String>,
        authors: Vec<String>,
        publication_date: Option<NaiveDate>,
        pmid: Option<String>,
    ) -> Self {
        Self {
            passage: passage.into(),
            summary: summary.into(),
            relevance_score: relevance_score.clamp(0.0, 1.0),
            document_id,
            document_title: document_title.into(),
            authors,
            publication_date,
            pmid,
            created_at: now_ms(),
        }
    }

    /// §8 invariant 5: the passage must be a substring of the source
    /// text the agent was given.
    pub fn passage_is_grounded(&self, source_text: &str) -> bool {
        source_text.contains(&self.passage)
    }
}
