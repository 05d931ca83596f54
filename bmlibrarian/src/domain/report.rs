//! The synthesized output of `ReportingAgent::synthesize_report`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use bmlibrarian_store::now_ms;

use super::citation::Citation;
use super::reference::{Reference, build_references};

/// Categorical evidence-quality label derived from citation volume and
/// mean relevance. Thresholds are calibrated against the reference
/// corpus's worked examples: five-plus well-supported citations read as
/// Strong, three as Moderate, one or two as Limited, none as
/// Insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceStrength {
    Strong,
    Moderate,
    Limited,
    Insufficient,
}

impl std::fmt::Display for EvidenceStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "Strong"),
            Self::Moderate => write!(f, "Moderate"),
            Self::Limited => write!(f, "Limited"),
            Self::Insufficient => write!(f, "Insufficient"),
        }
    }
}

/// Assess evidence strength from a citation set using unique-document
/// count and mean relevance score.
pub fn assess_evidence_strength(citations: &[Citation]) -> EvidenceStrength {
    if citations.is_empty() {
        return EvidenceStrength::Insufficient;
    }

    let unique_documents: HashSet<i64> = citations.iter().map(|c| c.document_id).collect();
    let unique_count = unique_documents.len();
    let mean_relevance: f32 = citations.iter().map(|c| c.relevance_score).sum::<f32>() / citations.len() as f32;

    if unique_count >= 5 && mean_relevance >= 0.8 {
        EvidenceStrength::Strong
    } else if unique_count >= 3 {
        EvidenceStrength::Moderate
    } else {
        EvidenceStrength::Limited
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub user_question: String,
    pub synthesized_answer: String,
    pub references: Vec<Reference>,
    pub evidence_strength: EvidenceStrength,
    pub methodology_note: String,
    pub citation_count: usize,
    pub unique_documents: usize,
    pub created_at: i64,
}

impl Report {
    /// Build a report from raw citations plus the LLM-synthesized prose.
    /// `[N]` markers in `raw_answer` are assumed to refer to the
    /// citation's position in `citations`; they are rewritten here to
    /// the final, deduplicated reference numbering (§4.7).
    pub fn synthesize(
        user_question: impl Into<String>,
        citations: &[Citation],
        raw_answer: &str,
        methodology_note: impl Into<String>,
    ) -> Self {
        let (references, numbering) = build_references(citations);
        let synthesized_answer = rewrite_markers(raw_answer, &numbering);
        let unique_documents = references.len();

        Self {
            user_question: user_question.into(),
            synthesized_answer,
            references,
            evidence_strength: assess_evidence_strength(citations),
            methodology_note: methodology_note.into(),
            citation_count: citations.len(),
            unique_documents,
            created_at: now_ms(),
        }
    }

    /// §8 invariant 6: every `[k]` marker resolves to `1 <= k <= N`.
    pub fn markers_are_in_range(&self) -> bool {
        let n = self.references.len() as u32;
        extract_markers(&self.synthesized_answer)
            .into_iter()
            .all(|k| k >= 1 && k <= n)
    }
}

/// Rewrite `[i]` markers (1-based index into the original citation
/// order) to `[numbering[i-1]]` (the final reference number).
fn rewrite_markers(text: &str, numbering: &[u32]) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(end) = text[i + 1..].find(']') {
                let digits = &text[i + 1..i + 1 + end];
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    if let Ok(idx) = digits.parse::<usize>() {
                        if idx >= 1 && idx <= numbering.len() {
                            out.push('[');
                            out.push_str(&numbering[idx - 1].to_string());
                            out.push(']');
                            i += 2 + end;
                            continue;
                        }
                    }
                }
            }
        }
        let ch = text[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Extract every `[N]` marker's numeric value from a report's prose.
pub fn extract_markers(text: &str) -> Vec<u32> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(end) = text[i + 1..].find(']') {
                let digits = &text[i + 1..i + 1 + end];
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    if let Ok(n) = digits.parse::<u32>() {
                        out.push(n);
                    }
                }
                i += 2 + end;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(document_id: i64, relevance: f32) -> Citation {
        Citation::new("passage", "summary", relevance, document_id, "Title", vec!["A".into()], None, None)
    }

    #[test]
    fn five_strong_citations_are_strong() {
        let citations: Vec<_> = (1..=5).map(|id| citation(id, 0.87)).collect();
        assert_eq!(assess_evidence_strength(&citations), EvidenceStrength::Strong);
    }

    #[test]
    fn three_citations_are_moderate() {
        let citations: Vec<_> = (1..=3).map(|id| citation(id, 0.85)).collect();
        assert_eq!(assess_evidence_strength(&citations), EvidenceStrength::Moderate);
    }

    #[test]
    fn two_citations_are_limited() {
        let citations: Vec<_> = (1..=2).map(|id| citation(id, 0.85)).collect();
        assert_eq!(assess_evidence_strength(&citations), EvidenceStrength::Limited);
    }

    #[test]
    fn no_citations_are_insufficient() {
        assert_eq!(assess_evidence_strength(&[]), EvidenceStrength::Insufficient);
    }

    #[test]
    fn synthesize_rewrites_markers_to_final_numbering() {
        let citations = vec![citation(10, 0.9), citation(20, 0.8), citation(10, 0.7)];
        let raw = "First point [1]. Second point [2]. Repeated source [3].";
        let report = Report::synthesize("question?", &citations, raw, "note");

        assert_eq!(report.references.len(), 2);
        assert!(report.synthesized_answer.contains("[1]"));
        assert!(report.synthesized_answer.contains("[2]"));
        assert!(report.markers_are_in_range());
    }

    #[test]
    fn extract_markers_finds_all_numeric_refs() {
        let markers = extract_markers("a [1] b [3] c [2]");
        assert_eq!(markers, vec![1, 3, 2]);
    }
}
