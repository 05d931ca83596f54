//! Deduplicated reference entries that back a [`super::report::Report`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::citation::Citation;

/// One entry in a report's numbered reference list. `number` is the
/// 1-based position assigned by [`build_references`], unique within a
/// report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reference {
    pub number: u32,
    pub authors: Vec<String>,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub pmid: Option<String>,
    pub doi: Option<String>,
    pub document_id: i64,
}

/// Deduplicate citations by `document_id`, preserving first-seen order,
/// and assign 1-based reference numbers. Returns the reference list plus
/// a map from the original citation index to its assigned reference
/// number, so callers can rewrite `[N]` markers against the final
/// numbering.
pub fn build_references(citations: &[Citation]) -> (Vec<Reference>, Vec<u32>) {
    let mut references = Vec::new();
    let mut seen: Vec<i64> = Vec::new();
    let mut numbering = Vec::with_capacity(citations.len());

    for citation in citations {
        let position = seen.iter().position(|id| *id == citation.document_id);
        let number = match position {
            Some(idx) => (idx + 1) as u32,
            None => {
                seen.push(citation.document_id);
                references.push(Reference {
                    number: seen.len() as u32,
                    authors: citation.authors.clone(),
                    title: citation.document_title.clone(),
                    date: citation.publication_date,
                    pmid: citation.pmid.clone(),
                    doi: None,
                    document_id: citation.document_id,
                });
                seen.len() as u32
            }
        };
        numbering.push(number);
    }

    (references, numbering)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(document_id: i64, title: &str) -> Citation {
        Citation::new("passage", "summary", 0.8, document_id, title, vec![], None, None)
    }

    #[test]
    fn dedups_by_document_id_preserving_first_seen_order() {
        let citations = vec![citation(1, "A"), citation(2, "B"), citation(1, "A")];
        let (refs, numbering) = build_references(&citations);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].document_id, 1);
        assert_eq!(refs[1].document_id, 2);
        assert_eq!(numbering, vec![1, 2, 1]);
    }

    #[test]
    fn numbers_have_no_gaps() {
        let citations = vec![citation(5, "A"), citation(6, "B"), citation(7, "C")];
        let (refs, _) = build_references(&citations);
        let numbers: Vec<_> = refs.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
