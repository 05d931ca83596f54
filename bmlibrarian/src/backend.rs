//! The external search-backend interface (§6). The core never builds
//! raw SQL; it emits tsquery strings and consumes whatever a concrete
//! [`SearchBackend`] hands back. The real backend (a relational store
//! with a full-text index) lives outside the core's scope — this trait
//! is the seam a caller plugs a concrete implementation into.

use crate::domain::Document;
use crate::error::BmResult;

pub trait SearchBackend: Send + Sync {
    /// Run `tsquery` against the backend's full-text index, returning
    /// up to `limit` documents starting at `offset`.
    fn find_abstracts(&self, tsquery: &str, limit: usize, offset: usize) -> BmResult<Vec<Document>>;

    /// Fetch documents by primary key, in no particular order. Used to
    /// materialise documents discovered by id (e.g. via an external
    /// vector-search strategy) before scoring or citation.
    fn fetch_documents_by_ids(&self, ids: &[i64]) -> BmResult<Vec<Document>>;
}

/// An in-process, in-memory [`SearchBackend`] useful for tests and for
/// small embedded deployments that do not need the full relational
/// store. tsquery strings are matched against title/abstract text with
/// a simplified reading of the dialect (§6): `AND`/`&`, `OR`/`|`, and
/// `!`-prefixed negation on bare terms, case-insensitive substring
/// matching per term.
pub struct InMemoryBackend {
    documents: Vec<Document>,
}

impl InMemoryBackend {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    fn matches(&self, doc: &Document, tsquery: &str) -> bool {
        let haystack = format!("{} {}", doc.title, doc.abstract_text).to_lowercase();
        // OR has lower precedence than AND: split on top-level `|` / OR
        // first, then require every AND-clause within a branch to hold.
        let branches: Vec<&str> = tsquery.split(|c| c == '|').flat_map(|s| s.split(" OR ")).collect();

        branches.iter().any(|branch| {
            branch
                .split(|c: char| c == '&' || c.is_whitespace())
                .map(str::trim)
                .filter(|t| !t.is_empty() && *t != "AND")
                .all(|term| {
                    let (negate, term) = match term.strip_prefix('!') {
                        Some(rest) => (true, rest),
                        None => (false, term),
                    };
                    let term = term.trim_matches('\'').to_lowercase();
                    let present = haystack.contains(&term);
                    present != negate
                })
        })
    }
}

impl SearchBackend for InMemoryBackend {
    fn find_abstracts(&self, tsquery: &str, limit: usize, offset: usize) -> BmResult<Vec<Document>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| self.matches(d, tsquery))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn fetch_documents_by_ids(&self, ids: &[i64]) -> BmResult<Vec<Document>> {
        Ok(self.documents.iter().filter(|d| ids.contains(&d.id)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i64, title: &str, abstract_text: &str) -> Document {
        Document {
            id,
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            authors: vec![],
            publication_date: None,
            journal: None,
            pmid: None,
            doi: None,
            source_id: None,
        }
    }

    #[test]
    fn matches_and_query() {
        let backend = InMemoryBackend::new(vec![
            doc(1, "Exercise and heart failure", "discusses cardiac rehab"),
            doc(2, "Diet and diabetes", "discusses nutrition"),
        ]);
        let results = backend.find_abstracts("exercise & heart", 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }

    #[test]
    fn negation_excludes_matches() {
        let backend = InMemoryBackend::new(vec![
            doc(1, "Exercise and heart failure", ""),
            doc(2, "Exercise and weight loss", ""),
        ]);
        let results = backend.find_abstracts("exercise & !heart", 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);
    }

    #[test]
    fn offset_and_limit_paginate() {
        let backend = InMemoryBackend::new((1..=5).map(|i| doc(i, "exercise", "")).collect());
        let page = backend.find_abstracts("exercise", 2, 2).unwrap();
        assert_eq!(page.iter().map(|d| d.id).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn fetch_by_ids_returns_requested_documents() {
        let backend = InMemoryBackend::new((1..=5).map(|i| doc(i, "t", "a")).collect());
        let fetched = backend.fetch_documents_by_ids(&[2, 4]).unwrap();
        assert_eq!(fetched.len(), 2);
    }
}
