//! Read-only document records as retrieved from the external search
//! backend. The core never writes these back; it only ever reads and
//! forwards them between agents.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub publication_date: Option<NaiveDate>,
    pub journal: Option<String>,
    pub pmid: Option<String>,
    pub doi: Option<String>,
    pub source_id: Option<String>,
}

impl Document {
    /// Fields required for scoring and citation, per §3: id, title,
    /// abstract, authors, publication_date, pmid, doi.
    pub fn has_required_fields(&self) -> bool {
        !self.title.is_empty() && !self.abstract_text.is_empty()
    }
}
