//! Output of `CounterfactualAgent::analyze_document`.

use serde::{Deserialize, Serialize};

use bmlibrarian_store::now_ms;

/// Urgency of pursuing a given counterfactual question, independent of
/// [`crate::domain::priority::Priority`] (which ranks queue tasks, not
/// research questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionPriority {
    High,
    Medium,
    Low,
}

/// A single adversarial question generated against one of a document's
/// claims, along with search keywords formatted for the retrieval
/// backend's tsquery dialect (multi-word phrases quoted, operators
/// explicit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualQuestion {
    pub counterfactual_statement: String,
    pub question: String,
    pub reasoning: String,
    pub target_claim: String,
    pub search_keywords: Vec<String>,
    pub priority: QuestionPriority,
    pub created_at: i64,
}

impl CounterfactualQuestion {
    pub fn new(
        counterfactual_statement: impl Into<String>,
        question: impl Into<String>,
        reasoning: impl Into<String>,
        target_claim: impl Into<String>,
        search_keywords: Vec<String>,
        priority: QuestionPriority,
    ) -> Self {
        Self {
            counterfactual_statement: counterfactual_statement.into(),
            question: question.into(),
            reasoning: reasoning.into(),
            target_claim: target_claim.into(),
            search_keywords,
            priority,
            created_at: now_ms(),
        }
    }

    /// A tsquery fragment joining keywords with AND, quoting any
    /// multi-word keyword as a phrase.
    pub fn to_tsquery(&self) -> String {
        self.search_keywords
            .iter()
            .map(|k| if k.contains(' ') { format!("'{k}'") } else { k.clone() })
            .collect::<Vec<_>>()
            .join(" & ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Bundles the claims extracted from a document or report with the
/// adversarial questions generated against them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualAnalysis {
    pub document_title: Option<String>,
    pub main_claims: Vec<String>,
    pub counterfactual_questions: Vec<CounterfactualQuestion>,
    pub overall_assessment: String,
    pub confidence_level: ConfidenceLevel,
    pub created_at: i64,
}

impl CounterfactualAnalysis {
    pub fn new(
        document_title: Option<String>,
        main_claims: Vec<String>,
        counterfactual_questions: Vec<CounterfactualQuestion>,
        overall_assessment: impl Into<String>,
        confidence_level: ConfidenceLevel,
    ) -> Self {
        Self {
            document_title,
            main_claims,
            counterfactual_questions,
            overall_assessment: overall_assessment.into(),
            confidence_level,
            created_at: now_ms(),
        }
    }

    pub fn high_priority_questions(&self) -> impl Iterator<Item = &CounterfactualQuestion> {
        self.counterfactual_questions
            .iter()
            .filter(|q| q.priority == QuestionPriority::High)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsquery_quotes_multi_word_keywords() {
        let question = CounterfactualQuestion::new(
            "stmt",
            "question?",
            "reasoning",
            "claim",
            vec!["exercise".to_string(), "heart failure".to_string()],
            QuestionPriority::High,
        );
        assert_eq!(question.to_tsquery(), "exercise & 'heart failure'");
    }

    #[test]
    fn high_priority_filter_selects_only_high() {
        let high = CounterfactualQuestion::new("s", "q", "r", "c", vec![], QuestionPriority::High);
        let low = CounterfactualQuestion::new("s", "q", "r", "c", vec![], QuestionPriority::Low);
        let analysis = CounterfactualAnalysis::new(None, vec![], vec![high, low], "assessment", ConfidenceLevel::Medium);

        assert_eq!(analysis.high_priority_questions().count(), 1);
    }
}
