//! Output of `VerdictAgent::analyze` and the paper-checker's aggregation
//! across several per-statement verdicts.

use serde::{Deserialize, Serialize};

use bmlibrarian_store::now_ms;

use crate::error::{BmError, BmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictOutcome {
    Supports,
    Contradicts,
    Undecided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A single judgement produced by `VerdictAgent::analyze`, with the
/// rationale validated against a minimum length (enforced by the agent,
/// not the type itself — the constructor just records the bound check).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: VerdictOutcome,
    pub confidence: Confidence,
    pub rationale: String,
    pub counter_report_ref: String,
    pub created_at: i64,
}

impl Verdict {
    pub fn new(
        outcome: VerdictOutcome,
        confidence: Confidence,
        rationale: impl Into<String>,
        counter_report_ref: impl Into<String>,
        min_rationale_length: usize,
    ) -> BmResult<Self> {
        let rationale = rationale.into();
        if rationale.trim().len() < min_rationale_length {
            return Err(BmError::validation(format!(
                "verdict rationale too short: {} chars, need >= {min_rationale_length}",
                rationale.trim().len()
            )));
        }
        Ok(Self {
            outcome,
            confidence,
            rationale,
            counter_report_ref: counter_report_ref.into(),
            created_at: now_ms(),
        })
    }
}

/// Aggregate several per-statement verdicts (the paper-checker flow) into
/// one overall assessment. Per §8 scenario F: the aggregate confidence
/// never exceeds the minimum input confidence, and the prose mentions
/// both "support" and "contradict" whenever both outcomes are present.
pub fn aggregate_verdicts(verdicts: &[Verdict]) -> (String, Confidence) {
    if verdicts.is_empty() {
        return ("No statements were evaluated.".to_string(), Confidence::Low);
    }

    let supports = verdicts.iter().filter(|v| v.outcome == VerdictOutcome::Supports).count();
    let contradicts = verdicts.iter().filter(|v| v.outcome == VerdictOutcome::Contradicts).count();
    let undecided = verdicts.iter().filter(|v| v.outcome == VerdictOutcome::Undecided).count();

    let aggregate_confidence = verdicts.iter().map(|v| v.confidence).min().unwrap_or(Confidence::Low);

    let mut prose = format!(
        "Of {} evaluated statements, {supports} support, {contradicts} contradict, and {undecided} are undecided.",
        verdicts.len()
    );
    if supports > 0 && contradicts > 0 {
        prose.push_str(" The evidence is mixed, with both supporting and contradicting findings.");
    } else if supports > 0 {
        prose.push_str(" The evidence predominantly supports the reviewed claims.");
    } else if contradicts > 0 {
        prose.push_str(" The evidence predominantly contradicts the reviewed claims.");
    }

    (prose, aggregate_confidence)
}
