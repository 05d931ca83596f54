//! Process-wide usage and cost accounting (§4.4), updated on every
//! gateway call regardless of which agent issued it.

use std::collections::HashMap;
use std::sync::Mutex;

use super::types::Usage;

/// One row of accumulated usage for a `(provider, model)` pair.
#[derive(Debug, Clone, Default)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
    pub cost: f64,
}

/// Per-model cost in currency units per 1,000 tokens (prompt and
/// completion priced the same; the core does not need split pricing).
/// Looked up by longest-prefix match against the model name, so a
/// versioned name like `gpt-4o-mini-2024-07-18` resolves to the
/// `gpt-4o-mini` base price.
#[derive(Debug, Clone, Default)]
pub struct CostTable(HashMap<String, f64>);

impl CostTable {
    pub fn new(table: HashMap<String, f64>) -> Self {
        Self(table)
    }

    pub fn price_per_1k(&self, model: &str) -> f64 {
        self.0
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, price)| *price)
            .unwrap_or(0.0)
    }
}

#[derive(Default)]
struct Inner {
    totals: HashMap<(String, String), UsageTotals>,
}

/// A single shared sink, guarded by a mutex (§5 shared-resource policy).
pub struct TokenTracker {
    inner: Mutex<Inner>,
    costs: CostTable,
}

impl TokenTracker {
    pub fn new(costs: CostTable) -> Self {
        Self { inner: Mutex::new(Inner::default()), costs }
    }

    pub fn record(&self, provider: &str, model: &str, usage: Usage) {
        let cost = self.costs.price_per_1k(model) * (usage.total_tokens() as f64 / 1000.0);
        let mut inner = self.inner.lock().expect("token tracker mutex poisoned");
        let entry = inner.totals.entry((provider.to_string(), model.to_string())).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.requests += 1;
        entry.cost += cost;
    }

    pub fn totals_for(&self, provider: &str, model: &str) -> UsageTotals {
        self.inner
            .lock()
            .expect("token tracker mutex poisoned")
            .totals
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn grand_total_cost(&self) -> f64 {
        self.inner
            .lock()
            .expect("token tracker mutex poisoned")
            .totals
            .values()
            .map(|t| t.cost)
            .sum()
    }
}
