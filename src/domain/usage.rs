//! Per-debate usage tracking and budget enforcement.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::llm::{Provider, Usage};

/// Caller-configured spend limits for a single debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    pub max_tokens: Option<u64>,
    pub max_cost_usd: Option<f64>,
    pub early_stop_delta: Option<f64>,
}

/// One recorded LLM call, folded into the debate's running totals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageCall {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
    pub provider: Provider,
}

/// Running totals of tokens and cost across all calls in one debate run.
///
/// Per-run, never shared across debates — constructed fresh by the
/// pipeline driver at the start of each run.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    inner: Mutex<UsageTotals>,
}

#[derive(Debug, Default, Clone, Copy)]
struct UsageTotals {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
    cost_usd: f64,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one call's usage into the running totals.
    pub fn record(&self, provider: Provider, usage: Usage) -> UsageCall {
        let mut totals = self.inner.lock();
        totals.prompt_tokens += u64::from(usage.prompt_tokens);
        totals.completion_tokens += u64::from(usage.completion_tokens);
        totals.total_tokens += u64::from(usage.total_tokens);
        let cost = usage.cost_usd.unwrap_or(0.0);
        totals.cost_usd += cost;

        UsageCall {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cost_usd: cost,
            provider,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.inner.lock().total_tokens
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.inner.lock().cost_usd
    }

    /// Whether the configured budget has been exceeded, and why.
    pub fn budget_exceeded(&self, budget: &BudgetConfig) -> Option<&'static str> {
        let totals = self.inner.lock();
        if let Some(max_tokens) = budget.max_tokens {
            if totals.total_tokens >= max_tokens {
                return Some("token_budget_exceeded");
            }
        }
        if let Some(max_cost) = budget.max_cost_usd {
            if totals.cost_usd >= max_cost {
                return Some("cost_budget_exceeded");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_sums_across_calls() {
        let acc = UsageAccumulator::new();
        acc.record(
            Provider::OpenAi,
            Usage { prompt_tokens: 10, completion_tokens: 20, total_tokens: 30, cost_usd: Some(0.01) },
        );
        acc.record(
            Provider::Anthropic,
            Usage { prompt_tokens: 5, completion_tokens: 5, total_tokens: 10, cost_usd: Some(0.02) },
        );
        assert_eq!(acc.total_tokens(), 40);
        assert!((acc.total_cost_usd() - 0.03).abs() < 1e-9);
    }

    #[test]
    fn token_budget_trips_before_cost_budget() {
        let acc = UsageAccumulator::new();
        acc.record(
            Provider::OpenAi,
            Usage { prompt_tokens: 100, completion_tokens: 50, total_tokens: 150, cost_usd: Some(0.0) },
        );
        let budget = BudgetConfig { max_tokens: Some(100), max_cost_usd: None, early_stop_delta: None };
        assert_eq!(acc.budget_exceeded(&budget), Some("token_budget_exceeded"));
    }

    #[test]
    fn under_budget_is_not_exceeded() {
        let acc = UsageAccumulator::new();
        acc.record(
            Provider::OpenAi,
            Usage { prompt_tokens: 10, completion_tokens: 10, total_tokens: 20, cost_usd: Some(0.0) },
        );
        let budget = BudgetConfig { max_tokens: Some(100), max_cost_usd: None, early_stop_delta: None };
        assert_eq!(acc.budget_exceeded(&budget), None);
    }
}
