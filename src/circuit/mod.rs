//! Provider-health circuit breaker.
//!
//! Tracks a rolling error rate per `(provider, model)` pair and opens the
//! circuit when the rate crosses a threshold over a minimum call volume,
//! rather than on a fixed count of consecutive failures.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::llm::Provider;

/// Tuning knobs for the breaker, shared across all `(provider, model)` keys.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSettings {
    /// Minimum calls observed in the window before `should_open` can trip.
    pub min_calls: u32,
    /// Error rate (0.0-1.0) at or above which the breaker opens.
    pub error_threshold: f64,
    /// How long an opened circuit stays open before re-admitting calls.
    pub cooldown_seconds: u64,
    /// Width of the rolling call window.
    pub window_calls: u32,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self { min_calls: 10, error_threshold: 0.5, cooldown_seconds: 60, window_calls: 50 }
    }
}

#[derive(Debug, Clone)]
struct ProviderHealthState {
    total_calls: u32,
    error_calls: u32,
    opened_at: Option<Instant>,
}

impl ProviderHealthState {
    fn new() -> Self {
        Self { total_calls: 0, error_calls: 0, opened_at: None }
    }

    fn error_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            f64::from(self.error_calls) / f64::from(self.total_calls)
        }
    }

    fn should_open(&self, settings: &CircuitSettings) -> bool {
        self.total_calls >= settings.min_calls && self.error_rate() >= settings.error_threshold
    }

    fn is_open(&self, settings: &CircuitSettings) -> bool {
        match self.opened_at {
            Some(opened_at) => opened_at.elapsed() < Duration::from_secs(settings.cooldown_seconds),
            None => false,
        }
    }

    fn reset_window(&mut self, settings: &CircuitSettings) {
        if self.total_calls >= settings.window_calls {
            self.total_calls = 0;
            self.error_calls = 0;
        }
    }
}

/// Process-scoped registry of per-`(provider, model)` health states.
#[derive(Debug)]
pub struct CircuitRegistry {
    settings: CircuitSettings,
    states: Mutex<HashMap<(Provider, String), ProviderHealthState>>,
}

impl CircuitRegistry {
    pub fn new(settings: CircuitSettings) -> Self {
        Self { settings, states: Mutex::new(HashMap::new()) }
    }

    /// True if calls to this `(provider, model)` should currently be skipped.
    pub fn is_open(&self, provider: Provider, model: &str) -> bool {
        let states = self.states.lock();
        states
            .get(&(provider, model.to_string()))
            .is_some_and(|s| s.is_open(&self.settings))
    }

    pub fn record_success(&self, provider: Provider, model: &str) {
        let mut states = self.states.lock();
        let state = states.entry((provider, model.to_string())).or_insert_with(ProviderHealthState::new);
        state.reset_window(&self.settings);
        state.total_calls += 1;
        if state.opened_at.is_some() && !state.should_open(&self.settings) {
            state.opened_at = None;
        }
    }

    pub fn record_error(&self, provider: Provider, model: &str) {
        let mut states = self.states.lock();
        let state = states.entry((provider, model.to_string())).or_insert_with(ProviderHealthState::new);
        state.reset_window(&self.settings);
        state.total_calls += 1;
        state.error_calls += 1;
        if state.opened_at.is_none() && state.should_open(&self.settings) {
            state.opened_at = Some(Instant::now());
        }
    }

    /// Record a call's outcome in one shot; mirrors how the pipeline calls this
    /// after each seat/judge LLM call returns.
    pub fn record_call_result(&self, provider: Provider, model: &str, succeeded: bool) {
        if succeeded {
            self.record_success(provider, model);
        } else {
            self.record_error(provider, model);
        }
    }

    #[cfg(test)]
    fn reset(&self, provider: Provider, model: &str) {
        self.states.lock().remove(&(provider, model.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> CircuitSettings {
        CircuitSettings { min_calls: 4, error_threshold: 0.5, cooldown_seconds: 60, window_calls: 100 }
    }

    #[test]
    fn closed_below_min_calls() {
        let registry = CircuitRegistry::new(fast_settings());
        registry.record_error(Provider::OpenAi, "gpt-4o");
        registry.record_error(Provider::OpenAi, "gpt-4o");
        assert!(!registry.is_open(Provider::OpenAi, "gpt-4o"));
    }

    #[test]
    fn opens_once_error_rate_crosses_threshold() {
        let registry = CircuitRegistry::new(fast_settings());
        registry.record_error(Provider::OpenAi, "gpt-4o");
        registry.record_error(Provider::OpenAi, "gpt-4o");
        registry.record_success(Provider::OpenAi, "gpt-4o");
        registry.record_error(Provider::OpenAi, "gpt-4o");
        assert!(registry.is_open(Provider::OpenAi, "gpt-4o"));
    }

    #[test]
    fn stays_closed_when_error_rate_below_threshold() {
        let registry = CircuitRegistry::new(fast_settings());
        registry.record_success(Provider::OpenAi, "gpt-4o");
        registry.record_success(Provider::OpenAi, "gpt-4o");
        registry.record_success(Provider::OpenAi, "gpt-4o");
        registry.record_error(Provider::OpenAi, "gpt-4o");
        assert!(!registry.is_open(Provider::OpenAi, "gpt-4o"));
    }

    #[test]
    fn providers_are_tracked_independently() {
        let registry = CircuitRegistry::new(fast_settings());
        for _ in 0..4 {
            registry.record_error(Provider::OpenAi, "gpt-4o");
        }
        assert!(registry.is_open(Provider::OpenAi, "gpt-4o"));
        assert!(!registry.is_open(Provider::Anthropic, "gpt-4o"));
        registry.reset(Provider::OpenAi, "gpt-4o");
    }
}
