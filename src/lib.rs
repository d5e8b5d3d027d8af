//! Multi-agent LLM debate orchestrator.
//!
//! A debate runs a panel of seats (personas bound to a provider/model)
//! through a mode-specific pipeline (debate, parliament, or open
//! conversation), ranks their answers, and synthesizes a final one. The
//! crate is organized into:
//!
//! - [`domain`]: core types — debates, seats, rounds, messages, scores.
//! - [`llm`]: provider-agnostic LLM call abstraction and adapters.
//! - [`seat`]: per-seat request building, envelope parsing, retry.
//! - [`router`]: weighted multi-criterion model selection.
//! - [`circuit`]: provider-health circuit breaker.
//! - [`pipeline`]: the stage dispatcher and per-mode stage implementations.
//! - [`ranking`]: Borda+Condorcet ranking fusion.
//! - [`ratings`]: Elo rating updates from judge scores.
//! - [`store`]: durable persistence (Postgres) and an in-memory test double.
//! - [`events`]: SSE event schema and fan-out backends.
//! - [`quota`]: per-user run/token quotas and per-IP rate limiting.
//! - [`reaper`]: stale-run detection and requeue/failure sweep.
//! - [`config`]: configuration loading and validation.
//! - [`logging`]: structured startup/operation logging helpers.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod circuit;
pub mod config;
pub mod domain;
pub mod events;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod quota;
pub mod ranking;
pub mod ratings;
pub mod reaper;
pub mod router;
pub mod seat;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use config::AppConfig;
use circuit::{CircuitRegistry, CircuitSettings};
use events::SseBackend;
use llm::LlmClient;
use quota::UsageCounter;
use seat::RetryPolicy;
use store::DebateStore;

/// Everything a worker process needs to accept, run, and resume debates.
///
/// Constructed once at startup and shared (via `Arc`) across the lease loop,
/// the reaper, and every in-flight debate's [`pipeline::DebateContext`].
#[derive(Clone)]
pub struct Worker {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DebateStore>,
    pub events: Arc<dyn SseBackend>,
    pub circuits: Arc<CircuitRegistry>,
    pub usage_counter: Arc<UsageCounter>,
    pub clients: HashMap<String, Arc<dyn LlmClient>>,
    pub retry_policy: RetryPolicy,
    pub runner_id: String,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("runner_id", &self.runner_id)
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Worker {
    /// Build a worker from loaded configuration and the concrete store/event
    /// backends the caller has already constructed (Postgres/Redis in
    /// production, in-memory doubles in tests).
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DebateStore>,
        events: Arc<dyn SseBackend>,
        runner_id: impl Into<String>,
    ) -> Self {
        let circuits = Arc::new(CircuitRegistry::new(CircuitSettings {
            min_calls: config.orchestration.circuit_min_calls,
            error_threshold: config.orchestration.circuit_error_threshold,
            cooldown_seconds: config.orchestration.circuit_cooldown_secs,
            ..CircuitSettings::default()
        }));
        let usage_counter = Arc::new(UsageCounter::new(quota::UserQuota {
            max_runs_per_hour: config.orchestration.max_runs_per_hour,
            max_runs_per_day: config.orchestration.max_runs_per_day,
            max_tokens_per_day: config.orchestration.max_tokens_per_day,
        }));
        let clients = build_clients(&config);

        Self { config: Arc::new(config), store, events, circuits, usage_counter, clients, retry_policy: RetryPolicy::default(), runner_id: runner_id.into() }
    }
}

/// Construct one [`LlmClient`] per enabled, keyed provider.
fn build_clients(config: &AppConfig) -> HashMap<String, Arc<dyn LlmClient>> {
    use llm::{providers::create_client, LlmSettings, Provider};

    let mut clients: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
    let entries = [
        ("openai", Provider::OpenAi, &config.providers.openai),
        ("anthropic", Provider::Anthropic, &config.providers.anthropic),
        ("groq", Provider::Groq, &config.providers.groq),
        ("xai", Provider::Xai, &config.providers.xai),
    ];
    for (key, provider, provider_config) in entries {
        if !provider_config.enabled || provider_config.api_key.is_none() {
            continue;
        }
        let settings = LlmSettings {
            base_url: provider_config.base_url.clone().unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key: provider_config.api_key.clone(),
            model: provider_config.default_model.clone().unwrap_or_else(|| config.llm.model.clone()),
            provider,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        };
        clients.insert(key.to_string(), create_client(settings));
    }
    for (name, provider_config) in &config.providers.custom {
        if !provider_config.enabled || provider_config.api_key.is_none() {
            continue;
        }
        let settings = LlmSettings {
            base_url: provider_config.base_url.clone().unwrap_or_default(),
            api_key: provider_config.api_key.clone(),
            model: provider_config.default_model.clone().unwrap_or_else(|| config.llm.model.clone()),
            provider: llm::Provider::Custom,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        };
        clients.insert(name.clone(), create_client(settings));
    }
    clients
}
