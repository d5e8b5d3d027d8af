//! Configuration management for the debate worker.
//!
//! Configuration loads from environment variables and optional config
//! files, with validation split out into [`ConfigValidator`].
//!
//! ```rust,ignore
//! let config = AppConfig::load()?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration (used when the `postgres` feature is enabled).
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Redis configuration (used for the distributed SSE backend).
    #[serde(default)]
    pub redis: RedisConfig,
    /// LLM provider configurations.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Default LLM settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Orchestration tunables (circuit breaker, router, reaper, quota).
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            providers: ProvidersConfig::default(),
            llm: LlmConfig::default(),
            orchestration: OrchestrationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and config files, then validate it.
    ///
    /// Sources, in order: defaults, `config/debate-worker.yaml`, environment
    /// variables. Use [`Self::load_unchecked`] to skip validation.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{}", e))?;

        Ok(config)
    }

    /// Load configuration without validation.
    ///
    /// Useful for tests or callers that want to validate separately.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("llm.model", "gpt-4o")?
            .set_default("llm.max_tokens", 4096)?
            .set_default("llm.temperature", 0.7)?
            .add_source(config::File::with_name("config/debate-worker").required(false))
            .add_source(
                config::Environment::with_prefix("DEBATE_WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            app_config.providers.openai.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            app_config.providers.anthropic.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            app_config.providers.groq.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("XAI_API_KEY") {
            app_config.providers.xai.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("POSTGRES_URL") {
            app_config.database.url = Some(url);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            app_config.redis.url = Some(url);
        }

        Ok(app_config)
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: Option<String>,
    /// Maximum connection pool size.
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
    /// Minimum connection pool size.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_pool_size() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_pool_size(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: Option<String>,
    /// Connection pool size.
    #[serde(default = "default_redis_pool")]
    pub pool_size: u32,
}

fn default_redis_pool() -> u32 {
    10
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: None, pool_size: default_redis_pool() }
    }
}

/// LLM provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// OpenAI configuration.
    #[serde(default)]
    pub openai: ProviderConfig,
    /// Anthropic configuration.
    #[serde(default)]
    pub anthropic: ProviderConfig,
    /// Groq configuration.
    #[serde(default)]
    pub groq: ProviderConfig,
    /// xAI configuration.
    #[serde(default)]
    pub xai: ProviderConfig,
    /// Custom providers, keyed by name.
    #[serde(default)]
    pub custom: HashMap<String, ProviderConfig>,
}

/// Individual provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Organization ID (OpenAI-specific).
    pub organization: Option<String>,
    /// Default model for this provider.
    pub default_model: Option<String>,
    /// Whether this provider is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Default LLM call settings, used when a seat doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Default model to use when a seat doesn't pin one.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens to generate per seat turn.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for sampling.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { model: default_model(), max_tokens: default_max_tokens(), temperature: default_temperature() }
    }
}

/// Tunables for the circuit breaker, router, reaper, and quota systems.
///
/// These are worker-internal knobs rather than externally-facing surface,
/// so they stay in one struct instead of one per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Minimum calls before a provider's circuit can open.
    #[serde(default = "default_circuit_min_calls")]
    pub circuit_min_calls: u32,
    /// Error rate (0.0-1.0) above which a circuit opens.
    #[serde(default = "default_circuit_error_threshold")]
    pub circuit_error_threshold: f64,
    /// Cooldown in seconds before an open circuit can be retried.
    #[serde(default = "default_circuit_cooldown")]
    pub circuit_cooldown_secs: u64,
    /// How often the stale-run reaper sweeps for expired leases, in seconds.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
    /// How long a debate's lease may sit expired before it's reaped.
    #[serde(default = "default_reaper_staleness")]
    pub reaper_staleness_secs: i64,
    /// Debate lease duration, in seconds.
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: i64,
    /// How often a running debate's lease is renewed, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// How long a debate may sit `queued` before the reaper fails it outright.
    #[serde(default = "default_queued_ttl")]
    pub queued_ttl_secs: i64,
    /// Maximum run slots a user may reserve per rolling hour.
    #[serde(default = "default_max_runs_per_hour")]
    pub max_runs_per_hour: u32,
    /// Maximum run slots a user may reserve per rolling day.
    #[serde(default = "default_max_runs_per_day")]
    pub max_runs_per_day: u32,
    /// Maximum tokens a user may consume per rolling day.
    #[serde(default = "default_max_tokens_per_day")]
    pub max_tokens_per_day: u64,
}

fn default_circuit_min_calls() -> u32 {
    10
}

fn default_circuit_error_threshold() -> f64 {
    0.5
}

fn default_circuit_cooldown() -> u64 {
    60
}

fn default_reaper_interval() -> u64 {
    30
}

fn default_reaper_staleness() -> i64 {
    120
}

fn default_lease_duration() -> i64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    20
}

fn default_queued_ttl() -> i64 {
    3600
}

fn default_max_runs_per_hour() -> u32 {
    20
}

fn default_max_runs_per_day() -> u32 {
    100
}

fn default_max_tokens_per_day() -> u64 {
    2_000_000
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            circuit_min_calls: default_circuit_min_calls(),
            circuit_error_threshold: default_circuit_error_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown(),
            reaper_interval_secs: default_reaper_interval(),
            reaper_staleness_secs: default_reaper_staleness(),
            lease_duration_secs: default_lease_duration(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            queued_ttl_secs: default_queued_ttl(),
            max_runs_per_hour: default_max_runs_per_hour(),
            max_runs_per_day: default_max_runs_per_day(),
            max_tokens_per_day: default_max_tokens_per_day(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to emit JSON-formatted logs.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_llm_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 2048);
    }

    #[test]
    fn default_orchestration_matches_documented_constants() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.circuit_min_calls, 10);
        assert!((config.circuit_error_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.max_runs_per_day, 100);
    }
}
