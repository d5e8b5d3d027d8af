//! Configuration validation for the debate worker.
//!
//! Checks the things that would otherwise surface as a confusing runtime
//! failure: no provider can actually be called, the database feature is on
//! but there's no URL to connect to, or a numeric tunable is set to
//! something nonsensical.

use super::error::{ConfigResult, ConfigurationError};
use super::AppConfig;

#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    ///
    /// Returns `Ok(())` if valid, or a `ConfigurationError` with all issues.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_providers(config) {
            errors.push(e);
        }
        if let Err(e) = Self::validate_database(config) {
            errors.push(e);
        }
        if let Err(e) = Self::validate_orchestration(config) {
            match e {
                ConfigurationError::Multiple(errs) => errors.extend(errs),
                e => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ConfigurationError::multiple(errors))
        }
    }

    /// At least one provider must carry an API key, or the worker can never
    /// actually dispatch a seat turn.
    fn validate_providers(config: &AppConfig) -> ConfigResult<()> {
        let providers = &config.providers;
        let any_key = providers.openai.api_key.is_some()
            || providers.anthropic.api_key.is_some()
            || providers.groq.api_key.is_some()
            || providers.xai.api_key.is_some()
            || providers.custom.values().any(|p| p.api_key.is_some());

        if any_key {
            Ok(())
        } else {
            Err(ConfigurationError::missing_required(
                "providers.*.api_key",
                "no LLM provider has an API key configured; the worker cannot call any model",
                "OPENAI_API_KEY, ANTHROPIC_API_KEY, GROQ_API_KEY, or XAI_API_KEY",
            ))
        }
    }

    #[cfg(feature = "postgres")]
    fn validate_database(config: &AppConfig) -> ConfigResult<()> {
        if config.database.url.is_some() {
            Ok(())
        } else {
            Err(ConfigurationError::missing_required(
                "database.url",
                "the postgres feature is enabled but no connection URL was provided",
                "POSTGRES_URL",
            ))
        }
    }

    #[cfg(not(feature = "postgres"))]
    fn validate_database(_config: &AppConfig) -> ConfigResult<()> {
        Ok(())
    }

    fn validate_orchestration(config: &AppConfig) -> ConfigResult<()> {
        let o = &config.orchestration;
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&o.circuit_error_threshold) {
            errors.push(ConfigurationError::invalid(
                format!("orchestration.circuit_error_threshold = {}", o.circuit_error_threshold),
                "must be between 0.0 and 1.0",
            ));
        }
        if o.circuit_min_calls == 0 {
            errors.push(ConfigurationError::invalid(
                "orchestration.circuit_min_calls = 0",
                "must be at least 1, or the circuit can open on a single call",
            ));
        }
        if o.reaper_staleness_secs <= 0 {
            errors.push(ConfigurationError::invalid(
                format!("orchestration.reaper_staleness_secs = {}", o.reaper_staleness_secs),
                "must be positive",
            ));
        }
        if o.lease_duration_secs <= 0 {
            errors.push(ConfigurationError::invalid(
                format!("orchestration.lease_duration_secs = {}", o.lease_duration_secs),
                "must be positive",
            ));
        }
        if o.max_runs_per_hour == 0 || o.max_runs_per_day == 0 {
            errors.push(ConfigurationError::invalid(
                "orchestration.max_runs_per_hour or max_runs_per_day = 0",
                "must be at least 1, or no user could ever start a run",
            ));
        }
        if o.heartbeat_interval_secs == 0 || o.heartbeat_interval_secs as i64 >= o.lease_duration_secs {
            errors.push(ConfigurationError::invalid(
                format!("orchestration.heartbeat_interval_secs = {}", o.heartbeat_interval_secs),
                "must be positive and less than lease_duration_secs, or the lease expires between heartbeats",
            ));
        }
        if o.queued_ttl_secs <= 0 {
            errors.push(ConfigurationError::invalid(
                format!("orchestration.queued_ttl_secs = {}", o.queued_ttl_secs),
                "must be positive",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ConfigurationError::multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.openai.api_key = Some("sk-test".into());
        config
    }

    #[test]
    fn rejects_config_with_no_provider_key() {
        let config = AppConfig::default();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn accepts_config_with_one_provider_key() {
        let config = config_with_key();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn rejects_out_of_range_error_threshold() {
        let mut config = config_with_key();
        config.orchestration.circuit_error_threshold = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_lease_duration() {
        let mut config = config_with_key();
        config.orchestration.lease_duration_secs = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_heartbeat_interval_not_shorter_than_lease() {
        let mut config = config_with_key();
        config.orchestration.heartbeat_interval_secs = config.orchestration.lease_duration_secs as u64;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn collects_multiple_errors_together() {
        let mut config = AppConfig::default();
        config.orchestration.circuit_error_threshold = -1.0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.count() >= 2);
    }
}
