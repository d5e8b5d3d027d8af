//! Quota and rate limiting: per-user run/token windows plus an IP bucket.

pub mod ip_bucket;
pub mod redis_counter;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

pub use ip_bucket::IpRateLimiter;
pub use redis_counter::{RedisQuotaError, RedisUsageCounter};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("run quota exceeded: {used}/{limit} runs this {window}")]
    RunQuotaExceeded { used: u32, limit: u32, window: &'static str },
    #[error("daily token headroom exhausted: {used}/{limit} tokens today")]
    TokenHeadroomExhausted { used: u64, limit: u64 },
}

/// Per-user limits.
#[derive(Debug, Clone, Copy)]
pub struct UserQuota {
    pub max_runs_per_hour: u32,
    pub max_runs_per_day: u32,
    pub max_tokens_per_day: u64,
}

impl Default for UserQuota {
    fn default() -> Self {
        Self { max_runs_per_hour: 20, max_runs_per_day: 100, max_tokens_per_day: 2_000_000 }
    }
}

#[derive(Debug, Default)]
struct UserWindow {
    hour_start: Option<Instant>,
    hour_count: u32,
    day_start: Option<Instant>,
    day_count: u32,
    day_tokens: u64,
}

impl UserWindow {
    fn roll(&mut self, now: Instant) {
        let hour_expired = match self.hour_start {
            Some(start) => now.duration_since(start) >= Duration::from_secs(3600),
            None => true,
        };
        if hour_expired {
            self.hour_start = Some(now);
            self.hour_count = 0;
        }
        let day_expired = match self.day_start {
            Some(start) => now.duration_since(start) >= Duration::from_secs(86_400),
            None => true,
        };
        if day_expired {
            self.day_start = Some(now);
            self.day_count = 0;
            self.day_tokens = 0;
        }
    }
}

/// Tracks per-user run and token consumption across rolling hour/day
/// windows. One instance is shared across all debates a worker serves.
#[derive(Debug, Default)]
pub struct UsageCounter {
    quota: UserQuota,
    windows: Mutex<HashMap<String, UserWindow>>,
}

impl UsageCounter {
    pub fn new(quota: UserQuota) -> Self {
        Self { quota, windows: Mutex::new(HashMap::new()) }
    }

    /// Reserve a run slot for `user_id`, failing if either window is full.
    /// Reservation happens before routing so a denied request never reaches
    /// a provider.
    pub fn reserve_run_slot(&self, user_id: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(user_id.to_string()).or_default();
        window.roll(now);

        if window.hour_count >= self.quota.max_runs_per_hour {
            return Err(RateLimitError::RunQuotaExceeded { used: window.hour_count, limit: self.quota.max_runs_per_hour, window: "hour" });
        }
        if window.day_count >= self.quota.max_runs_per_day {
            return Err(RateLimitError::RunQuotaExceeded { used: window.day_count, limit: self.quota.max_runs_per_day, window: "day" });
        }

        window.hour_count += 1;
        window.day_count += 1;
        Ok(())
    }

    /// Fold a completed call's token usage into the user's daily total.
    pub fn record_token_usage(&self, user_id: &str, tokens: u64) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(user_id.to_string()).or_default();
        window.roll(now);
        window.day_tokens += tokens;
    }

    /// Check whether the user has headroom left in today's token budget
    /// before starting another seat call.
    pub fn ensure_daily_token_headroom(&self, user_id: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(user_id.to_string()).or_default();
        window.roll(now);

        if window.day_tokens >= self.quota.max_tokens_per_day {
            return Err(RateLimitError::TokenHeadroomExhausted { used: window.day_tokens, limit: self.quota.max_tokens_per_day });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_up_to_hourly_limit_then_denies() {
        let counter = UsageCounter::new(UserQuota { max_runs_per_hour: 2, max_runs_per_day: 100, max_tokens_per_day: 1_000_000 });
        assert!(counter.reserve_run_slot("alice").is_ok());
        assert!(counter.reserve_run_slot("alice").is_ok());
        assert!(matches!(counter.reserve_run_slot("alice"), Err(RateLimitError::RunQuotaExceeded { window: "hour", .. })));
    }

    #[test]
    fn users_are_tracked_independently() {
        let counter = UsageCounter::new(UserQuota { max_runs_per_hour: 1, max_runs_per_day: 100, max_tokens_per_day: 1_000_000 });
        assert!(counter.reserve_run_slot("alice").is_ok());
        assert!(counter.reserve_run_slot("bob").is_ok());
    }

    #[test]
    fn token_headroom_trips_once_daily_budget_is_spent() {
        let counter = UsageCounter::new(UserQuota { max_runs_per_hour: 100, max_runs_per_day: 100, max_tokens_per_day: 1000 });
        counter.record_token_usage("alice", 1000);
        assert!(matches!(counter.ensure_daily_token_headroom("alice"), Err(RateLimitError::TokenHeadroomExhausted { .. })));
    }
}
