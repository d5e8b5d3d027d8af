//! Redis-backed distributed variant of [`super::UsageCounter`].
//!
//! A single-process `UsageCounter` is wrong once more than one worker can
//! serve the same user, since each worker would track its own hour/day
//! windows. This mirrors the counter shape with `INCR`+`EXPIRE` windows
//! keyed by a fixed-width time bucket, the same approach as a plain Redis
//! rate limiter: the bucket key changes when the window rolls, so expiry
//! is implicit rather than tracked per-key.

use chrono::Utc;
use redis::AsyncCommands;
use thiserror::Error;

use super::{RateLimitError, UserQuota};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86_400;

#[derive(Debug, Error)]
pub enum RedisQuotaError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub struct RedisUsageCounter {
    client: redis::Client,
    quota: UserQuota,
}

impl RedisUsageCounter {
    pub fn new(redis_url: &str, quota: UserQuota) -> anyhow::Result<Self> {
        Ok(Self { client: redis::Client::open(redis_url)?, quota })
    }

    fn hour_key(user_id: &str) -> String {
        format!("quota:{user_id}:runs:hour:{}", Utc::now().timestamp() / HOUR_SECS)
    }

    fn day_key(user_id: &str) -> String {
        format!("quota:{user_id}:runs:day:{}", Utc::now().timestamp() / DAY_SECS)
    }

    fn day_tokens_key(user_id: &str) -> String {
        format!("quota:{user_id}:tokens:day:{}", Utc::now().timestamp() / DAY_SECS)
    }

    async fn incr_and_expire(&self, key: &str, ttl_secs: i64) -> Result<i64, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(key, ttl_secs).await?;
        }
        Ok(count)
    }

    /// Reserve a run slot for `user_id`, failing if either window is full.
    /// Both counters are incremented unconditionally first, matching the
    /// in-memory counter's "count the attempt, then reject" ordering so a
    /// user can't retry their way past the limit by racing two requests.
    pub async fn reserve_run_slot(&self, user_id: &str) -> Result<(), RedisQuotaError> {
        let hour_count = self.incr_and_expire(&Self::hour_key(user_id), HOUR_SECS).await?;
        let day_count = self.incr_and_expire(&Self::day_key(user_id), DAY_SECS).await?;

        if hour_count as u32 > self.quota.max_runs_per_hour {
            return Err(RateLimitError::RunQuotaExceeded { used: hour_count as u32, limit: self.quota.max_runs_per_hour, window: "hour" }.into());
        }
        if day_count as u32 > self.quota.max_runs_per_day {
            return Err(RateLimitError::RunQuotaExceeded { used: day_count as u32, limit: self.quota.max_runs_per_day, window: "day" }.into());
        }
        Ok(())
    }

    /// Fold a completed call's token usage into the user's daily total.
    pub async fn record_token_usage(&self, user_id: &str, tokens: u64) -> Result<(), redis::RedisError> {
        let key = Self::day_tokens_key(user_id);
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let total: u64 = conn.incr(&key, tokens).await?;
        if total == tokens {
            let _: () = conn.expire(&key, DAY_SECS).await?;
        }
        Ok(())
    }

    /// Check whether the user has headroom left in today's token budget.
    pub async fn ensure_daily_token_headroom(&self, user_id: &str) -> Result<(), RedisQuotaError> {
        let key = Self::day_tokens_key(user_id);
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let used: Option<u64> = conn.get(&key).await?;
        let used = used.unwrap_or(0);
        if used >= self.quota.max_tokens_per_day {
            return Err(RateLimitError::TokenHeadroomExhausted { used, limit: self.quota.max_tokens_per_day }.into());
        }
        Ok(())
    }
}
