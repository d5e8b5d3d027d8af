//! Redis-backed SSE fan-out for multi-worker deployments.
//!
//! Each debate gets a list key holding its event history (so a late
//! subscriber still sees what already happened) plus a pub/sub channel for
//! live delivery. Transient connection errors are retried with backoff
//! rather than surfaced to the caller.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{DebateEvent, EventEnvelope, SseBackend};

const HISTORY_TTL_SECS: i64 = 3600;
const MAX_RETRIES: u32 = 3;

pub struct RedisEventBackend {
    client: redis::Client,
}

impl RedisEventBackend {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        Ok(Self { client: redis::Client::open(redis_url)? })
    }

    fn history_key(debate_id: Uuid) -> String {
        format!("debate:{debate_id}:events")
    }

    fn channel_key(debate_id: Uuid) -> String {
        format!("debate:{debate_id}:channel")
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < MAX_RETRIES && err.is_connection_dropped() => {
                    tracing::warn!(attempt, error = %err, "redis op failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl SseBackend for RedisEventBackend {
    async fn create_channel(&self, debate_id: Uuid) {
        let _ = debate_id;
    }

    async fn publish(&self, debate_id: Uuid, event: DebateEvent) -> anyhow::Result<()> {
        let envelope = EventEnvelope { debate_id, seq: 0, occurred_at: chrono::Utc::now(), event };
        let payload = serde_json::to_string(&envelope)?;
        let history_key = Self::history_key(debate_id);
        let channel_key = Self::channel_key(debate_id);

        self.with_retry(|| {
            let mut conn = self.client.clone();
            let history_key = history_key.clone();
            let channel_key = channel_key.clone();
            let payload = payload.clone();
            async move {
                let mut conn = conn.get_multiplexed_async_connection().await?;
                let _: () = conn.rpush(&history_key, &payload).await?;
                let _: () = conn.expire(&history_key, HISTORY_TTL_SECS).await?;
                let _: () = conn.publish(&channel_key, &payload).await?;
                Ok(())
            }
        })
        .await
    }

    async fn subscribe(&self, debate_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>> {
        let history_key = Self::history_key(debate_id);
        let raw: Vec<String> = self
            .with_retry(|| {
                let mut conn = self.client.clone();
                let history_key = history_key.clone();
                async move {
                    let mut conn = conn.get_multiplexed_async_connection().await?;
                    conn.lrange(&history_key, 0, -1).await
                }
            })
            .await?;

        Ok(raw.into_iter().filter_map(|s| serde_json::from_str(&s).ok()).collect())
    }

    async fn cleanup(&self, debate_id: Uuid) {
        let history_key = Self::history_key(debate_id);
        if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
            let _: redis::RedisResult<()> = conn.del(&history_key).await;
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
