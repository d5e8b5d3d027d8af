//! SSE fan-out: event schema plus a pluggable channel backend.

pub mod memory;
pub mod redis_backend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryEventBackend;
pub use redis_backend::RedisEventBackend;

/// One event in a debate's SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    RoundStarted { round_index: i32, label: String },
    RoundEnded { round_index: i32, label: String },
    Message { round_index: i32, persona: String, content: String },
    SeatMessage { round_index: i32, seat_id: String, content: String },
    Score { persona: String, judge: String, score: f64 },
    Notice { message: String },
    Final { content: String },
    Error { message: String },
    DebateFailed { reason: String },
}

impl DebateEvent {
    /// Whether delivery of this event means the stream has nothing further
    /// to send and a subscriber may stop polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. } | Self::DebateFailed { .. })
    }
}

/// A timestamped, sequenced event envelope as it travels the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub debate_id: Uuid,
    pub seq: u64,
    pub occurred_at: DateTime<Utc>,
    pub event: DebateEvent,
}

/// Backend abstraction for publishing and subscribing to a debate's event
/// channel. `InMemoryEventBackend` serves single-process deployments;
/// `RedisEventBackend` fans events out across worker processes.
#[async_trait]
pub trait SseBackend: Send + Sync {
    async fn create_channel(&self, debate_id: Uuid);
    async fn publish(&self, debate_id: Uuid, event: DebateEvent) -> anyhow::Result<()>;
    async fn subscribe(&self, debate_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>>;
    async fn cleanup(&self, debate_id: Uuid);
    async fn ping(&self) -> anyhow::Result<()>;
}
