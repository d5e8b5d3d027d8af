//! Durable storage abstraction for debates.
//!
//! One canonical [`crate::domain::Debate`] struct is both the pipeline's
//! in-memory state and the persisted row; there is no separate repository
//! struct duplicating its fields.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Debate, DebateCheckpoint, DebateError, Message, Round, Score, Vote};
use crate::ratings::PersonaRating;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Repository trait over everything a worker needs to run and resume
/// debates durably.
#[async_trait]
pub trait DebateStore: Send + Sync {
    async fn create_debate(&self, debate: &Debate) -> anyhow::Result<()>;
    async fn get_debate(&self, id: Uuid) -> anyhow::Result<Option<Debate>>;
    async fn update_debate(&self, debate: &Debate) -> anyhow::Result<()>;

    /// Atomically acquire or renew the worker lease on a debate.
    ///
    /// Succeeds when the debate is unleased, its lease has expired, or it is
    /// already leased to `runner_id`. Returns `false` if another runner
    /// holds a live lease.
    async fn acquire_lease(&self, id: Uuid, runner_id: &str, lease_duration_secs: i64) -> anyhow::Result<bool>;

    /// Extend an already-held lease; fails if the lease was lost.
    async fn heartbeat_lease(&self, id: Uuid, runner_id: &str, lease_duration_secs: i64) -> anyhow::Result<bool>;

    async fn release_lease(&self, id: Uuid, runner_id: &str) -> anyhow::Result<()>;

    /// Non-terminal debates whose lease was acquired but has since expired
    /// and gone untouched past the reaper's staleness window — i.e. a
    /// worker claimed them and then died.
    async fn find_stale_debates(&self, stale_after_secs: i64) -> anyhow::Result<Vec<Debate>>;

    /// Debates still waiting for a worker to claim them, oldest first.
    async fn find_queued_debates(&self, limit: i64) -> anyhow::Result<Vec<Debate>>;

    /// Queued debates nobody ever claimed within `queued_ttl_secs`.
    async fn find_stale_queued_debates(&self, queued_ttl_secs: i64) -> anyhow::Result<Vec<Debate>>;

    async fn append_round(&self, round: &Round) -> anyhow::Result<()>;
    async fn append_message(&self, message: &Message) -> anyhow::Result<()>;
    async fn append_score(&self, score: &Score) -> anyhow::Result<()>;
    async fn append_vote(&self, vote: &Vote) -> anyhow::Result<()>;

    async fn get_messages(&self, debate_id: Uuid) -> anyhow::Result<Vec<Message>>;
    async fn get_scores(&self, debate_id: Uuid) -> anyhow::Result<Vec<Score>>;
    async fn get_votes(&self, debate_id: Uuid) -> anyhow::Result<Vec<Vote>>;

    async fn save_checkpoint(&self, checkpoint: &DebateCheckpoint) -> anyhow::Result<()>;
    async fn get_checkpoint(&self, debate_id: Uuid) -> anyhow::Result<Option<DebateCheckpoint>>;

    async fn record_error(&self, error: &DebateError) -> anyhow::Result<()>;

    /// Fetch the current Elo rating for each persona, defaulting personas
    /// with no prior games to [`PersonaRating::default`].
    async fn get_ratings(&self, personas: &[String]) -> anyhow::Result<HashMap<String, PersonaRating>>;

    /// Persist an updated ratings table after a debate's judge scores have
    /// been folded into pairwise outcomes.
    async fn save_ratings(&self, ratings: &HashMap<String, PersonaRating>) -> anyhow::Result<()>;
}
