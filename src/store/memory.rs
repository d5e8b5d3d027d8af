//! In-memory [`super::DebateStore`] test double.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::DebateStore;
use crate::domain::{Debate, DebateCheckpoint, DebateError, DebateStatus, Message, Round, Score, Vote};
use crate::ratings::PersonaRating;

#[derive(Debug, Default)]
struct State {
    debates: HashMap<Uuid, Debate>,
    rounds: Vec<Round>,
    messages: Vec<Message>,
    scores: Vec<Score>,
    votes: Vec<Vote>,
    checkpoints: HashMap<Uuid, DebateCheckpoint>,
    errors: Vec<DebateError>,
    ratings: HashMap<String, PersonaRating>,
}

/// Single-process store backed by a mutex-guarded map. Used by integration
/// tests and the `replay` CLI subcommand in place of a real database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DebateStore for InMemoryStore {
    async fn create_debate(&self, debate: &Debate) -> anyhow::Result<()> {
        self.state.lock().debates.insert(debate.id, debate.clone());
        Ok(())
    }

    async fn get_debate(&self, id: Uuid) -> anyhow::Result<Option<Debate>> {
        Ok(self.state.lock().debates.get(&id).cloned())
    }

    async fn update_debate(&self, debate: &Debate) -> anyhow::Result<()> {
        self.state.lock().debates.insert(debate.id, debate.clone());
        Ok(())
    }

    async fn acquire_lease(&self, id: Uuid, runner_id: &str, lease_duration_secs: i64) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let Some(debate) = state.debates.get_mut(&id) else {
            return Ok(false);
        };
        let lease_expired = match debate.lease_expires_at {
            Some(exp) => exp < now,
            None => true,
        };
        let acquirable = debate.runner_id.is_none() || lease_expired || debate.runner_id.as_deref() == Some(runner_id);
        if !acquirable {
            return Ok(false);
        }
        debate.runner_id = Some(runner_id.to_string());
        debate.lease_expires_at = Some(now + Duration::seconds(lease_duration_secs));
        debate.status = DebateStatus::Running;
        debate.updated_at = now;
        Ok(true)
    }

    async fn heartbeat_lease(&self, id: Uuid, runner_id: &str, lease_duration_secs: i64) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let Some(debate) = state.debates.get_mut(&id) else {
            return Ok(false);
        };
        if debate.runner_id.as_deref() != Some(runner_id) {
            return Ok(false);
        }
        debate.lease_expires_at = Some(now + Duration::seconds(lease_duration_secs));
        debate.updated_at = now;
        Ok(true)
    }

    async fn release_lease(&self, id: Uuid, runner_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if let Some(debate) = state.debates.get_mut(&id) {
            if debate.runner_id.as_deref() == Some(runner_id) {
                debate.runner_id = None;
                debate.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn find_stale_debates(&self, stale_after_secs: i64) -> anyhow::Result<Vec<Debate>> {
        let state = self.state.lock();
        let now = Utc::now();
        Ok(state
            .debates
            .values()
            .filter(|d| {
                !d.status.is_terminal()
                    && d.runner_id.is_some()
                    && d.lease_expires_at.is_some_and(|exp| exp < now)
                    && (now - d.updated_at) > Duration::seconds(stale_after_secs)
            })
            .cloned()
            .collect())
    }

    async fn find_queued_debates(&self, limit: i64) -> anyhow::Result<Vec<Debate>> {
        let state = self.state.lock();
        let mut queued: Vec<Debate> = state.debates.values().filter(|d| d.status == DebateStatus::Queued).cloned().collect();
        queued.sort_by_key(|d| d.created_at);
        queued.truncate(limit.max(0) as usize);
        Ok(queued)
    }

    async fn find_stale_queued_debates(&self, queued_ttl_secs: i64) -> anyhow::Result<Vec<Debate>> {
        let state = self.state.lock();
        let now = Utc::now();
        Ok(state
            .debates
            .values()
            .filter(|d| d.status == DebateStatus::Queued && (now - d.created_at) > Duration::seconds(queued_ttl_secs))
            .cloned()
            .collect())
    }

    async fn append_round(&self, round: &Round) -> anyhow::Result<()> {
        self.state.lock().rounds.push(round.clone());
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> anyhow::Result<()> {
        self.state.lock().messages.push(message.clone());
        Ok(())
    }

    async fn append_score(&self, score: &Score) -> anyhow::Result<()> {
        self.state.lock().scores.push(score.clone());
        Ok(())
    }

    async fn append_vote(&self, vote: &Vote) -> anyhow::Result<()> {
        self.state.lock().votes.push(vote.clone());
        Ok(())
    }

    async fn get_messages(&self, debate_id: Uuid) -> anyhow::Result<Vec<Message>> {
        Ok(self.state.lock().messages.iter().filter(|m| m.debate_id == debate_id).cloned().collect())
    }

    async fn get_scores(&self, debate_id: Uuid) -> anyhow::Result<Vec<Score>> {
        Ok(self.state.lock().scores.iter().filter(|s| s.debate_id == debate_id).cloned().collect())
    }

    async fn get_votes(&self, debate_id: Uuid) -> anyhow::Result<Vec<Vote>> {
        Ok(self.state.lock().votes.iter().filter(|v| v.debate_id == debate_id).cloned().collect())
    }

    async fn save_checkpoint(&self, checkpoint: &DebateCheckpoint) -> anyhow::Result<()> {
        self.state.lock().checkpoints.insert(checkpoint.debate_id, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(&self, debate_id: Uuid) -> anyhow::Result<Option<DebateCheckpoint>> {
        Ok(self.state.lock().checkpoints.get(&debate_id).cloned())
    }

    async fn record_error(&self, error: &DebateError) -> anyhow::Result<()> {
        self.state.lock().errors.push(error.clone());
        Ok(())
    }

    async fn get_ratings(&self, personas: &[String]) -> anyhow::Result<HashMap<String, PersonaRating>> {
        let state = self.state.lock();
        Ok(personas.iter().map(|p| (p.clone(), state.ratings.get(p).copied().unwrap_or_default())).collect())
    }

    async fn save_ratings(&self, ratings: &HashMap<String, PersonaRating>) -> anyhow::Result<()> {
        self.state.lock().ratings.extend(ratings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DebateMode, PanelConfig, PanelTolerance};

    fn debate() -> Debate {
        Debate::new("Should we adopt AI?", DebateMode::Debate, PanelConfig { seats: vec![], tolerance: PanelTolerance::default(), judges: vec![] })
    }

    #[tokio::test]
    async fn second_runner_cannot_steal_a_live_lease() {
        let store = InMemoryStore::new();
        let d = debate();
        store.create_debate(&d).await.unwrap();
        assert!(store.acquire_lease(d.id, "worker-a", 60).await.unwrap());
        assert!(!store.acquire_lease(d.id, "worker-b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let store = InMemoryStore::new();
        let d = debate();
        store.create_debate(&d).await.unwrap();
        assert!(store.acquire_lease(d.id, "worker-a", -1).await.unwrap());
        assert!(store.acquire_lease(d.id, "worker-b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn heartbeat_fails_once_lease_is_lost() {
        let store = InMemoryStore::new();
        let d = debate();
        store.create_debate(&d).await.unwrap();
        store.acquire_lease(d.id, "worker-a", -1).await.unwrap();
        store.acquire_lease(d.id, "worker-b", 60).await.unwrap();
        assert!(!store.heartbeat_lease(d.id, "worker-a", 60).await.unwrap());
    }
}
