//! PostgreSQL-backed [`super::DebateStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::DebateStore;
use crate::domain::{Debate, DebateCheckpoint, DebateError, DebateStatus, Message, Round, Score, Vote};
use crate::ratings::PersonaRating;

/// Genuine `sqlx::PgPool`-backed store. The `debates` table is the single
/// source of truth for both pipeline progress and lease ownership; there is
/// no separate `runs` table duplicating the same fields.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DebateStore for PgStore {
    async fn create_debate(&self, debate: &Debate) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debates (id, prompt, status, mode, panel_config, budget, routed_model, \
             routing_policy, routing_meta, owner_user_id, team_id, run_attempt, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(debate.id)
        .bind(&debate.prompt)
        .bind(debate.status.to_string())
        .bind(serde_json::to_value(debate.mode)?)
        .bind(serde_json::to_value(&debate.panel_config)?)
        .bind(serde_json::to_value(debate.budget)?)
        .bind(&debate.routed_model)
        .bind(&debate.routing_policy)
        .bind(serde_json::to_value(&debate.routing_meta)?)
        .bind(&debate.owner_user_id)
        .bind(&debate.team_id)
        .bind(debate.run_attempt)
        .bind(debate.created_at)
        .bind(debate.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_debate(&self, id: Uuid) -> anyhow::Result<Option<Debate>> {
        let row: Option<DebateRow> = sqlx::query_as("SELECT * FROM debates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_debate(&self, debate: &Debate) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE debates SET status = $2, routed_model = $3, routing_policy = $4, routing_meta = $5, \
             final_content = $6, final_meta = $7, run_attempt = $8, updated_at = now() WHERE id = $1",
        )
        .bind(debate.id)
        .bind(debate.status.to_string())
        .bind(&debate.routed_model)
        .bind(&debate.routing_policy)
        .bind(serde_json::to_value(&debate.routing_meta)?)
        .bind(&debate.final_content)
        .bind(serde_json::to_value(&debate.final_meta)?)
        .bind(debate.run_attempt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic lease acquisition: a debate is takeable when nobody holds it,
    /// the holder's lease has expired, or the caller already holds it. The
    /// `WHERE` clause and the write happen in one statement so two workers
    /// racing for the same debate cannot both succeed.
    async fn acquire_lease(&self, id: Uuid, runner_id: &str, lease_duration_secs: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE debates SET runner_id = $2, lease_expires_at = now() + make_interval(secs => $3), \
             status = 'running', updated_at = now() \
             WHERE id = $1 AND (runner_id IS NULL OR lease_expires_at < now() OR runner_id = $2)",
        )
        .bind(id)
        .bind(runner_id)
        .bind(lease_duration_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn heartbeat_lease(&self, id: Uuid, runner_id: &str, lease_duration_secs: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE debates SET lease_expires_at = now() + make_interval(secs => $3), updated_at = now() \
             WHERE id = $1 AND runner_id = $2",
        )
        .bind(id)
        .bind(runner_id)
        .bind(lease_duration_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, id: Uuid, runner_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE debates SET runner_id = NULL, lease_expires_at = NULL WHERE id = $1 AND runner_id = $2")
            .bind(id)
            .bind(runner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_stale_debates(&self, stale_after_secs: i64) -> anyhow::Result<Vec<Debate>> {
        let rows: Vec<DebateRow> = sqlx::query_as(
            "SELECT * FROM debates WHERE status NOT IN ('completed', 'degraded', 'failed') \
             AND runner_id IS NOT NULL AND lease_expires_at < now() \
             AND updated_at < now() - make_interval(secs => $1)",
        )
        .bind(stale_after_secs as f64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_queued_debates(&self, limit: i64) -> anyhow::Result<Vec<Debate>> {
        let rows: Vec<DebateRow> =
            sqlx::query_as("SELECT * FROM debates WHERE status = 'queued' ORDER BY created_at ASC LIMIT $1")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_stale_queued_debates(&self, queued_ttl_secs: i64) -> anyhow::Result<Vec<Debate>> {
        let rows: Vec<DebateRow> = sqlx::query_as(
            "SELECT * FROM debates WHERE status = 'queued' AND created_at < now() - make_interval(secs => $1)",
        )
        .bind(queued_ttl_secs as f64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn append_round(&self, round: &Round) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debate_round (debate_id, index, label, started_at, ended_at, note) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(round.debate_id)
        .bind(round.index)
        .bind(round.label.to_string())
        .bind(round.started_at)
        .bind(round.ended_at)
        .bind(&round.note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debate_message (debate_id, round_index, role, persona, content, meta, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.debate_id)
        .bind(message.round_index)
        .bind(serde_json::to_value(message.role)?)
        .bind(&message.persona)
        .bind(&message.content)
        .bind(serde_json::to_value(&message.meta)?)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_score(&self, score: &Score) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debate_score (debate_id, persona, judge, score, rationale, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(score.debate_id)
        .bind(&score.persona)
        .bind(&score.judge)
        .bind(score.score)
        .bind(&score.rationale)
        .bind(score.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_vote(&self, vote: &Vote) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debate_vote (debate_id, method, rankings, weights, result, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(vote.debate_id)
        .bind(&vote.method)
        .bind(serde_json::to_value(&vote.rankings)?)
        .bind(&vote.weights)
        .bind(&vote.result)
        .bind(vote.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_messages(&self, debate_id: Uuid) -> anyhow::Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT debate_id, round_index, role, persona, content, meta, created_at \
             FROM debate_message WHERE debate_id = $1 ORDER BY round_index, created_at",
        )
        .bind(debate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_scores(&self, debate_id: Uuid) -> anyhow::Result<Vec<Score>> {
        let rows: Vec<ScoreRow> = sqlx::query_as(
            "SELECT debate_id, persona, judge, score, rationale, created_at \
             FROM debate_score WHERE debate_id = $1",
        )
        .bind(debate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_votes(&self, debate_id: Uuid) -> anyhow::Result<Vec<Vote>> {
        let rows: Vec<VoteRow> = sqlx::query_as(
            "SELECT debate_id, method, rankings, weights, result, created_at \
             FROM debate_vote WHERE debate_id = $1",
        )
        .bind(debate_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_checkpoint(&self, checkpoint: &DebateCheckpoint) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debate_checkpoint (debate_id, step, step_index, round_index, status, attempt_count, \
             resume_token, resume_claimed_at, last_checkpoint_at, last_event_at, context_meta) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (debate_id) DO UPDATE SET \
             step = excluded.step, step_index = excluded.step_index, round_index = excluded.round_index, \
             status = excluded.status, attempt_count = excluded.attempt_count, \
             resume_token = excluded.resume_token, resume_claimed_at = excluded.resume_claimed_at, \
             last_checkpoint_at = excluded.last_checkpoint_at, last_event_at = excluded.last_event_at, \
             context_meta = excluded.context_meta",
        )
        .bind(checkpoint.debate_id)
        .bind(checkpoint.step.to_string())
        .bind(checkpoint.step_index)
        .bind(checkpoint.round_index)
        .bind(checkpoint.status.to_string())
        .bind(checkpoint.attempt_count)
        .bind(checkpoint.resume_token)
        .bind(checkpoint.resume_claimed_at)
        .bind(checkpoint.last_checkpoint_at)
        .bind(checkpoint.last_event_at)
        .bind(&checkpoint.context_meta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_checkpoint(&self, debate_id: Uuid) -> anyhow::Result<Option<DebateCheckpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as("SELECT * FROM debate_checkpoint WHERE debate_id = $1")
            .bind(debate_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn record_error(&self, error: &DebateError) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO debate_error (debate_id, reason, occurred_at, age_seconds, detail) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(error.debate_id)
        .bind(&error.reason)
        .bind(error.occurred_at)
        .bind(error.age_seconds)
        .bind(&error.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ratings(&self, personas: &[String]) -> anyhow::Result<HashMap<String, PersonaRating>> {
        let rows: Vec<RatingRow> = sqlx::query_as(
            "SELECT persona, elo, games_played, wins FROM persona_rating WHERE persona = ANY($1)",
        )
        .bind(personas)
        .fetch_all(&self.pool)
        .await?;

        let mut ratings: HashMap<String, PersonaRating> =
            rows.into_iter().map(|r| (r.persona, PersonaRating { elo: r.elo, games_played: r.games_played as u32, wins: r.wins as u32 })).collect();
        for persona in personas {
            ratings.entry(persona.clone()).or_default();
        }
        Ok(ratings)
    }

    async fn save_ratings(&self, ratings: &HashMap<String, PersonaRating>) -> anyhow::Result<()> {
        for (persona, rating) in ratings {
            sqlx::query(
                "INSERT INTO persona_rating (persona, elo, games_played, wins) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (persona) DO UPDATE SET elo = excluded.elo, games_played = excluded.games_played, wins = excluded.wins",
            )
            .bind(persona)
            .bind(rating.elo)
            .bind(rating.games_played as i32)
            .bind(rating.wins as i32)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RatingRow {
    persona: String,
    elo: f64,
    games_played: i32,
    wins: i32,
}

#[derive(sqlx::FromRow)]
struct DebateRow {
    id: Uuid,
    prompt: String,
    status: String,
    mode: serde_json::Value,
    panel_config: serde_json::Value,
    budget: serde_json::Value,
    routed_model: Option<String>,
    routing_policy: Option<String>,
    routing_meta: Option<serde_json::Value>,
    owner_user_id: Option<String>,
    team_id: Option<String>,
    final_content: Option<String>,
    final_meta: Option<serde_json::Value>,
    runner_id: Option<String>,
    lease_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    run_attempt: i32,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<DebateRow> for Debate {
    type Error = anyhow::Error;

    fn try_from(row: DebateRow) -> Result<Self, Self::Error> {
        Ok(Debate {
            id: row.id,
            prompt: row.prompt,
            status: status_from_str(&row.status)?,
            mode: serde_json::from_value(row.mode)?,
            panel_config: serde_json::from_value(row.panel_config)?,
            budget: serde_json::from_value(row.budget)?,
            routed_model: row.routed_model,
            routing_policy: row.routing_policy,
            routing_meta: row.routing_meta.map(serde_json::from_value).transpose()?,
            owner_user_id: row.owner_user_id,
            team_id: row.team_id,
            final_content: row.final_content,
            final_meta: row.final_meta.map(serde_json::from_value).transpose()?,
            runner_id: row.runner_id,
            lease_expires_at: row.lease_expires_at,
            run_attempt: row.run_attempt,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_from_str(s: &str) -> anyhow::Result<DebateStatus> {
    match s {
        "queued" => Ok(DebateStatus::Queued),
        "running" => Ok(DebateStatus::Running),
        "completed" => Ok(DebateStatus::Completed),
        "degraded" => Ok(DebateStatus::Degraded),
        "failed" => Ok(DebateStatus::Failed),
        other => Err(anyhow::anyhow!("unknown debate status: {other}")),
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    debate_id: Uuid,
    round_index: i32,
    role: serde_json::Value,
    persona: String,
    content: String,
    meta: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            debate_id: row.debate_id,
            round_index: row.round_index,
            role: serde_json::from_value(row.role)?,
            persona: row.persona,
            content: row.content,
            meta: serde_json::from_value(row.meta)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScoreRow {
    debate_id: Uuid,
    persona: String,
    judge: String,
    score: f64,
    rationale: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ScoreRow> for Score {
    fn from(row: ScoreRow) -> Self {
        Score { debate_id: row.debate_id, persona: row.persona, judge: row.judge, score: row.score, rationale: row.rationale, created_at: row.created_at }
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    debate_id: Uuid,
    method: String,
    rankings: serde_json::Value,
    weights: serde_json::Value,
    result: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = anyhow::Error;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        Ok(Vote {
            debate_id: row.debate_id,
            method: row.method,
            rankings: serde_json::from_value(row.rankings)?,
            weights: row.weights,
            result: row.result,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    debate_id: Uuid,
    step: String,
    step_index: i32,
    round_index: i32,
    status: String,
    attempt_count: i32,
    resume_token: Uuid,
    resume_claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    last_checkpoint_at: chrono::DateTime<chrono::Utc>,
    last_event_at: chrono::DateTime<chrono::Utc>,
    context_meta: serde_json::Value,
}

impl TryFrom<CheckpointRow> for DebateCheckpoint {
    type Error = anyhow::Error;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(DebateCheckpoint {
            debate_id: row.debate_id,
            step: round_label_from_str(&row.step)?,
            step_index: row.step_index,
            round_index: row.round_index,
            status: status_from_str(&row.status)?,
            attempt_count: row.attempt_count,
            resume_token: row.resume_token,
            resume_claimed_at: row.resume_claimed_at,
            last_checkpoint_at: row.last_checkpoint_at,
            last_event_at: row.last_event_at,
            context_meta: row.context_meta,
        })
    }
}

fn round_label_from_str(s: &str) -> anyhow::Result<crate::domain::RoundLabel> {
    use crate::domain::RoundLabel;
    match s {
        "draft" => Ok(RoundLabel::Draft),
        "critique" => Ok(RoundLabel::Critique),
        "judge" => Ok(RoundLabel::Judge),
        "explore" => Ok(RoundLabel::Explore),
        "rebuttal" => Ok(RoundLabel::Rebuttal),
        "converge" => Ok(RoundLabel::Converge),
        "chair_verdict" => Ok(RoundLabel::ChairVerdict),
        "scribe" => Ok(RoundLabel::Scribe),
        "synthesis" => Ok(RoundLabel::Synthesis),
        other => Err(anyhow::anyhow!("unknown round label: {other}")),
    }
}
