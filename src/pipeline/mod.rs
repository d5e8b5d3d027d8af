//! Pipeline engine: dispatches each round to a pure stage function.
//!
//! Stages are a tagged enum dispatched through one [`run_stage`] function
//! rather than `dyn CognitivePattern` trait objects — a debate's shape
//! (which stages run, in what order) is a property of its [`DebateMode`],
//! not of per-stage polymorphism.

pub mod conversation;
pub mod critique;
pub mod draft;
pub mod judge;
pub mod parliament;
pub mod synthesis;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::StreamExt;
use uuid::Uuid;

use crate::circuit::CircuitRegistry;
use crate::domain::{
    BudgetConfig, Debate, DebateCheckpoint, DebateMessageRole, DebateMode, DebateStatus, FailureDetail, FinalMeta, Message, MessageMeta,
    PanelTolerance, Round, RoundLabel, Score, Seat, UsageAccumulator, Vote,
};
use crate::events::{DebateEvent, SseBackend};
use crate::llm::LlmClient;
use crate::ranking::compute_rankings;
use crate::seat::{self, RetryPolicy};
use crate::store::DebateStore;

const MAX_PARALLEL_SEATS: usize = 8;

/// Everything a stage needs to run one round of a debate.
pub struct DebateContext {
    pub debate: Debate,
    pub clients: HashMap<String, Arc<dyn LlmClient>>,
    pub circuits: Arc<CircuitRegistry>,
    pub store: Arc<dyn DebateStore>,
    pub events: Arc<dyn SseBackend>,
    pub usage: Arc<UsageAccumulator>,
    pub retry_policy: RetryPolicy,
}

/// Outcome of one seat's turn within a stage.
pub struct SeatOutcome {
    pub seat_id: String,
    pub content: String,
    pub stance: Option<String>,
    pub succeeded: bool,
}

/// Result of running one pipeline stage.
pub struct StageResult {
    pub label: RoundLabel,
    pub outcomes: Vec<SeatOutcome>,
    pub scores: Vec<Score>,
}

/// Tagged stage identifiers, one per `RoundLabel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Draft,
    Critique,
    Judge,
    Explore,
    Rebuttal,
    Converge,
    ChairVerdict,
    Scribe,
    Synthesis,
    ConversationRound,
    FacilitatorSynthesis,
}

impl From<StageKind> for RoundLabel {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Draft | StageKind::ConversationRound => RoundLabel::Draft,
            StageKind::Critique => RoundLabel::Critique,
            StageKind::Judge => RoundLabel::Judge,
            StageKind::Explore => RoundLabel::Explore,
            StageKind::Rebuttal => RoundLabel::Rebuttal,
            StageKind::Converge => RoundLabel::Converge,
            StageKind::ChairVerdict => RoundLabel::ChairVerdict,
            StageKind::Scribe => RoundLabel::Scribe,
            StageKind::Synthesis | StageKind::FacilitatorSynthesis => RoundLabel::Synthesis,
        }
    }
}

/// Resolve each seat's `LlmClient` from the worker's provider-keyed clients,
/// keyed instead by `seat_id` for [`fan_out_seats`]'s lookup.
///
/// Seats already pin a concrete `provider_key`/`model`; the router's job is
/// choosing the debate's overall `routed_model` before dispatch, not
/// second-guessing a seat's explicit provider assignment.
pub fn seat_clients_for(
    provider_clients: &HashMap<String, Arc<dyn LlmClient>>,
    seats: &[Seat],
) -> HashMap<String, Arc<dyn LlmClient>> {
    let mut by_seat = HashMap::new();
    for seat in seats {
        let key = match seat.provider_key {
            crate::llm::Provider::OpenAi => "openai",
            crate::llm::Provider::Anthropic => "anthropic",
            crate::llm::Provider::Groq => "groq",
            crate::llm::Provider::Xai => "xai",
            crate::llm::Provider::Custom => continue,
        };
        if let Some(client) = provider_clients.get(key) {
            by_seat.insert(seat.seat_id.clone(), client.clone());
        }
    }
    by_seat
}

/// Fan a prompt out across seats with bounded parallelism, recording each
/// seat's usage and circuit-breaker outcome as it resolves.
pub(crate) async fn fan_out_seats<F>(seats: &[Seat], ctx: &DebateContext, build_prompt: F) -> Vec<SeatOutcome>
where
    F: Fn(&Seat) -> String,
{
    let tasks = seats.iter().map(|seat| {
        let prompt = build_prompt(seat);
        let seat = seat.clone();
        let client = ctx.clients.get(&seat.seat_id).cloned();
        let circuits = ctx.circuits.clone();
        let usage = ctx.usage.clone();
        let policy = ctx.retry_policy;
        let max_tokens = ctx.debate.budget.max_tokens.map_or(2048, |t| t.min(4096) as u32);

        async move {
            let Some(client) = client else {
                return SeatOutcome { seat_id: seat.seat_id, content: String::new(), stance: None, succeeded: false };
            };
            let req = crate::seat::build_request(&seat, &prompt, "", max_tokens);
            let provider = client.provider();
            match seat::run_seat_turn(client, &circuits, req, policy).await {
                Ok(outcome) => {
                    usage.record(provider, outcome.usage);
                    SeatOutcome { seat_id: seat.seat_id, content: outcome.envelope.content, stance: outcome.envelope.stance, succeeded: true }
                }
                Err(err) => {
                    tracing::warn!(seat_id = %seat.seat_id, error = %err, "seat turn failed");
                    SeatOutcome { seat_id: seat.seat_id, content: String::new(), stance: None, succeeded: false }
                }
            }
        }
    });

    futures::stream::iter(tasks).buffer_unordered(MAX_PARALLEL_SEATS.min(seats.len().max(1))).collect().await
}

/// Whether enough seats succeeded to continue, per the panel's tolerance.
pub fn tolerance_satisfied(tolerance: &PanelTolerance, total: usize, failed: usize) -> bool {
    let succeeded = total.saturating_sub(failed);
    if succeeded < tolerance.min_required_seats {
        return false;
    }
    if total == 0 {
        return true;
    }
    (failed as f32 / total as f32) <= tolerance.max_seat_fail_ratio
}

/// Dispatch one stage by its tagged kind, then checkpoint progress so a
/// crashed worker can resume at this step instead of restarting the debate.
pub async fn run_stage(kind: StageKind, ctx: &mut DebateContext, round_index: i32, resume_token: Uuid) -> anyhow::Result<StageResult> {
    let label: RoundLabel = kind.into();
    let started = Utc::now();
    ctx.events
        .publish(ctx.debate.id, DebateEvent::RoundStarted { round_index, label: label.to_string() })
        .await?;

    let result = match kind {
        StageKind::Draft => draft::run(ctx, round_index).await?,
        StageKind::Critique => critique::run(ctx, round_index).await?,
        StageKind::Judge => judge::run(ctx, round_index).await?,
        StageKind::Explore => parliament::run_explore(ctx, round_index).await?,
        StageKind::Rebuttal => parliament::run_rebuttal(ctx, round_index).await?,
        StageKind::Converge => parliament::run_converge(ctx, round_index).await?,
        StageKind::ChairVerdict => parliament::run_chair_verdict(ctx, round_index).await?,
        StageKind::Scribe => conversation::run_scribe(ctx, round_index).await?,
        StageKind::Synthesis => synthesis::run(ctx, round_index).await?,
        StageKind::ConversationRound => conversation::run_round(ctx, round_index).await?,
        StageKind::FacilitatorSynthesis => conversation::run_facilitator_synthesis(ctx, round_index).await?,
    };

    for message in stage_messages(&ctx.debate.id, round_index, label, &result.outcomes) {
        ctx.store.append_message(&message).await?;
        ctx.events
            .publish(ctx.debate.id, DebateEvent::Message { round_index, persona: message.persona.clone(), content: message.content.clone() })
            .await?;
    }
    for score in &result.scores {
        ctx.store.append_score(score).await?;
        ctx.events.publish(ctx.debate.id, DebateEvent::Score { persona: score.persona.clone(), judge: score.judge.clone(), score: score.score }).await?;
    }

    ctx.store
        .append_round(&Round { debate_id: ctx.debate.id, index: round_index, label, started_at: started, ended_at: Some(Utc::now()), note: None })
        .await?;
    ctx.events.publish(ctx.debate.id, DebateEvent::RoundEnded { round_index, label: label.to_string() }).await?;

    let now = Utc::now();
    ctx.store
        .save_checkpoint(&DebateCheckpoint {
            debate_id: ctx.debate.id,
            step: label,
            step_index: round_index,
            round_index,
            status: DebateStatus::Running,
            attempt_count: ctx.debate.run_attempt,
            resume_token,
            resume_claimed_at: None,
            last_checkpoint_at: now,
            last_event_at: now,
            context_meta: serde_json::json!({ "label": label.to_string() }),
        })
        .await?;

    Ok(result)
}

fn stage_messages(debate_id: &Uuid, round_index: i32, label: RoundLabel, outcomes: &[SeatOutcome]) -> Vec<Message> {
    let role = match label {
        RoundLabel::Draft => DebateMessageRole::Candidate,
        RoundLabel::Critique | RoundLabel::Rebuttal => DebateMessageRole::Revised,
        RoundLabel::Judge | RoundLabel::ChairVerdict => DebateMessageRole::Judge,
        RoundLabel::Scribe => DebateMessageRole::Scribe,
        RoundLabel::Synthesis => DebateMessageRole::Synthesizer,
        RoundLabel::Explore | RoundLabel::Converge => DebateMessageRole::Seat,
    };
    outcomes
        .iter()
        .filter(|o| o.succeeded)
        .map(|o| Message {
            debate_id: *debate_id,
            round_index,
            role,
            persona: o.seat_id.clone(),
            content: o.content.clone(),
            meta: MessageMeta { seat_id: Some(o.seat_id.clone()), stance: o.stance.clone(), reasoning: None, provider: None, model: None, phase: None },
            created_at: Utc::now(),
        })
        .collect()
}

/// Decide how a pipeline should respond after a stage's seats have run:
/// continue, finish in a degraded state, or abort fatally.
pub enum StageVerdict {
    Continue,
    Degraded { reason: String },
    Fatal { detail: FailureDetail },
}

pub fn evaluate_stage(tolerance: &PanelTolerance, round_index: i32, outcomes: &[SeatOutcome]) -> StageVerdict {
    let total = outcomes.len();
    let failed = outcomes.iter().filter(|o| !o.succeeded).count();
    let succeeded = total - failed;

    if succeeded == 0 {
        return StageVerdict::Fatal {
            detail: FailureDetail { reason: "all_seats_failed".into(), round_index, success_count: succeeded, failure_count: failed },
        };
    }
    if tolerance_satisfied(tolerance, total, failed) {
        StageVerdict::Continue
    } else {
        StageVerdict::Degraded { reason: format!("{failed}/{total} seats failed, exceeding panel tolerance") }
    }
}

pub fn budget_exhausted(usage: &UsageAccumulator, budget: &BudgetConfig) -> Option<&'static str> {
    usage.budget_exceeded(budget)
}

/// Finalize a debate's status bookkeeping after the pipeline loop exits.
pub fn finalize_status(debate: &mut Debate, status: DebateStatus, final_meta: FinalMeta) {
    debate.status = status;
    debate.final_meta = Some(final_meta);
    debate.updated_at = Utc::now();
}

const CONVERSATION_ROUNDS: i32 = 3;

fn stages_for_mode(mode: DebateMode) -> Vec<StageKind> {
    match mode {
        DebateMode::Debate => vec![StageKind::Draft, StageKind::Critique, StageKind::Judge, StageKind::Synthesis],
        DebateMode::Parliament => vec![StageKind::Explore, StageKind::Rebuttal, StageKind::Converge, StageKind::ChairVerdict],
        DebateMode::Conversation => {
            let mut stages = vec![StageKind::ConversationRound; CONVERSATION_ROUNDS as usize];
            stages.push(StageKind::Scribe);
            stages.push(StageKind::FacilitatorSynthesis);
            stages
        }
    }
}

/// Run every stage of a debate to completion, persisting rounds/messages/
/// scores/checkpoints as it goes and updating ratings from the judge
/// scores once it finishes.
///
/// Returns once the debate reaches a terminal status; the caller persists
/// the final `ctx.debate` and releases the lease.
pub async fn run_pipeline(ctx: &mut DebateContext) -> anyhow::Result<()> {
    let stages = stages_for_mode(ctx.debate.mode);
    let tolerance = ctx.debate.panel_config.tolerance;
    let mut final_content: Option<String> = None;
    let mut degraded_reason: Option<String> = None;
    let mut failed_seats: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    let checkpoint = ctx.store.get_checkpoint(ctx.debate.id).await?;
    let resume_token = checkpoint.as_ref().map(|c| c.resume_token).unwrap_or_else(Uuid::new_v4);
    let resume_from = checkpoint.as_ref().map(|c| c.step_index + 1).unwrap_or(0);
    if resume_from > 0 {
        tracing::info!(debate_id = %ctx.debate.id, resume_from, "resuming debate from checkpoint, skipping completed stages");
    }

    for (round_index, kind) in stages.into_iter().enumerate() {
        let round_index = round_index as i32;
        if round_index < resume_from {
            continue;
        }

        if let Some(reason) = budget_exhausted(&ctx.usage, &ctx.debate.budget) {
            degraded_reason = Some(reason.to_string());
            break;
        }

        let result = run_stage(kind, ctx, round_index, resume_token).await?;
        failed_seats.extend(result.outcomes.iter().filter(|o| !o.succeeded).map(|o| o.seat_id.clone()));

        if matches!(kind, StageKind::Judge) {
            let scores = ctx.store.get_scores(ctx.debate.id).await?;
            let rankings = compute_rankings(&scores);
            if !rankings.is_empty() {
                ctx.store
                    .append_vote(&Vote {
                        debate_id: ctx.debate.id,
                        method: "borda_condorcet".into(),
                        rankings: rankings.iter().map(|r| r.persona.clone()).collect(),
                        weights: serde_json::json!({}),
                        result: serde_json::to_value(&rankings)?,
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }

        let is_final_stage = matches!(kind, StageKind::Synthesis | StageKind::FacilitatorSynthesis | StageKind::ChairVerdict);

        if is_final_stage {
            if let Some(outcome) = result.outcomes.iter().find(|o| o.succeeded) {
                final_content = Some(outcome.content.clone());
            }
            continue;
        }

        match evaluate_stage(&tolerance, round_index, &result.outcomes) {
            StageVerdict::Continue => {}
            StageVerdict::Degraded { reason } => {
                degraded_reason = Some(reason);
                break;
            }
            StageVerdict::Fatal { detail } => {
                ctx.debate.status = DebateStatus::Failed;
                ctx.debate.final_meta = Some(FinalMeta {
                    error: Some("all_seats_failed".into()),
                    failure: Some(detail),
                    truncate_reason: None,
                    failed_seats: failed_seats.into_iter().collect(),
                });
                ctx.events.publish(ctx.debate.id, DebateEvent::DebateFailed { reason: "all_seats_failed".into() }).await?;
                ctx.debate.updated_at = Utc::now();
                return Ok(());
            }
        }
    }

    let all_scores = ctx.store.get_scores(ctx.debate.id).await?;
    let ratings_outcomes = crate::ratings::collect_pairwise_from_scores(&all_scores);
    if !ratings_outcomes.is_empty() {
        let personas: Vec<String> = ctx.debate.panel_config.seats.iter().map(|s| s.seat_id.clone()).collect();
        let current = ctx.store.get_ratings(&personas).await?;
        let updated = crate::ratings::update_ratings(current, &ratings_outcomes);
        ctx.store.save_ratings(&updated).await?;
        tracing::debug!(debate_id = %ctx.debate.id, pairs = ratings_outcomes.len(), "persona ratings updated");
    }

    let status = if degraded_reason.is_some() || final_content.is_none() { DebateStatus::Degraded } else { DebateStatus::Completed };
    ctx.debate.final_content = final_content;
    finalize_status(
        &mut ctx.debate,
        status,
        FinalMeta { error: None, failure: None, truncate_reason: degraded_reason, failed_seats: failed_seats.into_iter().collect() },
    );

    let event = if status == DebateStatus::Completed {
        DebateEvent::Final { content: ctx.debate.final_content.clone().unwrap_or_default() }
    } else {
        DebateEvent::Notice { message: "debate finished degraded".into() }
    };
    ctx.events.publish(ctx.debate.id, event).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PanelTolerance;

    fn outcome(succeeded: bool) -> SeatOutcome {
        SeatOutcome { seat_id: "x".into(), content: String::new(), stance: None, succeeded }
    }

    #[test]
    fn tolerance_allows_minority_failure() {
        let tolerance = PanelTolerance { min_required_seats: 1, max_seat_fail_ratio: 0.5 };
        assert!(tolerance_satisfied(&tolerance, 4, 1));
        assert!(tolerance_satisfied(&tolerance, 4, 2));
        assert!(!tolerance_satisfied(&tolerance, 4, 3));
    }

    #[test]
    fn all_seats_failing_is_fatal() {
        let tolerance = PanelTolerance::default();
        let outcomes = vec![outcome(false), outcome(false)];
        assert!(matches!(evaluate_stage(&tolerance, 0, &outcomes), StageVerdict::Fatal { .. }));
    }

    #[test]
    fn tolerance_exceeded_is_degraded_not_fatal() {
        let tolerance = PanelTolerance { min_required_seats: 1, max_seat_fail_ratio: 0.2 };
        let outcomes = vec![outcome(true), outcome(false), outcome(false)];
        assert!(matches!(evaluate_stage(&tolerance, 0, &outcomes), StageVerdict::Degraded { .. }));
    }

    #[test]
    fn within_tolerance_continues() {
        let tolerance = PanelTolerance::default();
        let outcomes = vec![outcome(true), outcome(true), outcome(false)];
        assert!(matches!(evaluate_stage(&tolerance, 0, &outcomes), StageVerdict::Continue));
    }
}
