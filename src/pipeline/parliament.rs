//! Parliament-mode stages: explore, rebuttal, converge, chair verdict.

use super::{fan_out_seats, DebateContext, StageResult};
use crate::domain::{RoleProfile, RoundLabel};

async fn prior_round_block(ctx: &DebateContext, round_index: i32) -> anyhow::Result<String> {
    let prior = round_index - 1;
    let messages = ctx.store.get_messages(ctx.debate.id).await?;
    Ok(messages.into_iter().filter(|m| m.round_index == prior).map(|m| format!("{}: {}", m.persona, m.content)).collect::<Vec<_>>().join("\n\n"))
}

/// Seats independently explore the space of positions with no prior context.
pub async fn run_explore(ctx: &mut DebateContext, _round_index: i32) -> anyhow::Result<StageResult> {
    let seats = ctx.debate.panel_config.seats.clone();
    let prompt = ctx.debate.prompt.clone();
    let outcomes = fan_out_seats(&seats, ctx, |_seat| format!("{prompt}\n\nExplore the space of possible positions before committing to one."))
        .await;
    Ok(StageResult { label: RoundLabel::Explore, outcomes, scores: Vec::new() })
}

/// Seats rebut each other's explored positions.
pub async fn run_rebuttal(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let context_block = prior_round_block(ctx, round_index).await?;
    let seats = ctx.debate.panel_config.seats.clone();
    let prompt = ctx.debate.prompt.clone();
    let outcomes = fan_out_seats(&seats, ctx, |_seat| {
        format!("Original prompt: {prompt}\n\nPositions explored so far:\n{context_block}\n\nRebut the positions you disagree with.")
    })
    .await;
    Ok(StageResult { label: RoundLabel::Rebuttal, outcomes, scores: Vec::new() })
}

/// Seats converge toward a shared position given the rebuttals.
pub async fn run_converge(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let context_block = prior_round_block(ctx, round_index).await?;
    let seats = ctx.debate.panel_config.seats.clone();
    let prompt = ctx.debate.prompt.clone();
    let outcomes = fan_out_seats(&seats, ctx, |_seat| {
        format!("Original prompt: {prompt}\n\nRebuttals:\n{context_block}\n\nState where you now converge with the other seats, and where you still differ.")
    })
    .await;
    Ok(StageResult { label: RoundLabel::Converge, outcomes, scores: Vec::new() })
}

/// The chair seat renders a verdict over the converged positions.
pub async fn run_chair_verdict(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let context_block = prior_round_block(ctx, round_index).await?;
    let prompt = ctx.debate.prompt.clone();
    let chair = ctx.debate.panel_config.seats.iter().find(|s| s.role_profile == RoleProfile::Chair).cloned();

    let Some(chair) = chair else {
        return Ok(StageResult { label: RoundLabel::ChairVerdict, outcomes: Vec::new(), scores: Vec::new() });
    };

    let outcomes = fan_out_seats(std::slice::from_ref(&chair), ctx, |_seat| {
        format!("Original prompt: {prompt}\n\nConverged positions:\n{context_block}\n\nRender a verdict.")
    })
    .await;
    Ok(StageResult { label: RoundLabel::ChairVerdict, outcomes, scores: Vec::new() })
}
