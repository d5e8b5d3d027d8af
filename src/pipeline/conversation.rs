//! Conversation-mode stages: N free-form rounds, then a scribe summary and
//! facilitator synthesis.

use super::{fan_out_seats, DebateContext, StageResult};
use crate::domain::{RoleProfile, RoundLabel};

/// One open-ended round where every seat responds to the prompt plus the
/// running conversation so far.
pub async fn run_round(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let messages = ctx.store.get_messages(ctx.debate.id).await?;
    let context_block = messages
        .into_iter()
        .filter(|m| m.round_index < round_index)
        .map(|m| format!("{}: {}", m.persona, m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let seats = ctx.debate.panel_config.seats.clone();
    let prompt = ctx.debate.prompt.clone();
    let outcomes = fan_out_seats(&seats, ctx, |_seat| {
        if context_block.is_empty() {
            prompt.clone()
        } else {
            format!("Original prompt: {prompt}\n\nConversation so far:\n{context_block}\n\nContinue the conversation.")
        }
    })
    .await;

    Ok(StageResult { label: RoundLabel::Draft, outcomes, scores: Vec::new() })
}

/// The scribe seat summarizes the conversation without adding new claims.
pub async fn run_scribe(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let messages = ctx.store.get_messages(ctx.debate.id).await?;
    let context_block = messages.into_iter().filter(|m| m.round_index < round_index).map(|m| format!("{}: {}", m.persona, m.content)).collect::<Vec<_>>().join("\n\n");

    let scribe = ctx.debate.panel_config.seats.iter().find(|s| s.role_profile == RoleProfile::Scribe).cloned();
    let Some(scribe) = scribe else {
        return Ok(StageResult { label: RoundLabel::Scribe, outcomes: Vec::new(), scores: Vec::new() });
    };

    let outcomes = fan_out_seats(std::slice::from_ref(&scribe), ctx, |_seat| {
        format!("Conversation transcript:\n{context_block}\n\nSummarize the discussion without introducing new claims.")
    })
    .await;
    Ok(StageResult { label: RoundLabel::Scribe, outcomes, scores: Vec::new() })
}

/// The facilitator seat synthesizes a single answer from the conversation
/// and scribe summary.
pub async fn run_facilitator_synthesis(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let messages = ctx.store.get_messages(ctx.debate.id).await?;
    let context_block = messages.into_iter().filter(|m| m.round_index < round_index).map(|m| format!("{}: {}", m.persona, m.content)).collect::<Vec<_>>().join("\n\n");

    let facilitator = ctx.debate.panel_config.seats.iter().find(|s| s.role_profile == RoleProfile::Facilitator).cloned();
    let prompt = ctx.debate.prompt.clone();

    let Some(facilitator) = facilitator else {
        let fallback = context_block.lines().last().unwrap_or_default().to_string();
        return Ok(StageResult {
            label: RoundLabel::Synthesis,
            outcomes: vec![super::SeatOutcome { seat_id: "fallback".into(), content: fallback, stance: None, succeeded: true }],
            scores: Vec::new(),
        });
    };

    let outcomes = fan_out_seats(std::slice::from_ref(&facilitator), ctx, |_seat| {
        format!("Original prompt: {prompt}\n\nConversation:\n{context_block}\n\nSynthesize the final answer.")
    })
    .await;
    Ok(StageResult { label: RoundLabel::Synthesis, outcomes, scores: Vec::new() })
}
