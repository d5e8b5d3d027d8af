//! Critique stage: each seat revises its draft in light of the other seats'
//! drafts from the prior round.

use super::{fan_out_seats, DebateContext, StageResult};
use crate::domain::RoundLabel;

pub async fn run(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let prior_round = round_index - 1;
    let drafts = ctx.store.get_messages(ctx.debate.id).await?;
    let prior: Vec<_> = drafts.into_iter().filter(|m| m.round_index == prior_round).collect();

    let context_block = prior
        .iter()
        .map(|m| format!("{}: {}", m.persona, m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let seats = ctx.debate.panel_config.seats.clone();
    let prompt = ctx.debate.prompt.clone();
    let own_drafts: std::collections::HashMap<String, String> =
        prior.iter().map(|m| (m.persona.clone(), m.content.clone())).collect();

    let outcomes = fan_out_seats(&seats, ctx, |seat| {
        let own = own_drafts.get(&seat.seat_id).cloned().unwrap_or_default();
        format!(
            "Original prompt: {prompt}\n\nYour earlier draft:\n{own}\n\n\
             Other seats' drafts:\n{context_block}\n\n\
             Revise your answer in light of the other perspectives, keeping your role's stance."
        )
    })
    .await;

    Ok(StageResult { label: RoundLabel::Critique, outcomes, scores: Vec::new() })
}
