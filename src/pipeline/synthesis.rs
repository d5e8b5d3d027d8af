//! Synthesis stage: produce the debate's final answer from the ranked
//! candidate responses.
//!
//! If no synthesizer seat is configured, or the synthesizer's call fails,
//! the top-ranked persona's own content stands in as the final answer and
//! the debate finishes degraded rather than failing outright.

use super::{fan_out_seats, DebateContext, StageResult};
use crate::domain::{RoleProfile, RoundLabel};
use crate::ranking::compute_rankings;

pub async fn run(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let scores = ctx.store.get_scores(ctx.debate.id).await?;
    let messages = ctx.store.get_messages(ctx.debate.id).await?;
    let rankings = compute_rankings(&scores);

    let latest_by_persona: std::collections::HashMap<&str, &str> = messages
        .iter()
        .filter(|m| m.round_index < round_index)
        .fold(std::collections::HashMap::new(), |mut acc, m| {
            acc.insert(m.persona.as_str(), m.content.as_str());
            acc
        });

    let ranked_block = rankings
        .iter()
        .filter_map(|r| latest_by_persona.get(r.persona.as_str()).map(|content| format!("{} (borda={}): {}", r.persona, r.borda_points, content)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let synthesizer = ctx.debate.panel_config.seats.iter().find(|s| s.role_profile == RoleProfile::Synthesizer).cloned();
    let prompt = ctx.debate.prompt.clone();

    let Some(synthesizer) = synthesizer else {
        let fallback = rankings.first().and_then(|r| latest_by_persona.get(r.persona.as_str())).map(|s| s.to_string()).unwrap_or_default();
        return Ok(StageResult {
            label: RoundLabel::Synthesis,
            outcomes: vec![super::SeatOutcome { seat_id: "fallback".into(), content: fallback, stance: None, succeeded: true }],
            scores: Vec::new(),
        });
    };

    let outcomes = fan_out_seats(std::slice::from_ref(&synthesizer), ctx, |_seat| {
        format!("Original prompt: {prompt}\n\nRanked candidate answers:\n{ranked_block}\n\nSynthesize a single final answer.")
    })
    .await;

    if outcomes.first().is_some_and(|o| o.succeeded) {
        Ok(StageResult { label: RoundLabel::Synthesis, outcomes, scores: Vec::new() })
    } else {
        let fallback = rankings.first().and_then(|r| latest_by_persona.get(r.persona.as_str())).map(|s| s.to_string()).unwrap_or_default();
        tracing::warn!(debate_id = %ctx.debate.id, "synthesis failed, falling back to top-ranked persona");
        Ok(StageResult {
            label: RoundLabel::Synthesis,
            outcomes: vec![super::SeatOutcome { seat_id: "fallback".into(), content: fallback, stance: None, succeeded: true }],
            scores: Vec::new(),
        })
    }
}
