//! Judge stage: the panel's judge seats score every persona's latest answer
//! against a shared rubric.

use chrono::Utc;
use serde::Deserialize;

use super::{fan_out_seats, DebateContext, StageResult};
use crate::domain::{RoundLabel, Score};

#[derive(Debug, Deserialize)]
struct PersonaScore {
    persona: String,
    score: f64,
    #[serde(default)]
    rationale: String,
}

/// A judge's content is expected to be a JSON array of per-persona scores.
/// A judge that returns unparseable output contributes a neutral score for
/// every persona instead of being dropped outright.
fn parse_verdict(content: &str, personas: &[String]) -> Vec<PersonaScore> {
    serde_json::from_str::<Vec<PersonaScore>>(content).unwrap_or_else(|_| {
        personas
            .iter()
            .map(|p| PersonaScore { persona: p.clone(), score: 5.0, rationale: "unparseable judge output".into() })
            .collect()
    })
}

pub async fn run(ctx: &mut DebateContext, round_index: i32) -> anyhow::Result<StageResult> {
    let prior_round = round_index - 1;
    let candidates = ctx.store.get_messages(ctx.debate.id).await?;
    let latest: Vec<_> = candidates.into_iter().filter(|m| m.round_index == prior_round).collect();
    let personas: Vec<String> = latest.iter().map(|m| m.persona.clone()).collect();

    let context_block = latest.iter().map(|m| format!("{}: {}", m.persona, m.content)).collect::<Vec<_>>().join("\n\n");
    let prompt = ctx.debate.prompt.clone();

    let judges = ctx.debate.panel_config.judges.clone();
    let outcomes = fan_out_seats(&judges, ctx, |_seat| {
        format!(
            "Original prompt: {prompt}\n\nCandidate answers:\n{context_block}\n\n\
             Score each persona from 0 to 10 on accuracy, clarity, and persuasiveness. \
             Respond with JSON content of the form: \
             [{{\"persona\": string, \"score\": number, \"rationale\": string}}]."
        )
    })
    .await;

    let debate_id = ctx.debate.id;
    let mut scores = Vec::new();
    for outcome in outcomes.iter().filter(|o| o.succeeded) {
        for persona_score in parse_verdict(&outcome.content, &personas) {
            scores.push(Score {
                debate_id,
                persona: persona_score.persona,
                judge: outcome.seat_id.clone(),
                score: Score::clamp(persona_score.score),
                rationale: persona_score.rationale,
                created_at: Utc::now(),
            });
        }
    }

    Ok(StageResult { label: RoundLabel::Judge, outcomes, scores })
}
