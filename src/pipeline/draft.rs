//! Draft stage: every seat answers the prompt independently.

use super::{fan_out_seats, DebateContext, StageResult};
use crate::domain::RoundLabel;

pub async fn run(ctx: &mut DebateContext, _round_index: i32) -> anyhow::Result<StageResult> {
    let seats = ctx.debate.panel_config.seats.clone();
    let prompt = ctx.debate.prompt.clone();
    let outcomes = fan_out_seats(&seats, ctx, |_seat| prompt.clone()).await;
    Ok(StageResult { label: RoundLabel::Draft, outcomes, scores: Vec::new() })
}
