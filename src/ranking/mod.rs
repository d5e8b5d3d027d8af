//! Borda + Condorcet ranking fusion over judge scores.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Score;

/// A persona's fused ranking result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedPersona {
    pub persona: String,
    pub borda_points: f64,
    pub condorcet_wins: u32,
    pub mean_score: f64,
}

/// Fuse per-judge scores into a single deterministic ranking.
///
/// Borda points: for each judge, personas are ordered by that judge's score
/// (desc); a persona earns `n - rank` points where `n` is the persona count.
/// Condorcet wins: for each pair of personas, the one a judge scored higher
/// wins that pairwise contest; a persona's `condorcet_wins` is how many
/// other personas it beats across all judges combined.
///
/// Personas are ranked primarily by the fused score `borda_points +
/// condorcet_wins`, then by `borda_points`, then `condorcet_wins`, then
/// `persona` — deterministic regardless of input order, so two callers
/// passing the same scores in different orders get identical output.
pub fn compute_rankings(scores: &[Score]) -> Vec<RankedPersona> {
    let mut personas: Vec<String> = scores.iter().map(|s| s.persona.clone()).collect();
    personas.sort();
    personas.dedup();

    let mut by_judge: HashMap<&str, Vec<&Score>> = HashMap::new();
    for score in scores {
        by_judge.entry(&score.judge).or_default().push(score);
    }

    let n = personas.len();
    let mut borda: HashMap<&str, f64> = personas.iter().map(|p| (p.as_str(), 0.0)).collect();
    let mut condorcet: HashMap<&str, u32> = personas.iter().map(|p| (p.as_str(), 0)).collect();
    let mut score_sum: HashMap<&str, f64> = personas.iter().map(|p| (p.as_str(), 0.0)).collect();
    let mut score_count: HashMap<&str, u32> = personas.iter().map(|p| (p.as_str(), 0)).collect();

    for judge_scores in by_judge.values() {
        let mut ordered: Vec<&&Score> = judge_scores.iter().collect();
        ordered.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.persona.cmp(&b.persona))
        });

        for (rank, s) in ordered.iter().enumerate() {
            *borda.entry(&s.persona).or_insert(0.0) += (n.saturating_sub(rank + 1)) as f64;
            *score_sum.entry(&s.persona).or_insert(0.0) += s.score;
            *score_count.entry(&s.persona).or_insert(0) += 1;
        }

        for i in 0..ordered.len() {
            for j in 0..ordered.len() {
                if i == j {
                    continue;
                }
                if ordered[i].score > ordered[j].score {
                    *condorcet.entry(&ordered[i].persona).or_insert(0) += 1;
                }
            }
        }
    }

    let mut ranked: Vec<RankedPersona> = personas
        .iter()
        .map(|p| {
            let count = score_count.get(p.as_str()).copied().unwrap_or(0);
            let sum = score_sum.get(p.as_str()).copied().unwrap_or(0.0);
            RankedPersona {
                persona: p.clone(),
                borda_points: borda.get(p.as_str()).copied().unwrap_or(0.0),
                condorcet_wins: condorcet.get(p.as_str()).copied().unwrap_or(0),
                mean_score: if count == 0 { 0.0 } else { sum / f64::from(count) },
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        let fused_a = a.borda_points + a.condorcet_wins as f64;
        let fused_b = b.borda_points + b.condorcet_wins as f64;
        fused_b
            .partial_cmp(&fused_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.borda_points.partial_cmp(&a.borda_points).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.condorcet_wins.cmp(&a.condorcet_wins))
            .then_with(|| a.persona.cmp(&b.persona))
    });

    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn score(persona: &str, judge: &str, value: f64) -> Score {
        Score {
            debate_id: Uuid::new_v4(),
            persona: persona.into(),
            judge: judge.into(),
            score: value,
            rationale: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn top_ranked_has_highest_borda_and_condorcet() {
        let scores = vec![
            score("optimist", "judge-a", 9.0),
            score("risk-officer", "judge-a", 5.0),
            score("optimist", "judge-b", 8.0),
            score("risk-officer", "judge-b", 6.0),
        ];
        let ranked = compute_rankings(&scores);
        let top = &ranked[0];
        assert_eq!(top.persona, "optimist");
        for other in &ranked[1..] {
            assert!(top.borda_points >= other.borda_points);
            assert!(top.condorcet_wins >= other.condorcet_wins);
        }
    }

    #[test]
    fn ranking_is_deterministic_regardless_of_input_order() {
        let mut scores = vec![
            score("architect", "judge-a", 7.0),
            score("optimist", "judge-a", 9.0),
            score("risk-officer", "judge-a", 5.0),
            score("optimist", "judge-b", 8.0),
            score("architect", "judge-b", 6.0),
            score("risk-officer", "judge-b", 6.5),
        ];
        let ranked_a = compute_rankings(&scores);
        scores.reverse();
        let ranked_b = compute_rankings(&scores);
        assert_eq!(ranked_a, ranked_b);
    }

    #[test]
    fn ties_break_by_persona_name() {
        let scores = vec![score("zebra", "judge-a", 5.0), score("alpha", "judge-a", 5.0)];
        let ranked = compute_rankings(&scores);
        assert_eq!(ranked[0].persona, "alpha");
    }

    #[test]
    fn single_persona_wins_trivially() {
        let scores = vec![score("solo", "judge-a", 7.0)];
        let ranked = compute_rankings(&scores);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].condorcet_wins, 0);
    }
}
