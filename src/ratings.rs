//! Elo ratings for personas, updated from pairwise winners extracted out of
//! judge scores.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const K_BASE: f64 = 24.0;
const K_NOVICE: f64 = 32.0;
const NOVICE_THRESHOLD: u32 = 15;
const INITIAL_ELO: f64 = 1500.0;
const WILSON_Z: f64 = 1.96;

use crate::domain::Score;

/// A persona's rating state, persisted across debates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersonaRating {
    pub elo: f64,
    pub games_played: u32,
    pub wins: u32,
}

impl Default for PersonaRating {
    fn default() -> Self {
        Self { elo: INITIAL_ELO, games_played: 0, wins: 0 }
    }
}

impl PersonaRating {
    fn k_factor(self) -> f64 {
        if self.games_played < NOVICE_THRESHOLD {
            K_NOVICE
        } else {
            K_BASE
        }
    }

    /// Wilson score interval lower/upper bound for this persona's win rate.
    pub fn wilson_interval(self) -> (f64, f64) {
        wilson_interval(self.wins, self.games_played, WILSON_Z)
    }
}

/// Wilson score interval for `wins` out of `n` trials at confidence `z`.
pub fn wilson_interval(wins: u32, n: u32, z: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let n = f64::from(n);
    let wins = f64::from(wins);
    let p_hat = wins / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = p_hat + z2 / (2.0 * n);
    let margin = z * ((p_hat * (1.0 - p_hat) / n) + z2 / (4.0 * n * n)).sqrt();
    let lower = (center - margin) / denom;
    let upper = (center + margin) / denom;
    (lower.max(0.0), upper.min(1.0))
}

fn expected_score(elo_a: f64, elo_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((elo_b - elo_a) / 400.0))
}

/// One pairwise contest extracted from a round's judge scores: `winner` beat
/// `loser` according to one judge's numbers. Ties are not recorded.
#[derive(Debug, Clone)]
pub struct PairwiseOutcome {
    pub winner: String,
    pub loser: String,
}

/// Extract pairwise winners from one judge's score set for a round. Two
/// personas tied at the same score produce no pairwise outcome between them.
pub fn collect_pairwise_from_scores(scores: &[Score]) -> Vec<PairwiseOutcome> {
    let mut by_judge: HashMap<&str, Vec<&Score>> = HashMap::new();
    for s in scores {
        by_judge.entry(&s.judge).or_default().push(s);
    }

    let mut outcomes = Vec::new();
    for judge_scores in by_judge.values() {
        for i in 0..judge_scores.len() {
            for j in (i + 1)..judge_scores.len() {
                let a = judge_scores[i];
                let b = judge_scores[j];
                match a.score.partial_cmp(&b.score) {
                    Some(std::cmp::Ordering::Greater) => {
                        outcomes.push(PairwiseOutcome { winner: a.persona.clone(), loser: b.persona.clone() });
                    }
                    Some(std::cmp::Ordering::Less) => {
                        outcomes.push(PairwiseOutcome { winner: b.persona.clone(), loser: a.persona.clone() });
                    }
                    _ => {}
                }
            }
        }
    }
    outcomes
}

/// Apply one batch of pairwise outcomes to a ratings table, returning the
/// updated table. Callers persist the result keyed by persona name.
pub fn update_ratings(
    mut ratings: HashMap<String, PersonaRating>,
    outcomes: &[PairwiseOutcome],
) -> HashMap<String, PersonaRating> {
    for outcome in outcomes {
        let winner_rating = *ratings.entry(outcome.winner.clone()).or_default();
        let loser_rating = *ratings.entry(outcome.loser.clone()).or_default();

        let expected_winner = expected_score(winner_rating.elo, loser_rating.elo);
        let expected_loser = 1.0 - expected_winner;

        let winner_k = winner_rating.k_factor();
        let loser_k = loser_rating.k_factor();

        let new_winner_elo = winner_rating.elo + winner_k * (1.0 - expected_winner);
        let new_loser_elo = loser_rating.elo + loser_k * (0.0 - expected_loser);

        ratings.insert(
            outcome.winner.clone(),
            PersonaRating { elo: new_winner_elo, games_played: winner_rating.games_played + 1, wins: winner_rating.wins + 1 },
        );
        ratings.insert(
            outcome.loser.clone(),
            PersonaRating { elo: new_loser_elo, games_played: loser_rating.games_played + 1, wins: loser_rating.wins },
        );
    }
    ratings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn score(persona: &str, judge: &str, value: f64) -> Score {
        Score { debate_id: Uuid::new_v4(), persona: persona.into(), judge: judge.into(), score: value, rationale: String::new(), created_at: Utc::now() }
    }

    #[test]
    fn winner_gains_elo_loser_loses_elo() {
        let outcomes = vec![PairwiseOutcome { winner: "optimist".into(), loser: "risk-officer".into() }];
        let ratings = update_ratings(HashMap::new(), &outcomes);
        assert!(ratings["optimist"].elo > INITIAL_ELO);
        assert!(ratings["risk-officer"].elo < INITIAL_ELO);
    }

    #[test]
    fn novice_k_factor_applies_below_threshold() {
        let rating = PersonaRating { elo: 1500.0, games_played: 3, wins: 1 };
        assert_eq!(rating.k_factor(), K_NOVICE);
        let veteran = PersonaRating { elo: 1500.0, games_played: 20, wins: 10 };
        assert_eq!(veteran.k_factor(), K_BASE);
    }

    #[test]
    fn wilson_interval_widens_with_fewer_trials() {
        let (lo_few, hi_few) = wilson_interval(3, 5, WILSON_Z);
        let (lo_many, hi_many) = wilson_interval(30, 50, WILSON_Z);
        assert!(hi_few - lo_few > hi_many - lo_many);
    }

    #[test]
    fn tied_scores_produce_no_pairwise_outcome() {
        let scores = vec![score("optimist", "judge-a", 5.0), score("risk-officer", "judge-a", 5.0)];
        let outcomes = collect_pairwise_from_scores(&scores);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn pairwise_extraction_orders_winner_first() {
        let scores = vec![score("optimist", "judge-a", 9.0), score("risk-officer", "judge-a", 4.0)];
        let outcomes = collect_pairwise_from_scores(&scores);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winner, "optimist");
        assert_eq!(outcomes[0].loser, "risk-officer");
    }
}
