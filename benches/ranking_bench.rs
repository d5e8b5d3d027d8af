//! Ranking fusion benchmarks.
//!
//! Measures `compute_rankings` over panels of varying size, since Borda
//! aggregation and the pairwise Condorcet pass are both O(n^2) per judge.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use debate_orchestrator::domain::Score;
use debate_orchestrator::ranking::compute_rankings;
use uuid::Uuid;

fn scores_for(personas: usize, judges: usize) -> Vec<Score> {
    let debate_id = Uuid::new_v4();
    let mut scores = Vec::with_capacity(personas * judges);
    for j in 0..judges {
        for p in 0..personas {
            scores.push(Score {
                debate_id,
                persona: format!("persona-{p}"),
                judge: format!("judge-{j}"),
                score: ((p * 7 + j * 3) % 11) as f64,
                rationale: String::new(),
                created_at: Utc::now(),
            });
        }
    }
    scores
}

fn benchmark_panel_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_rankings_by_panel_size");

    for &personas in &[4usize, 8, 16, 32] {
        let scores = scores_for(personas, 3);
        group.bench_with_input(BenchmarkId::from_parameter(personas), &scores, |b, scores| {
            b.iter(|| black_box(compute_rankings(black_box(scores))));
        });
    }

    group.finish();
}

fn benchmark_judge_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_rankings_by_judge_count");

    for &judges in &[1usize, 3, 5, 10] {
        let scores = scores_for(6, judges);
        group.bench_with_input(BenchmarkId::from_parameter(judges), &scores, |b, scores| {
            b.iter(|| black_box(compute_rankings(black_box(scores))));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_panel_sizes, benchmark_judge_count);
criterion_main!(benches);
