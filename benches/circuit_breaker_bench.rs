//! Circuit breaker benchmarks.
//!
//! `CircuitRegistry` sits on the hot path of every seat call (recorded once
//! per LLM response) and the router's candidate scoring pass (`is_open`
//! checked once per enabled model), so both need to stay cheap under lock
//! contention from many `(provider, model)` keys.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use debate_orchestrator::circuit::{CircuitRegistry, CircuitSettings};
use debate_orchestrator::llm::Provider;

fn populated_registry(keys: usize) -> CircuitRegistry {
    let registry = CircuitRegistry::new(CircuitSettings::default());
    for i in 0..keys {
        let model = format!("model-{i}");
        registry.record_success(Provider::OpenAi, &model);
        registry.record_success(Provider::OpenAi, &model);
    }
    registry
}

fn benchmark_record_call_result(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_record_call_result");

    for &keys in &[1usize, 16, 128] {
        let registry = populated_registry(keys);
        group.bench_with_input(BenchmarkId::from_parameter(keys), &registry, |b, registry| {
            let mut succeeded = true;
            b.iter(|| {
                registry.record_call_result(black_box(Provider::OpenAi), black_box("model-0"), black_box(succeeded));
                succeeded = !succeeded;
            });
        });
    }

    group.finish();
}

fn benchmark_is_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_is_open");

    for &keys in &[1usize, 16, 128] {
        let registry = populated_registry(keys);
        group.bench_with_input(BenchmarkId::from_parameter(keys), &registry, |b, registry| {
            b.iter(|| black_box(registry.is_open(black_box(Provider::OpenAi), black_box("model-0"))));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_record_call_result, benchmark_is_open);
criterion_main!(benches);
