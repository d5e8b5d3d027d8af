//! Weighted multi-criterion model router.
//!
//! Selects a model before stage execution: explicit override first, then
//! policy-weighted scoring over the model registry with a health penalty
//! from the provider circuit breaker.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::circuit::CircuitRegistry;
use crate::llm::Provider;

/// Cost/latency/quality/safety tiers a model is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyClass {
    Fast,
    Normal,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    Baseline,
    Advanced,
    Flagship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyProfile {
    Strict,
    Normal,
    Experimental,
}

fn cost_score(tier: CostTier) -> f64 {
    match tier {
        CostTier::Low => 1.0,
        CostTier::Medium => 0.5,
        CostTier::High => 0.1,
    }
}

fn latency_score(class: LatencyClass) -> f64 {
    match class {
        LatencyClass::Fast => 1.0,
        LatencyClass::Normal => 0.5,
        LatencyClass::Slow => 0.1,
    }
}

fn quality_score(tier: QualityTier) -> f64 {
    match tier {
        QualityTier::Baseline => 0.1,
        QualityTier::Advanced => 0.6,
        QualityTier::Flagship => 1.0,
    }
}

fn safety_score(profile: SafetyProfile) -> f64 {
    match profile {
        SafetyProfile::Strict => 1.0,
        SafetyProfile::Normal => 0.8,
        SafetyProfile::Experimental => 0.5,
    }
}

/// A concrete, selectable model in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: Provider,
    pub cost_tier: CostTier,
    pub latency_class: LatencyClass,
    pub quality_tier: QualityTier,
    pub safety_profile: SafetyProfile,
    pub tier: PlanTier,
    pub enabled: bool,
}

/// The plan tier a model belongs to, enforced by the caller against the
/// user's plan's `allowed_model_tiers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanTier {
    Standard,
    Pro,
}

/// Per-policy weights over {cost, latency, quality, safety}.
#[derive(Debug, Clone, Copy)]
pub struct PolicyWeights {
    pub cost: f64,
    pub latency: f64,
    pub quality: f64,
    pub safety: f64,
}

const ROUTER_SMART: PolicyWeights = PolicyWeights { cost: 0.3, latency: 0.2, quality: 0.4, safety: 0.1 };
const ROUTER_DEEP: PolicyWeights = PolicyWeights { cost: 0.1, latency: 0.05, quality: 0.8, safety: 0.05 };

fn weights_for_policy(policy: &str) -> PolicyWeights {
    match policy {
        "router-deep" => ROUTER_DEEP,
        _ => ROUTER_SMART,
    }
}

/// Static registry of concrete models. Meta-router aliases (`router-smart`,
/// `router-deep`) are policy names, not selectable targets, and are not
/// present here.
fn registry() -> &'static Vec<ModelInfo> {
    static REGISTRY: OnceLock<Vec<ModelInfo>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            ModelInfo {
                id: "gpt-4o".into(),
                provider: Provider::OpenAi,
                cost_tier: CostTier::Medium,
                latency_class: LatencyClass::Normal,
                quality_tier: QualityTier::Flagship,
                safety_profile: SafetyProfile::Normal,
                tier: PlanTier::Pro,
                enabled: true,
            },
            ModelInfo {
                id: "gpt-4o-mini".into(),
                provider: Provider::OpenAi,
                cost_tier: CostTier::Low,
                latency_class: LatencyClass::Fast,
                quality_tier: QualityTier::Advanced,
                safety_profile: SafetyProfile::Normal,
                tier: PlanTier::Standard,
                enabled: true,
            },
            ModelInfo {
                id: "claude-3-5-sonnet".into(),
                provider: Provider::Anthropic,
                cost_tier: CostTier::Medium,
                latency_class: LatencyClass::Normal,
                quality_tier: QualityTier::Flagship,
                safety_profile: SafetyProfile::Strict,
                tier: PlanTier::Pro,
                enabled: true,
            },
            ModelInfo {
                id: "llama-3.1-70b".into(),
                provider: Provider::Groq,
                cost_tier: CostTier::Low,
                latency_class: LatencyClass::Fast,
                quality_tier: QualityTier::Advanced,
                safety_profile: SafetyProfile::Experimental,
                tier: PlanTier::Standard,
                enabled: true,
            },
        ]
    })
}

pub fn get_model(id: &str) -> Option<&'static ModelInfo> {
    registry().iter().find(|m| m.id == id)
}

fn default_model() -> &'static ModelInfo {
    registry().iter().find(|m| m.enabled).unwrap_or(&registry()[0])
}

/// Routing inputs.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub requested_model: Option<String>,
    pub routing_policy: Option<String>,
    pub debate_type: Option<String>,
    pub estimated_tokens: Option<u32>,
    pub priority: Priority,
    pub safety_level: SafetyLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SafetyLevel {
    Strict,
    #[default]
    Normal,
    Relaxed,
}

/// A scored candidate, recorded in `routing_meta` for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDecision {
    pub model: String,
    pub total_score: f64,
    pub cost_score: f64,
    pub latency_score: f64,
    pub quality_score: f64,
    pub safety_score: f64,
    pub is_healthy: bool,
    pub reason: Option<String>,
}

/// Select the best model for a debate. Returns the chosen model id and the
/// full scored candidate list (empty for an explicit override).
pub fn choose_model(ctx: &RouteContext, circuits: &CircuitRegistry) -> (String, Vec<CandidateDecision>) {
    if let Some(ref requested) = ctx.requested_model {
        if let Some(model) = get_model(requested) {
            if model.enabled {
                return (
                    model.id.clone(),
                    vec![CandidateDecision {
                        model: model.id.clone(),
                        total_score: 1.0,
                        cost_score: 0.0,
                        latency_score: 0.0,
                        quality_score: 0.0,
                        safety_score: 0.0,
                        is_healthy: true,
                        reason: Some("explicit_override".into()),
                    }],
                );
            }
        }
    }

    let policy_name = ctx.routing_policy.as_deref().unwrap_or("router-smart");
    let weights = weights_for_policy(policy_name);

    let mut candidates: Vec<CandidateDecision> = registry()
        .iter()
        .filter(|m| m.enabled)
        .map(|model| {
            let is_healthy = !circuits.is_open(model.provider, &model.id);
            let c = cost_score(model.cost_tier);
            let l = latency_score(model.latency_class);
            let q = quality_score(model.quality_tier);
            let s = safety_score(model.safety_profile);

            let mut total = weights.cost * c + weights.latency * l + weights.quality * q + weights.safety * s;
            if !is_healthy {
                total *= 0.1;
            }

            CandidateDecision {
                model: model.id.clone(),
                total_score: total,
                cost_score: c,
                latency_score: l,
                quality_score: q,
                safety_score: s,
                is_healthy,
                reason: None,
            }
        })
        .collect();

    if candidates.is_empty() {
        return (default_model().id.clone(), Vec::new());
    }

    // Tie-break: total_score desc, healthy first, model_id asc.
    candidates.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.is_healthy.cmp(&a.is_healthy))
            .then_with(|| a.model.cmp(&b.model))
    });

    let best = candidates[0].model.clone();
    (best, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins() {
        let circuits = CircuitRegistry::new(Default::default());
        let ctx = RouteContext { requested_model: Some("gpt-4o".into()), ..Default::default() };
        let (chosen, candidates) = choose_model(&ctx, &circuits);
        assert_eq!(chosen, "gpt-4o");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason.as_deref(), Some("explicit_override"));
    }

    #[test]
    fn unknown_override_falls_back_to_policy() {
        let circuits = CircuitRegistry::new(Default::default());
        let ctx = RouteContext { requested_model: Some("nonexistent".into()), ..Default::default() };
        let (chosen, candidates) = choose_model(&ctx, &circuits);
        assert!(registry().iter().any(|m| m.id == chosen));
        assert!(!candidates.is_empty());
    }

    #[test]
    fn deep_policy_favors_quality() {
        let circuits = CircuitRegistry::new(Default::default());
        let ctx = RouteContext { routing_policy: Some("router-deep".into()), ..Default::default() };
        let (_, candidates) = choose_model(&ctx, &circuits);
        let top = &candidates[0];
        assert!(top.quality_score >= 0.6);
    }

    #[test]
    fn open_circuit_penalizes_score() {
        let circuits = CircuitRegistry::new(Default::default());
        circuits.record_error(Provider::OpenAi, "gpt-4o-mini");
        for _ in 0..20 {
            circuits.record_error(Provider::OpenAi, "gpt-4o-mini");
        }
        let ctx = RouteContext::default();
        let (_, candidates) = choose_model(&ctx, &circuits);
        let mini = candidates.iter().find(|c| c.model == "gpt-4o-mini").unwrap();
        assert!(!mini.is_healthy);
    }

    #[test]
    fn ranking_is_deterministic_regardless_of_registry_order() {
        let circuits = CircuitRegistry::new(Default::default());
        let ctx = RouteContext::default();
        let (chosen_a, _) = choose_model(&ctx, &circuits);
        let (chosen_b, _) = choose_model(&ctx, &circuits);
        assert_eq!(chosen_a, chosen_b);
    }
}
