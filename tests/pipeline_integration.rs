//! End-to-end scenarios over the full stage dispatcher, store, and event
//! backend -- no real network calls, a scripted `LlmClient` stands in for
//! every provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use debate_orchestrator::circuit::CircuitRegistry;
use debate_orchestrator::domain::{
    BudgetConfig, Debate, DebateMode, DebateStatus, PanelConfig, PanelTolerance, RoleProfile, Seat, UsageAccumulator,
};
use debate_orchestrator::events::{InMemoryEventBackend, SseBackend};
use debate_orchestrator::llm::{LlmCallError, LlmClient, Provider, SeatRequest, SeatResponse, Usage};
use debate_orchestrator::pipeline::{self, DebateContext};
use debate_orchestrator::quota::{IpRateLimiter, RateLimitError, UsageCounter, UserQuota};
use debate_orchestrator::reaper;
use debate_orchestrator::seat::RetryPolicy;
use debate_orchestrator::store::{DebateStore, InMemoryStore};

/// An `LlmClient` that always answers with a fixed envelope, or always
/// errors, depending on how the test wires it up.
struct ScriptedClient {
    provider: Provider,
    content: Mutex<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn ok(provider: Provider, content: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { provider, content: Mutex::new(content.into()), fail: false, calls: AtomicUsize::new(0) })
    }

    fn failing(provider: Provider) -> Arc<Self> {
        Arc::new(Self { provider, content: Mutex::new(String::new()), fail: true, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn call(&self, _req: SeatRequest) -> Result<(SeatResponse, Usage), LlmCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LlmCallError::Http { status: 500, body: "boom".into() });
        }
        let content = self.content.lock().clone();
        Ok((SeatResponse { content }, Usage { prompt_tokens: 10, completion_tokens: 10, total_tokens: 20, cost_usd: Some(0.001) }))
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

fn seat(seat_id: &str, role: RoleProfile) -> Seat {
    Seat { seat_id: seat_id.into(), display_name: seat_id.into(), provider_key: Provider::OpenAi, model: "gpt-4o".into(), role_profile: role, temperature: 0.7 }
}

fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 1, initial_delay: Duration::from_millis(1), max_delay: Duration::from_millis(1) }
}

fn envelope(content: &str) -> String {
    format!(r#"{{"content": "{content}"}}"#)
}

fn verdict(scores: &[(&str, f64)]) -> String {
    let entries: Vec<String> = scores.iter().map(|(p, s)| format!(r#"{{"persona": "{p}", "score": {s}, "rationale": "ok"}}"#)).collect();
    format!("[{}]", entries.join(", "))
}

fn context(debate: Debate, clients: HashMap<String, Arc<dyn LlmClient>>, store: Arc<dyn DebateStore>) -> DebateContext {
    DebateContext {
        debate,
        clients,
        circuits: Arc::new(CircuitRegistry::new(Default::default())),
        store,
        events: Arc::new(InMemoryEventBackend::new()),
        usage: Arc::new(UsageAccumulator::new()),
        retry_policy: fast_retry_policy(),
    }
}

#[tokio::test]
async fn happy_path_debate_completes_with_ranked_synthesis() {
    let optimist = seat("optimist", RoleProfile::Optimist);
    let risk_officer = seat("risk_officer", RoleProfile::RiskOfficer);
    let synthesizer = seat("synthesizer", RoleProfile::Synthesizer);
    let judge = seat("judge_alpha", RoleProfile::Judge);

    let panel = PanelConfig {
        seats: vec![optimist.clone(), risk_officer.clone(), synthesizer.clone()],
        tolerance: PanelTolerance::default(),
        judges: vec![judge.clone()],
    };
    let debate = Debate::new("Should we adopt AI?", DebateMode::Debate, panel);
    let debate_id = debate.id;

    let mut clients: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
    clients.insert("optimist".into(), ScriptedClient::ok(Provider::OpenAi, envelope("AI is a net positive")));
    clients.insert("risk_officer".into(), ScriptedClient::ok(Provider::OpenAi, envelope("AI carries real risk")));
    clients.insert("synthesizer".into(), ScriptedClient::ok(Provider::OpenAi, envelope("final synthesized answer")));
    clients.insert(
        "judge_alpha".into(),
        ScriptedClient::ok(Provider::OpenAi, verdict(&[("optimist", 9.0), ("risk_officer", 6.0), ("synthesizer", 7.0)])),
    );

    let store: Arc<dyn DebateStore> = Arc::new(InMemoryStore::new());
    store.create_debate(&debate).await.unwrap();

    let mut ctx = context(debate, clients, store.clone());
    pipeline::run_pipeline(&mut ctx).await.unwrap();

    assert_eq!(ctx.debate.status, DebateStatus::Completed);
    assert_eq!(ctx.debate.final_content.as_deref(), Some("final synthesized answer"));

    let messages = store.get_messages(debate_id).await.unwrap();
    assert!(messages.iter().any(|m| m.persona == "optimist"));
    let scores = store.get_scores(debate_id).await.unwrap();
    assert_eq!(scores.len(), 3);

    let ratings = store.get_ratings(&["optimist".into(), "risk_officer".into(), "synthesizer".into()]).await.unwrap();
    assert!(ratings["optimist"].elo > ratings["risk_officer"].elo);

    let votes = store.get_votes(debate_id).await.unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].rankings.len(), 3);
    assert_eq!(votes[0].rankings[0], "optimist");

    let checkpoint = store.get_checkpoint(debate_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, DebateStatus::Running);
    assert!(checkpoint.step_index >= 3, "checkpoint should have advanced through every stage, including synthesis");
}

#[tokio::test]
async fn a_minority_seat_failure_stays_within_tolerance() {
    let optimist = seat("optimist", RoleProfile::Optimist);
    let risk_officer = seat("risk_officer", RoleProfile::RiskOfficer);
    let architect = seat("architect", RoleProfile::Architect);
    let judge = seat("judge_alpha", RoleProfile::Judge);

    let panel = PanelConfig {
        seats: vec![optimist, risk_officer, architect],
        tolerance: PanelTolerance { min_required_seats: 1, max_seat_fail_ratio: 0.5 },
        judges: vec![judge],
    };
    let debate = Debate::new("Should we adopt AI?", DebateMode::Debate, panel);

    let mut clients: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
    clients.insert("optimist".into(), ScriptedClient::ok(Provider::OpenAi, envelope("yes")));
    clients.insert("risk_officer".into(), ScriptedClient::failing(Provider::OpenAi));
    clients.insert("architect".into(), ScriptedClient::ok(Provider::OpenAi, envelope("structurally sound")));
    clients.insert("judge_alpha".into(), ScriptedClient::ok(Provider::OpenAi, verdict(&[("optimist", 8.0), ("architect", 7.0)])));

    let store: Arc<dyn DebateStore> = Arc::new(InMemoryStore::new());
    store.create_debate(&debate).await.unwrap();

    let mut ctx = context(debate, clients, store);
    pipeline::run_pipeline(&mut ctx).await.unwrap();

    // No synthesizer seat configured, so synthesis falls back to the
    // top-ranked persona's own content -- the debate still completes, but
    // the tolerated failure is still recorded for the caller to see.
    assert_eq!(ctx.debate.status, DebateStatus::Completed);
    assert_eq!(ctx.debate.final_meta.unwrap().failed_seats, vec!["risk_officer".to_string()]);
}

#[tokio::test]
async fn all_seats_failing_the_opening_round_is_fatal() {
    let optimist = seat("optimist", RoleProfile::Optimist);
    let risk_officer = seat("risk_officer", RoleProfile::RiskOfficer);
    let panel = PanelConfig { seats: vec![optimist, risk_officer], tolerance: PanelTolerance::default(), judges: vec![] };
    let debate = Debate::new("Should we adopt AI?", DebateMode::Debate, panel);

    let mut clients: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
    clients.insert("optimist".into(), ScriptedClient::failing(Provider::OpenAi));
    clients.insert("risk_officer".into(), ScriptedClient::failing(Provider::OpenAi));

    let store: Arc<dyn DebateStore> = Arc::new(InMemoryStore::new());
    store.create_debate(&debate).await.unwrap();

    let mut ctx = context(debate, clients, store);
    pipeline::run_pipeline(&mut ctx).await.unwrap();

    assert_eq!(ctx.debate.status, DebateStatus::Failed);
    let meta = ctx.debate.final_meta.unwrap();
    assert_eq!(meta.error.as_deref(), Some("all_seats_failed"));
    assert_eq!(meta.failed_seats.len(), 2);
}

#[tokio::test]
async fn zero_token_budget_finishes_degraded_without_calling_any_seat() {
    let optimist = seat("optimist", RoleProfile::Optimist);
    let panel = PanelConfig { seats: vec![optimist], tolerance: PanelTolerance::default(), judges: vec![] };
    let mut debate = Debate::new("Should we adopt AI?", DebateMode::Debate, panel);
    debate.budget = BudgetConfig { max_tokens: Some(0), max_cost_usd: None, early_stop_delta: None };

    let client = ScriptedClient::ok(Provider::OpenAi, envelope("should never be called"));
    let mut clients: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
    clients.insert("optimist".into(), client.clone());

    let store: Arc<dyn DebateStore> = Arc::new(InMemoryStore::new());
    store.create_debate(&debate).await.unwrap();

    let mut ctx = context(debate, clients, store);
    pipeline::run_pipeline(&mut ctx).await.unwrap();

    assert_eq!(ctx.debate.status, DebateStatus::Degraded);
    assert_eq!(ctx.debate.final_meta.unwrap().truncate_reason.as_deref(), Some("token_budget_exceeded"));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_lease_takeover_requeues_then_becomes_claimable_again() {
    let panel = PanelConfig { seats: vec![], tolerance: PanelTolerance::default(), judges: vec![] };
    let debate = Debate::new("Should we adopt AI?", DebateMode::Debate, panel);
    let debate_id = debate.id;

    let store = InMemoryStore::new();
    let events = InMemoryEventBackend::new();
    store.create_debate(&debate).await.unwrap();

    // Fresh debate is claimable.
    assert_eq!(store.find_queued_debates(10).await.unwrap().len(), 1);

    // Worker A claims it, then dies without heartbeating -- lease expires
    // immediately and the debate drops off the queue while "running".
    assert!(store.acquire_lease(debate_id, "worker-a", -1).await.unwrap());
    assert!(store.find_queued_debates(10).await.unwrap().is_empty());

    let mut stale = store.get_debate(debate_id).await.unwrap().unwrap();
    stale.updated_at = chrono::Utc::now() - chrono::Duration::seconds(600);
    store.update_debate(&stale).await.unwrap();

    let outcomes = reaper::sweep(&store, &events, 120, 3600).await.unwrap();
    assert_eq!(outcomes, vec![(debate_id, reaper::ReapOutcome::Requeued)]);

    // Requeued debate is claimable by another worker.
    let requeued = store.find_queued_debates(10).await.unwrap();
    assert_eq!(requeued.len(), 1);
    assert!(store.acquire_lease(debate_id, "worker-b", 60).await.unwrap());
}

#[tokio::test]
async fn rate_limiting_denies_before_quota_exhausted_user_retries() {
    let ip_limiter = IpRateLimiter::new(60, 1);
    let ip: std::net::IpAddr = "127.0.0.1".parse().unwrap();
    assert!(ip_limiter.check(ip));
    assert!(!ip_limiter.check(ip), "burst of 1 should throttle the second request from the same IP");

    let counter = UsageCounter::new(UserQuota { max_runs_per_hour: 1, max_runs_per_day: 100, max_tokens_per_day: 1_000_000 });
    assert!(counter.reserve_run_slot("alice").is_ok());
    assert!(matches!(counter.reserve_run_slot("alice"), Err(RateLimitError::RunQuotaExceeded { window: "hour", .. })));

    // A different user is unaffected by alice's exhausted quota.
    assert!(counter.reserve_run_slot("bob").is_ok());
}
