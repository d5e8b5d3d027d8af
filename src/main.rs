//! `debate-worker` - multi-agent LLM debate orchestrator worker process.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use debate_orchestrator::config::AppConfig;
use debate_orchestrator::domain::{DebateError, DebateStatus, UsageAccumulator};
use debate_orchestrator::events::{InMemoryEventBackend, RedisEventBackend, SseBackend};
use debate_orchestrator::pipeline::{self, DebateContext};
#[cfg(feature = "postgres")]
use debate_orchestrator::store::PgStore;
use debate_orchestrator::store::{DebateStore, InMemoryStore};
use debate_orchestrator::{logging::OpTimer, Worker};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "debate-worker")]
#[command(about = "Multi-agent LLM debate orchestrator worker")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level.
    #[arg(long, global = true, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Stable identifier for this worker, used for lease ownership.
    #[arg(long, env = "RUNNER_ID")]
    runner_id: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the lease-acquisition loop and the stale-run reaper.
    Run,
    /// Replay a debate's persisted events through a fresh reducer, for
    /// debugging or audit without re-running any LLM calls.
    Replay {
        /// The debate to replay.
        debate_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    debate_orchestrator::log_banner!("debate-worker", env!("CARGO_PKG_VERSION"));

    let timer = OpTimer::new("config", "load");
    let config = AppConfig::load()?;
    timer.finish();

    let runner_id = args.runner_id.unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

    match args.command {
        Command::Run => run(config, runner_id).await,
        Command::Replay { debate_id } => replay(config, runner_id, debate_id).await,
    }
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn DebateStore>> {
    #[cfg(feature = "postgres")]
    {
        if let Some(url) = &config.database.url {
            let timer = OpTimer::new("database", "connect");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(std::time::Duration::from_secs(config.database.acquire_timeout_secs))
                .connect(url)
                .await?;
            timer.finish();
            return Ok(Arc::new(PgStore::new(pool)));
        }
    }
    tracing::warn!("no database URL configured; using an in-memory store (not durable across restarts)");
    Ok(Arc::new(InMemoryStore::new()))
}

fn build_events(config: &AppConfig) -> Arc<dyn SseBackend> {
    if let Some(url) = &config.redis.url {
        match RedisEventBackend::new(url) {
            Ok(backend) => return Arc::new(backend),
            Err(e) => tracing::error!(error = %e, "failed to connect to redis, falling back to in-memory event backend"),
        }
    }
    Arc::new(InMemoryEventBackend::new())
}

async fn run(config: AppConfig, runner_id: String) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let events = build_events(&config);
    let worker = Worker::new(config, store.clone(), events.clone(), runner_id);
    debate_orchestrator::log_success!("worker initialized: runner_id={}, providers={}", worker.runner_id, worker.clients.len());

    let cancel = CancellationToken::new();
    let reaper_handle = tokio::spawn(debate_orchestrator::reaper::run_loop(
        store.clone(),
        events.clone(),
        worker.config.orchestration.reaper_interval_secs,
        worker.config.orchestration.reaper_staleness_secs,
        worker.config.orchestration.queued_ttl_secs,
        cancel.clone(),
    ));

    resume_in_flight_debates(&worker).await?;

    let lease_handle = tokio::spawn(lease_loop(worker, cancel.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, cancelling background loops");
    cancel.cancel();
    let _ = tokio::join!(reaper_handle, lease_handle);
    tracing::info!("debate-worker shut down gracefully");
    Ok(())
}

/// Poll the store for a debate this worker can lease, run it to completion
/// (or degraded/failure), and repeat until cancelled.
async fn lease_loop(worker: Worker, cancel: CancellationToken) {
    let mut idle_backoff = tokio::time::interval(std::time::Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("lease loop cancelled");
                break;
            }
            _ = idle_backoff.tick() => {
                if let Err(e) = try_claim_and_run(&worker).await {
                    tracing::error!(error = %e, "error while claiming/running a debate");
                }
            }
        }
    }
}

async fn try_claim_and_run(worker: &Worker) -> anyhow::Result<()> {
    let Some(mut debate) = find_claimable_debate(worker).await? else {
        return Ok(());
    };

    if !worker.store.acquire_lease(debate.id, &worker.runner_id, worker.config.orchestration.lease_duration_secs).await? {
        return Ok(());
    }

    if let Some(user_id) = debate.owner_user_id.clone() {
        if let Err(e) = check_user_quota(worker, &user_id) {
            tracing::warn!(debate_id = %debate.id, user_id = %user_id, error = %e, "quota exceeded, releasing lease for a later retry");
            worker.store.release_lease(debate.id, &worker.runner_id).await?;
            worker
                .store
                .record_error(&DebateError {
                    debate_id: debate.id,
                    reason: "quota_exceeded".into(),
                    occurred_at: chrono::Utc::now(),
                    age_seconds: 0,
                    detail: Some(e.to_string()),
                })
                .await?;
            return Ok(());
        }
    }

    if debate.routed_model.is_none() {
        let route_ctx = debate_orchestrator::router::RouteContext { debate_type: Some(format!("{:?}", debate.mode)), ..Default::default() };
        let (model, candidates) = debate_orchestrator::router::choose_model(&route_ctx, &worker.circuits);
        let policy = route_ctx.routing_policy.clone().unwrap_or_else(|| "default".into());
        debate.routed_model = Some(model);
        debate.routing_policy = Some(policy.clone());
        debate.routing_meta = Some(debate_orchestrator::domain::RoutingMeta { candidates, policy });
        worker.store.update_debate(&debate).await?;
    }

    let all_seats: Vec<_> = debate.panel_config.seats.iter().chain(debate.panel_config.judges.iter()).cloned().collect();
    let clients = pipeline::seat_clients_for(&worker.clients, &all_seats);

    let mut ctx = DebateContext {
        debate,
        clients,
        circuits: worker.circuits.clone(),
        store: worker.store.clone(),
        events: worker.events.clone(),
        usage: Arc::new(UsageAccumulator::new()),
        retry_policy: worker.retry_policy,
    };

    let debate_id = ctx.debate.id;
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        worker.store.clone(),
        worker.runner_id.clone(),
        debate_id,
        worker.config.orchestration.lease_duration_secs,
        worker.config.orchestration.heartbeat_interval_secs,
        heartbeat_cancel.clone(),
    ));

    let result = pipeline::run_pipeline(&mut ctx).await;

    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;
    worker.store.release_lease(debate_id, &worker.runner_id).await?;

    if let Some(user_id) = &ctx.debate.owner_user_id {
        worker.usage_counter.record_token_usage(user_id, ctx.usage.total_tokens());
    }

    match result {
        Ok(()) => {
            tracing::info!(debate_id = %debate_id, status = ?ctx.debate.status, "debate finished");
            worker.store.update_debate(&ctx.debate).await?;
        }
        Err(e) => {
            tracing::error!(debate_id = %debate_id, error = %e, "debate run errored");
            ctx.debate.status = DebateStatus::Failed;
            worker.store.update_debate(&ctx.debate).await?;
        }
    }
    Ok(())
}

/// Refresh a debate's lease every `interval_secs` while its pipeline runs,
/// so a debate that outlives `lease_duration_secs` is not reaped mid-run.
/// Stops on cancellation or as soon as the lease is found to be lost.
async fn heartbeat_loop(
    store: Arc<dyn DebateStore>,
    runner_id: String,
    debate_id: Uuid,
    lease_duration_secs: i64,
    interval_secs: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match store.heartbeat_lease(debate_id, &runner_id, lease_duration_secs).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(debate_id = %debate_id, runner_id = %runner_id, "lease lost, stopping heartbeat");
                        break;
                    }
                    Err(e) => tracing::error!(debate_id = %debate_id, error = %e, "lease heartbeat failed"),
                }
            }
        }
    }
}

/// On startup, salvage debates left `running` by a worker that crashed
/// before its lease expired naturally: rather than wait for the reaper's
/// next tick, sweep them immediately so a recorded checkpoint can resume
/// them right away.
async fn resume_in_flight_debates(worker: &Worker) -> anyhow::Result<()> {
    let in_flight = worker.store.find_stale_debates(0).await?;
    for debate in &in_flight {
        match worker.store.get_checkpoint(debate.id).await? {
            Some(cp) => {
                tracing::info!(debate_id = %debate.id, step = %cp.step, step_index = cp.step_index, "in-flight debate found on startup, will resume from checkpoint")
            }
            None => tracing::info!(debate_id = %debate.id, "in-flight debate found on startup with no checkpoint, will restart from the first stage"),
        }
    }
    let outcomes = debate_orchestrator::reaper::sweep(worker.store.as_ref(), worker.events.as_ref(), 0, worker.config.orchestration.queued_ttl_secs).await?;
    if !outcomes.is_empty() {
        tracing::info!(count = outcomes.len(), "requeued in-flight debates for resumption on startup");
    }
    Ok(())
}

/// Reserve this run against the owning user's hour/day run quota and check
/// their daily token headroom, before the debate is routed to a provider.
fn check_user_quota(worker: &Worker, user_id: &str) -> Result<(), debate_orchestrator::quota::RateLimitError> {
    worker.usage_counter.reserve_run_slot(user_id)?;
    worker.usage_counter.ensure_daily_token_headroom(user_id)
}

/// The worker's dispatch policy: take the oldest queued debate. Queue
/// priority beyond FIFO is deliberately out of scope; `acquire_lease`'s
/// atomic `WHERE` clause is what actually arbitrates when multiple workers
/// race for the same debate.
async fn find_claimable_debate(worker: &Worker) -> anyhow::Result<Option<debate_orchestrator::domain::Debate>> {
    let mut candidates = worker.store.find_queued_debates(1).await?;
    Ok(candidates.pop())
}

/// Replay a debate's persisted messages/scores/votes through a fresh copy
/// of the ranking reducer, for debugging or audit without re-running any
/// LLM calls. A correctly-durable pipeline is idempotent in this sense:
/// recomputing rankings from the persisted scores reproduces the rankings
/// recorded in the persisted `Vote`, and a resumed run's checkpoint always
/// names the last stage that actually finished.
async fn replay(config: AppConfig, runner_id: String, debate_id: Uuid) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let Some(debate) = store.get_debate(debate_id).await? else {
        anyhow::bail!("no such debate: {debate_id}");
    };

    let messages = store.get_messages(debate_id).await?;
    let scores = store.get_scores(debate_id).await?;
    let votes = store.get_votes(debate_id).await?;
    let checkpoint = store.get_checkpoint(debate_id).await?;

    tracing::info!(debate_id = %debate_id, runner_id = %runner_id, status = ?debate.status, "replaying debate");
    for message in &messages {
        println!("[round {}] {} ({:?}): {}", message.round_index, message.persona, message.role, message.content);
    }
    for score in &scores {
        println!("score: {} scored by {} = {}", score.persona, score.judge, score.score);
    }

    if let Some(cp) = &checkpoint {
        println!("--- checkpoint --- last completed stage: {} (step_index {})", cp.step, cp.step_index);
        if !debate.status.is_terminal() {
            println!("debate is not terminal; a worker would resume at stage index {}", cp.step_index + 1);
        }
    }

    let recomputed = debate_orchestrator::ranking::compute_rankings(&scores);
    for vote in &votes {
        let recomputed_order: Vec<String> = recomputed.iter().map(|r| r.persona.clone()).collect();
        if recomputed_order == vote.rankings {
            println!("vote {} ({}): rankings reproduce from persisted scores", vote.created_at, vote.method);
        } else {
            tracing::warn!(debate_id = %debate_id, "recomputed rankings diverge from persisted vote; scores may have changed since the vote was cast");
            println!("vote {} ({}): rankings DO NOT reproduce from persisted scores: recorded {:?}, recomputed {:?}", vote.created_at, vote.method, vote.rankings, recomputed_order);
        }
    }

    if let Some(content) = &debate.final_content {
        println!("--- final ---\n{content}");
    }
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("received SIGTERM, shutting down..."),
    }
}
