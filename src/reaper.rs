//! Stale-run reaper: periodically sweeps for debates whose worker lease
//! expired without a terminal status and either requeues them for another
//! worker or marks them failed once they've been retried too many times.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::{DebateError, DebateStatus};
use crate::events::{DebateEvent, SseBackend};
use crate::store::DebateStore;

/// Maximum number of times a stale debate is handed back to the queue
/// before the reaper gives up and marks it failed outright.
const MAX_REQUEUE_ATTEMPTS: i32 = 3;

/// One sweep outcome, returned for logging/testing rather than side-effected
/// silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Requeued,
    Failed,
    Degraded,
}

/// A stalled run that already produced partial output — a persisted `Vote`
/// or a non-empty `final_content` — is salvaged as `degraded` rather than
/// thrown away by a requeue (which would re-run seats from scratch) or a
/// failure (which would discard usable output).
async fn has_partial_output(store: &dyn DebateStore, debate: &crate::domain::Debate) -> anyhow::Result<bool> {
    if debate.final_content.as_ref().is_some_and(|c| !c.is_empty()) {
        return Ok(true);
    }
    Ok(!store.get_votes(debate.id).await?.is_empty())
}

/// Run a single sweep over stale debates: leased-and-abandoned runs are
/// salvaged as `degraded` if they already produced output, requeued if they
/// haven't exceeded [`MAX_REQUEUE_ATTEMPTS`], or marked `Failed` past that;
/// queued debates nobody ever claimed within `queued_ttl_secs` are marked
/// `Failed` outright since there is nothing to salvage.
pub async fn sweep(
    store: &dyn DebateStore,
    events: &dyn SseBackend,
    stale_after_secs: i64,
    queued_ttl_secs: i64,
) -> anyhow::Result<Vec<(uuid::Uuid, ReapOutcome)>> {
    let stale = store.find_stale_debates(stale_after_secs).await?;
    let mut outcomes = Vec::with_capacity(stale.len());

    for mut debate in stale {
        let debate_id = debate.id;
        let lost_runner = debate.runner_id.clone();

        if has_partial_output(store, &debate).await? {
            debate.status = DebateStatus::Degraded;
            debate.runner_id = None;
            debate.lease_expires_at = None;
            debate.updated_at = Utc::now();
            store.update_debate(&debate).await?;
            store
                .record_error(&DebateError {
                    debate_id,
                    reason: "stale_run_salvaged_degraded".into(),
                    occurred_at: Utc::now(),
                    age_seconds: stale_after_secs,
                    detail: lost_runner.map(|r| format!("last runner: {r}")),
                })
                .await?;
            events.publish(debate_id, DebateEvent::Notice { message: "run stalled with partial output, marked degraded".into() }).await?;
            outcomes.push((debate_id, ReapOutcome::Degraded));
        } else if debate.run_attempt >= MAX_REQUEUE_ATTEMPTS {
            debate.status = DebateStatus::Failed;
            debate.runner_id = None;
            debate.lease_expires_at = None;
            debate.updated_at = Utc::now();
            store.update_debate(&debate).await?;
            store
                .record_error(&DebateError {
                    debate_id,
                    reason: "stale_run_exhausted_retries".into(),
                    occurred_at: Utc::now(),
                    age_seconds: stale_after_secs,
                    detail: lost_runner.map(|r| format!("last runner: {r}")),
                })
                .await?;
            events.publish(debate_id, DebateEvent::DebateFailed { reason: "stale_run_exhausted_retries".into() }).await?;
            outcomes.push((debate_id, ReapOutcome::Failed));
        } else {
            debate.status = DebateStatus::Queued;
            debate.runner_id = None;
            debate.lease_expires_at = None;
            debate.run_attempt += 1;
            debate.updated_at = Utc::now();
            store.update_debate(&debate).await?;
            store
                .record_error(&DebateError {
                    debate_id,
                    reason: "stale_run_requeued".into(),
                    occurred_at: Utc::now(),
                    age_seconds: stale_after_secs,
                    detail: lost_runner.map(|r| format!("last runner: {r}")),
                })
                .await?;
            events.publish(debate_id, DebateEvent::Notice { message: "run stalled, requeued for another worker".into() }).await?;
            outcomes.push((debate_id, ReapOutcome::Requeued));
        }
    }

    for mut debate in store.find_stale_queued_debates(queued_ttl_secs).await? {
        let debate_id = debate.id;
        debate.status = DebateStatus::Failed;
        debate.updated_at = Utc::now();
        store.update_debate(&debate).await?;
        store
            .record_error(&DebateError {
                debate_id,
                reason: "queued_ttl_exceeded".into(),
                occurred_at: Utc::now(),
                age_seconds: queued_ttl_secs,
                detail: None,
            })
            .await?;
        events.publish(debate_id, DebateEvent::DebateFailed { reason: "queued_ttl_exceeded".into() }).await?;
        outcomes.push((debate_id, ReapOutcome::Failed));
    }

    Ok(outcomes)
}

/// Run [`sweep`] on a fixed interval until `cancel` fires.
///
/// Sweep errors are logged and do not stop the loop; a transient database
/// hiccup on one tick should not take the reaper down.
pub async fn run_loop(
    store: Arc<dyn DebateStore>,
    events: Arc<dyn SseBackend>,
    interval_secs: u64,
    stale_after_secs: i64,
    queued_ttl_secs: i64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("reaper loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                match sweep(store.as_ref(), events.as_ref(), stale_after_secs, queued_ttl_secs).await {
                    Ok(outcomes) if !outcomes.is_empty() => {
                        tracing::warn!(count = outcomes.len(), "reaper swept stale debates");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "reaper sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Debate, DebateMode, PanelConfig, PanelTolerance};
    use crate::events::InMemoryEventBackend;
    use crate::store::InMemoryStore;

    fn debate() -> Debate {
        Debate::new("Should we adopt AI?", DebateMode::Debate, PanelConfig { seats: vec![], tolerance: PanelTolerance::default(), judges: vec![] })
    }

    #[tokio::test]
    async fn stale_debate_under_retry_limit_is_requeued() {
        let store = InMemoryStore::new();
        let events = InMemoryEventBackend::new();
        let mut d = debate();
        store.create_debate(&d).await.unwrap();
        store.acquire_lease(d.id, "worker-a", -1).await.unwrap();
        d = store.get_debate(d.id).await.unwrap().unwrap();
        // Force the debate stale: lease already expired and last touched long ago.
        let mut stale = d.clone();
        stale.updated_at = Utc::now() - chrono::Duration::seconds(600);
        store.update_debate(&stale).await.unwrap();

        let outcomes = sweep(&store, &events, 120, 3600).await.unwrap();
        assert_eq!(outcomes, vec![(d.id, ReapOutcome::Requeued)]);

        let after = store.get_debate(d.id).await.unwrap().unwrap();
        assert_eq!(after.status, DebateStatus::Queued);
        assert!(after.runner_id.is_none());
        assert_eq!(after.run_attempt, 1);
    }

    #[tokio::test]
    async fn debate_past_retry_limit_is_marked_failed() {
        let store = InMemoryStore::new();
        let events = InMemoryEventBackend::new();
        let mut d = debate();
        d.run_attempt = MAX_REQUEUE_ATTEMPTS;
        store.create_debate(&d).await.unwrap();
        store.acquire_lease(d.id, "worker-a", -1).await.unwrap();
        let mut stale = store.get_debate(d.id).await.unwrap().unwrap();
        stale.updated_at = Utc::now() - chrono::Duration::seconds(600);
        store.update_debate(&stale).await.unwrap();

        let outcomes = sweep(&store, &events, 120, 3600).await.unwrap();
        assert_eq!(outcomes, vec![(d.id, ReapOutcome::Failed)]);

        let after = store.get_debate(d.id).await.unwrap().unwrap();
        assert_eq!(after.status, DebateStatus::Failed);
    }

    #[tokio::test]
    async fn healthy_running_debate_is_left_alone() {
        let store = InMemoryStore::new();
        let events = InMemoryEventBackend::new();
        let d = debate();
        store.create_debate(&d).await.unwrap();
        store.acquire_lease(d.id, "worker-a", 60).await.unwrap();

        let outcomes = sweep(&store, &events, 120, 3600).await.unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn stale_debate_with_partial_output_is_degraded_not_requeued() {
        let store = InMemoryStore::new();
        let events = InMemoryEventBackend::new();
        let mut d = debate();
        d.final_content = Some("best answer so far".into());
        store.create_debate(&d).await.unwrap();
        store.acquire_lease(d.id, "worker-a", -1).await.unwrap();
        let mut stale = store.get_debate(d.id).await.unwrap().unwrap();
        stale.updated_at = Utc::now() - chrono::Duration::seconds(600);
        store.update_debate(&stale).await.unwrap();

        let outcomes = sweep(&store, &events, 120, 3600).await.unwrap();
        assert_eq!(outcomes, vec![(d.id, ReapOutcome::Degraded)]);

        let after = store.get_debate(d.id).await.unwrap().unwrap();
        assert_eq!(after.status, DebateStatus::Degraded);
    }

    #[tokio::test]
    async fn debate_queued_past_ttl_is_marked_failed() {
        let store = InMemoryStore::new();
        let events = InMemoryEventBackend::new();
        let mut d = debate();
        d.created_at = Utc::now() - chrono::Duration::seconds(7200);
        d.updated_at = d.created_at;
        store.create_debate(&d).await.unwrap();

        let outcomes = sweep(&store, &events, 120, 3600).await.unwrap();
        assert_eq!(outcomes, vec![(d.id, ReapOutcome::Failed)]);

        let after = store.get_debate(d.id).await.unwrap().unwrap();
        assert_eq!(after.status, DebateStatus::Failed);
    }
}
