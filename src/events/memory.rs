//! Single-process SSE backend: a bounded, drop-oldest queue per channel.
//!
//! Deliberately not `tokio::sync::broadcast`: broadcast drops from a lagging
//! *receiver's* perspective (it errors that receiver with `Lagged`), whereas
//! a debate's published history should drop from the *publisher's* oldest
//! end so every new subscriber still sees the most recent state.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{DebateEvent, EventEnvelope, SseBackend};

const MAX_QUEUE_LEN: usize = 512;
const CHANNEL_TTL_SECS: u64 = 3600;

struct Channel {
    events: VecDeque<EventEnvelope>,
    next_seq: u64,
    last_touched: Instant,
    closed: bool,
}

impl Channel {
    fn new() -> Self {
        Self { events: VecDeque::new(), next_seq: 0, last_touched: Instant::now(), closed: false }
    }

    fn push(&mut self, debate_id: Uuid, event: DebateEvent) {
        self.last_touched = Instant::now();
        self.closed = event.is_terminal();
        let envelope = EventEnvelope { debate_id, seq: self.next_seq, occurred_at: Utc::now(), event };
        self.next_seq += 1;
        if self.events.len() >= MAX_QUEUE_LEN {
            self.events.pop_front();
        }
        self.events.push_back(envelope);
    }
}

/// In-process event backend. Used for single-worker deployments and tests.
#[derive(Default)]
pub struct InMemoryEventBackend {
    channels: Mutex<HashMap<Uuid, Channel>>,
}

impl InMemoryEventBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove channels that have been idle past the TTL and were never
    /// closed with a terminal event. Call periodically from a sweeper task.
    pub fn sweep_idle(&self) {
        let mut channels = self.channels.lock();
        channels.retain(|_, c| c.last_touched.elapsed().as_secs() < CHANNEL_TTL_SECS);
    }
}

#[async_trait]
impl SseBackend for InMemoryEventBackend {
    async fn create_channel(&self, debate_id: Uuid) {
        self.channels.lock().entry(debate_id).or_insert_with(Channel::new);
    }

    async fn publish(&self, debate_id: Uuid, event: DebateEvent) -> anyhow::Result<()> {
        let mut channels = self.channels.lock();
        let channel = channels.entry(debate_id).or_insert_with(Channel::new);
        channel.push(debate_id, event);
        Ok(())
    }

    async fn subscribe(&self, debate_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>> {
        let channels = self.channels.lock();
        Ok(channels.get(&debate_id).map(|c| c.events.iter().cloned().collect()).unwrap_or_default())
    }

    async fn cleanup(&self, debate_id: Uuid) {
        self.channels.lock().remove(&debate_id);
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oldest_events_are_dropped_once_queue_is_full() {
        let backend = InMemoryEventBackend::new();
        let id = Uuid::new_v4();
        backend.create_channel(id).await;
        for i in 0..(MAX_QUEUE_LEN + 10) {
            backend.publish(id, DebateEvent::Notice { message: format!("n{i}") }).await.unwrap();
        }
        let events = backend.subscribe(id).await.unwrap();
        assert_eq!(events.len(), MAX_QUEUE_LEN);
        let DebateEvent::Notice { message } = &events[0].event else { panic!("expected notice") };
        assert_eq!(message, "n10");
    }

    #[tokio::test]
    async fn terminal_event_closes_the_channel() {
        let backend = InMemoryEventBackend::new();
        let id = Uuid::new_v4();
        backend.create_channel(id).await;
        backend.publish(id, DebateEvent::Final { content: "done".into() }).await.unwrap();
        let channels = backend.channels.lock();
        assert!(channels.get(&id).unwrap().closed);
    }

    #[tokio::test]
    async fn cleanup_removes_the_channel() {
        let backend = InMemoryEventBackend::new();
        let id = Uuid::new_v4();
        backend.create_channel(id).await;
        backend.cleanup(id).await;
        let events = backend.subscribe(id).await.unwrap();
        assert!(events.is_empty());
    }
}
