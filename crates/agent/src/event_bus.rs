//! Broadcast hub for `AgentEvent`s (spec §6 UI events).
//!
//! `AgenticLoop::execute` never talks to a UI directly — it publishes to an
//! `EventBus`, which fans each event out to a `tokio::sync::broadcast`
//! channel (for callers that want a `Stream`-like receiver) and to any
//! number of registered `EventObserver`s (for callers that want a push
//! callback instead, e.g. persisting events or forwarding them over a
//! websocket).

use crate::events::{AgentEvent, AgentEventKind, EventObserver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::broadcast;
use tokio::task;
use tokio::task::JoinSet;

const EVENT_BUS_BUFFER: usize = 1024;

pub type ObserverToken = u64;

type ObserverList = Vec<(ObserverToken, Arc<dyn EventObserver>)>;

pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
    observers: Arc<Mutex<ObserverList>>,
    sequence: AtomicU64,
    observer_sequence: AtomicU64,
    observer_tasks: Arc<TokioMutex<JoinSet<()>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_BUFFER);
        Self {
            sender,
            observers: Arc::new(Mutex::new(Vec::new())),
            sequence: AtomicU64::new(1),
            observer_sequence: AtomicU64::new(1),
            observer_tasks: Arc::new(TokioMutex::new(JoinSet::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverToken {
        let token = self.observer_sequence.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((token, observer));
        token
    }

    pub fn add_observers(&self, observers: Vec<Arc<dyn EventObserver>>) {
        let mut current = self.observers.lock();
        for observer in observers {
            let token = self.observer_sequence.fetch_add(1, Ordering::Relaxed);
            current.push((token, observer));
        }
    }

    /// Returns `true` when an observer was actually removed.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(t, _)| *t != token);
        before != observers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn publish(&self, session_id: &str, kind: AgentEventKind) {
        let event = self.build_event(session_id, kind);
        self.publish_raw(event);
    }

    /// Publish a fully materialized event without touching seq/timestamp —
    /// used when replaying or forwarding events from elsewhere.
    pub fn publish_raw(&self, event: AgentEvent) {
        self.bump_sequence_after_raw(event.seq);
        self.dispatch_event(event);
    }

    /// Drain and abort all pending observer tasks.
    pub async fn shutdown(&self) {
        log::debug!("EventBus: shutting down, aborting pending observer tasks");
        let mut tasks = self.observer_tasks.lock().await;
        tasks.shutdown().await;
    }

    fn dispatch_event(&self, event: AgentEvent) {
        let _ = self.sender.send(event.clone());

        let observers = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect::<Vec<_>>();

        let tasks = self.observer_tasks.clone();
        task::spawn(async move {
            let mut tasks_guard = tasks.lock().await;
            for observer in observers {
                let observer = Arc::clone(&observer);
                let event = event.clone();
                tasks_guard.spawn(async move {
                    if let Err(err) = observer.on_event(&event).await {
                        log::error!(
                            "event observer failed: session_id={}, seq={}, error={}",
                            event.session_id,
                            event.seq,
                            err
                        );
                    }
                });
            }
        });
    }

    fn bump_sequence_after_raw(&self, seq: u64) {
        let min_next = seq.saturating_add(1);
        let mut current = self.sequence.load(Ordering::Relaxed);
        while current < min_next {
            match self.sequence.compare_exchange_weak(
                current,
                min_next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn build_event(&self, session_id: &str, kind: AgentEventKind) -> AgentEvent {
        AgentEvent {
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
            session_id: session_id.to_string(),
            kind,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    struct MockObserver {
        received: Arc<TokioMutex<Vec<AgentEvent>>>,
    }

    impl MockObserver {
        fn new() -> Self {
            Self {
                received: Arc::new(TokioMutex::new(Vec::new())),
            }
        }

        async fn events(&self) -> Vec<AgentEvent> {
            self.received.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl EventObserver for MockObserver {
        async fn on_event(&self, event: &AgentEvent) -> Result<(), anyhow::Error> {
            self.received.lock().await.push(event.clone());
            Ok(())
        }
    }

    struct FailingObserver;

    #[async_trait::async_trait]
    impl EventObserver for FailingObserver {
        async fn on_event(&self, _event: &AgentEvent) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("observer failure"))
        }
    }

    fn done(turns: usize) -> AgentEventKind {
        AgentEventKind::Done {
            turns,
            tool_calls: 0,
        }
    }

    #[tokio::test]
    async fn subscribe_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish("sess-1", done(1));

        let event = tokio::time::timeout(tokio::time::Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("event received");

        assert_eq!(event.session_id, "sess-1");
        assert!(matches!(event.kind, AgentEventKind::Done { .. }));
    }

    #[tokio::test]
    async fn add_observer_gets_notified() {
        let bus = EventBus::new();
        let observer = Arc::new(MockObserver::new());

        let _token = bus.add_observer(observer.clone());
        assert_eq!(bus.observer_count(), 1);

        bus.publish("sess-test", done(2));
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let received = observer.events().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].session_id, "sess-test");
    }

    #[tokio::test]
    async fn remove_observer_detaches_registered_observer() {
        let bus = EventBus::new();
        let observer = Arc::new(MockObserver::new()) as Arc<dyn EventObserver>;
        let token = bus.add_observer(observer);
        assert_eq!(bus.observer_count(), 1);

        assert!(bus.remove_observer(token));
        assert_eq!(bus.observer_count(), 0);
        assert!(!bus.remove_observer(token));
    }

    #[tokio::test]
    async fn sequence_numbers_increment_monotonically() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish("sess-1", done(1));
        bus.publish("sess-1", done(2));
        bus.publish("sess-1", done(3));

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
        assert_eq!(rx.recv().await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn publish_raw_preserves_seq_and_timestamp() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let raw = AgentEvent {
            seq: 42,
            timestamp: 1_700_000_000,
            session_id: "sess-raw".to_string(),
            kind: done(1),
        };
        bus.publish_raw(raw.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 42);
        assert_eq!(received.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn publish_after_publish_raw_uses_next_sequence() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish_raw(AgentEvent {
            seq: 100,
            timestamp: 123,
            session_id: "sess-raw".to_string(),
            kind: done(1),
        });
        bus.publish("sess-raw", done(2));

        assert_eq!(rx.recv().await.unwrap().seq, 100);
        assert_eq!(rx.recv().await.unwrap().seq, 101);
    }

    #[tokio::test]
    async fn observer_failure_does_not_block_other_observers() {
        let bus = EventBus::new();
        let good = Arc::new(MockObserver::new());
        let bad = Arc::new(FailingObserver) as Arc<dyn EventObserver>;

        let _good_token = bus.add_observer(good.clone());
        let _bad_token = bus.add_observer(bad);

        bus.publish("sess-fail", done(1));
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let received = good.events().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].session_id, "sess-fail");
    }

    #[tokio::test]
    async fn shutdown_completes_without_hanging() {
        let bus = EventBus::new();
        let observer = Arc::new(MockObserver::new()) as Arc<dyn EventObserver>;
        let _token = bus.add_observer(observer);

        bus.publish("sess-shutdown", done(1));
        bus.shutdown().await;
    }
}
