//! Completion event dispatch, decoupled from the allocation loop.
//!
//! The worker publishes onto an unbounded channel and never waits on a sink,
//! so a slow notification target cannot stall allocation. Delivery is
//! at-least-once; the consumer dedupes by request id, and a duplicate
//! `mark_completed` on an already completed request is tolerated.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::directory::RequesterDirectory;
use crate::error::SchedError;
use crate::ledger::RequestLedger;

/// Emitted once a request reaches full satisfaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub request_id: String,
    pub requester: String,
    #[serde(rename = "resource_ids")]
    pub channel_ids: Vec<u32>,
}

/// Publisher half of the completion channel.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl NotificationDispatcher {
    /// Best-effort, non-blocking publish.
    pub fn publish(&self, event: CompletionEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Completion channel closed, dropping event");
        }
    }
}

pub fn channel() -> (NotificationDispatcher, mpsc::UnboundedReceiver<CompletionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationDispatcher { tx }, rx)
}

/// Terminal delivery seam: email, webhook, whatever the deployment wires in.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, address: &str, event: &CompletionEvent) -> anyhow::Result<()>;
}

/// Sink that renders the notice into the log stream.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, address: &str, event: &CompletionEvent) -> anyhow::Result<()> {
        tracing::info!(
            "Notifying {address}: request {} for {} completed, channels {:?}",
            event.request_id,
            event.requester,
            event.channel_ids
        );
        Ok(())
    }
}

/// Request ids the consumer will not deliver again.
const DEDUP_CAPACITY: usize = 4096;

/// Insertion-ordered set of recently delivered request ids, capped so memory
/// does not grow with daemon uptime. An id evicted from the window would be
/// delivered again on redelivery, which at-least-once semantics allow.
struct RecentIds {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns false if the id is already in the window.
    fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Consumer side: marks the request completed and delivers the notice.
pub struct NotificationConsumer {
    rx: mpsc::UnboundedReceiver<CompletionEvent>,
    ledger: Arc<RequestLedger>,
    directory: Arc<RequesterDirectory>,
    sink: Arc<dyn NotificationSink>,
    delivered: RecentIds,
}

impl NotificationConsumer {
    pub fn new(
        rx: mpsc::UnboundedReceiver<CompletionEvent>,
        ledger: Arc<RequestLedger>,
        directory: Arc<RequesterDirectory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            rx,
            ledger,
            directory,
            sink,
            delivered: RecentIds::new(DEDUP_CAPACITY),
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: CompletionEvent) {
        match self.ledger.mark_completed(&event.request_id).await {
            Ok(()) => {}
            Err(SchedError::InvalidState { actual, .. }) if actual == "completed" => {
                tracing::debug!("Duplicate completion for request {}", event.request_id);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not mark request {} completed: {e}",
                    event.request_id
                );
            }
        }

        if !self.delivered.insert(&event.request_id) {
            // Already notified; at-least-once redelivery ends here.
            return;
        }

        let Some(address) = self.directory.notify_address(&event.requester) else {
            tracing::warn!(
                "No notification address for requester {}, request {}",
                event.requester,
                event.request_id
            );
            return;
        };

        if let Err(e) = self.sink.deliver(&address, &event).await {
            tracing::error!(
                "Notification delivery for request {} failed: {e}",
                event.request_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryStore;
    use crate::ledger::RequestStatus;
    use tokio::sync::Mutex;

    struct CaptureSink {
        deliveries: Mutex<Vec<(String, CompletionEvent)>>,
    }

    impl CaptureSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deliveries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationSink for CaptureSink {
        async fn deliver(&self, address: &str, event: &CompletionEvent) -> anyhow::Result<()> {
            self.deliveries
                .lock()
                .await
                .push((address.to_string(), event.clone()));
            Ok(())
        }
    }

    async fn fixture() -> (Arc<RequestLedger>, Arc<RequesterDirectory>, String) {
        let ledger = Arc::new(RequestLedger::new(Arc::new(MemoryStore::new())));
        let directory = Arc::new(RequesterDirectory::new());
        directory.register("alice", Some("alice@example.net".into()));
        let id = ledger.submit("alice", 1, None, None).await.unwrap();
        ledger.mark_matched(&id, vec![0], 1.0).await.unwrap();
        (ledger, directory, id)
    }

    #[tokio::test]
    async fn completes_and_delivers_once() {
        let (ledger, directory, id) = fixture().await;
        let sink = CaptureSink::new();
        let (_dispatcher, rx) = channel();
        let mut consumer =
            NotificationConsumer::new(rx, ledger.clone(), directory, sink.clone());

        let event = CompletionEvent {
            request_id: id.clone(),
            requester: "alice".into(),
            channel_ids: vec![0],
        };
        consumer.handle_event(event.clone()).await;
        // At-least-once redelivery of the same event.
        consumer.handle_event(event).await;

        assert_eq!(
            ledger.get(&id).await.unwrap().status,
            RequestStatus::Completed
        );
        let deliveries = sink.deliveries.lock().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, "alice@example.net");
    }

    #[tokio::test]
    async fn missing_address_is_not_fatal() {
        let ledger = Arc::new(RequestLedger::new(Arc::new(MemoryStore::new())));
        let directory = Arc::new(RequesterDirectory::new());
        let id = ledger.submit("ghost", 1, None, None).await.unwrap();
        ledger.mark_matched(&id, vec![3], 0.0).await.unwrap();

        let sink = CaptureSink::new();
        let (_dispatcher, rx) = channel();
        let mut consumer =
            NotificationConsumer::new(rx, ledger.clone(), directory, sink.clone());
        consumer
            .handle_event(CompletionEvent {
                request_id: id.clone(),
                requester: "ghost".into(),
                channel_ids: vec![3],
            })
            .await;

        // Ledger still advanced; nothing was delivered.
        assert_eq!(
            ledger.get(&id).await.unwrap().status,
            RequestStatus::Completed
        );
        assert!(sink.deliveries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn run_drains_published_events() {
        let (ledger, directory, id) = fixture().await;
        let sink = CaptureSink::new();
        let (dispatcher, rx) = channel();
        let consumer = NotificationConsumer::new(rx, ledger.clone(), directory, sink.clone());

        let token = CancellationToken::new();
        let task = tokio::spawn(consumer.run(token.clone()));

        dispatcher.publish(CompletionEvent {
            request_id: id.clone(),
            requester: "alice".into(),
            channel_ids: vec![0],
        });

        // Give the consumer a beat, then stop it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(sink.deliveries.lock().await.len(), 1);
        assert_eq!(
            ledger.get(&id).await.unwrap().status,
            RequestStatus::Completed
        );
    }

    #[test]
    fn dedup_window_is_bounded() {
        let mut recent = RecentIds::new(3);
        assert!(recent.insert("a"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(recent.insert("c"));
        // "d" pushes the window past capacity and evicts the oldest entry.
        assert!(recent.insert("d"));
        assert_eq!(recent.seen.len(), 3);
        assert_eq!(recent.order.len(), 3);
        assert!(recent.insert("a"));
        assert!(!recent.insert("d"));
    }

    #[test]
    fn event_wire_shape_is_stable() {
        let event = CompletionEvent {
            request_id: "req-1".into(),
            requester: "alice".into(),
            channel_ids: vec![1, 2],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"request_id":"req-1","requester":"alice","resource_ids":[1,2]}"#
        );
    }
}
