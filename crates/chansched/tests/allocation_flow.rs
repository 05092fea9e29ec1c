//! End-to-end allocation flow over real components: durable submit, matching
//! cycles, commit, notification, release, recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use chansched::directory::{Clock, RequesterDirectory};
use chansched::ledger::store::{JsonFileStore, MemoryStore};
use chansched::ledger::{RequestLedger, RequestStatus};
use chansched::notifier::{self, CompletionEvent, NotificationConsumer, NotificationSink};
use chansched::pool::ChannelPool;
use chansched::scheduler::PolicyKind;
use chansched::worker::AllocationWorker;

struct CaptureSink {
    deliveries: Mutex<Vec<(String, CompletionEvent)>>,
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

#[tokio::test]
async fn greedy_flow_matches_releases_and_notifies() {
    let pool = Arc::new(ChannelPool::from_inventory(
        [(1, 100), (2, 200), (3, 300)],
        10,
        1000,
    ));
    let ledger = Arc::new(RequestLedger::new(Arc::new(MemoryStore::new())));
    let directory = Arc::new(RequesterDirectory::new());
    directory.register("alice", Some("alice@example.net".into()));
    directory.register("bob", Some("bob@example.net".into()));

    let (dispatcher, rx) = notifier::channel();
    let worker = AllocationWorker::new(
        pool.clone(),
        ledger.clone(),
        directory.clone(),
        PolicyKind::GreedyFifo.build(0.0),
        dispatcher,
        Arc::new(Clock::start()),
        Duration::from_millis(10),
    );

    let sink = Arc::new(CaptureSink {
        deliveries: Mutex::new(Vec::new()),
    });
    let consumer = NotificationConsumer::new(rx, ledger.clone(), directory.clone(), sink.clone());
    let token = CancellationToken::new();
    let consumer_task = tokio::spawn(consumer.run(token.clone()));

    // Two channels to the head of the queue; the second request must wait
    // even though a single channel is still free.
    let r1 = ledger.submit("alice", 2, None, None).await.unwrap();
    let r2 = ledger.submit("bob", 2, None, None).await.unwrap();
    directory.begin_wait("alice", 0.0);
    directory.begin_wait("bob", 0.0);

    worker.run_cycle(1.0).await.unwrap();
    assert_eq!(
        ledger.get(&r2).await.unwrap().status,
        RequestStatus::Queued
    );

    // Alice finishes: both channels come back, accounting lands, bob's turn.
    let assigned = ledger.get(&r1).await.unwrap().assigned_channel_ids;
    assert_eq!(assigned, vec![1, 2]);
    for id in assigned {
        let rate = pool.release(id).unwrap();
        directory.record_usage("alice", 4.0, rate as f64 * 4.0);
    }
    worker.run_cycle(5.0).await.unwrap();
    assert_eq!(
        ledger.get(&r2).await.unwrap().status,
        RequestStatus::Matched
    );

    // Both completion notices reach their addresses.
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    consumer_task.await.unwrap();

    let deliveries = sink.deliveries.lock().await;
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].0, "alice@example.net");
    assert_eq!(deliveries[0].1.request_id, r1);
    assert_eq!(deliveries[1].0, "bob@example.net");
    assert_eq!(
        ledger.get(&r1).await.unwrap().status,
        RequestStatus::Completed
    );
}

#[tokio::test]
async fn proportional_fair_flow_prefers_the_starved_requester() {
    let pool = Arc::new(ChannelPool::from_inventory([(1, 100), (2, 900)], 10, 1000));
    let ledger = Arc::new(RequestLedger::new(Arc::new(MemoryStore::new())));
    let directory = Arc::new(RequesterDirectory::new());
    // Alice has been served generously; bob has barely seen any work.
    directory.record_usage("alice", 10.0, 9000.0);
    directory.record_usage("bob", 10.0, 10.0);

    let (dispatcher, _rx) = notifier::channel();
    let worker = AllocationWorker::new(
        pool.clone(),
        ledger.clone(),
        directory.clone(),
        PolicyKind::ProportionalFair.build(0.0),
        dispatcher,
        Arc::new(Clock::start()),
        Duration::from_millis(10),
    );

    let rich = ledger.submit("alice", 1, None, None).await.unwrap();
    let poor = ledger.submit("bob", 1, None, None).await.unwrap();
    worker.run_cycle(1.0).await.unwrap();

    // Submission order favoured alice; fairness hands bob the fast channel.
    assert_eq!(
        ledger.get(&poor).await.unwrap().assigned_channel_ids,
        vec![2]
    );
    assert_eq!(
        ledger.get(&rich).await.unwrap().assigned_channel_ids,
        vec![1]
    );
}

#[tokio::test]
async fn queued_requests_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.json");

    let submitted = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let ledger = RequestLedger::new(store);
        ledger.submit("alice", 1, None, None).await.unwrap()
    };

    // A fresh process over the same store file sees the request and a new
    // worker matches it.
    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let ledger = Arc::new(RequestLedger::recover(store).await.unwrap());
    let pool = Arc::new(ChannelPool::from_inventory([(0, 500)], 10, 1000));
    let directory = Arc::new(RequesterDirectory::new());
    let (dispatcher, _rx) = notifier::channel();
    let worker = AllocationWorker::new(
        pool.clone(),
        ledger.clone(),
        directory,
        PolicyKind::GreedyFifo.build(0.0),
        dispatcher,
        Arc::new(Clock::start()),
        Duration::from_millis(10),
    );

    worker.run_cycle(0.0).await.unwrap();
    let request = ledger.get(&submitted).await.unwrap();
    assert_eq!(request.status, RequestStatus::Matched);
    assert_eq!(request.assigned_channel_ids, vec![0]);
}
