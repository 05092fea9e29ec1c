//! The allocation loop: snapshot, match, commit, notify, sleep.
//!
//! Commit semantics per pairing group: every channel of a request is
//! allocated and the ledger transition recorded in one logical commit, or
//! none of it sticks. A `Conflict` or `InvalidState` (a racing release or
//! cancellation snuck in after the snapshot) drops just that request's
//! pairings and the cycle moves on; an `Unavailable` store aborts the whole
//! cycle, which simply retries on the next tick. The loop itself never exits
//! on a failed cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::directory::{Clock, RequesterDirectory};
use crate::error::{Result, SchedError};
use crate::ledger::{Request, RequestLedger};
use crate::notifier::{CompletionEvent, NotificationDispatcher};
use crate::pool::ChannelPool;
use crate::scheduler::MatchingPolicy;

pub struct AllocationWorker {
    pool: Arc<ChannelPool>,
    ledger: Arc<RequestLedger>,
    directory: Arc<RequesterDirectory>,
    policy: Box<dyn MatchingPolicy>,
    dispatcher: NotificationDispatcher,
    clock: Arc<Clock>,
    interval: Duration,
}

impl AllocationWorker {
    pub fn new(
        pool: Arc<ChannelPool>,
        ledger: Arc<RequestLedger>,
        directory: Arc<RequesterDirectory>,
        policy: Box<dyn MatchingPolicy>,
        dispatcher: NotificationDispatcher,
        clock: Arc<Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            ledger,
            directory,
            policy,
            dispatcher,
            clock,
            interval,
        }
    }

    /// Runs the polling loop until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            "Allocation worker started, policy {}, interval {:?}",
            self.policy.name(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(self.clock.now()).await {
                        // Liveness over completeness: log and retry next tick.
                        tracing::warn!("Allocation cycle aborted: {e}");
                    }
                }
            }
        }
        tracing::info!("Allocation worker stopped");
    }

    /// One polling cycle at scheduler-clock time `now`.
    pub async fn run_cycle(&self, now: f64) -> Result<()> {
        let free = self.pool.list_free();
        let pending = self.ledger.get_pending().await;
        if free.is_empty() || pending.is_empty() {
            return Ok(());
        }

        let qos = self.directory.qos_view(now);
        let pairings = self.policy.compute_assignment(&free, &pending, &qos);
        if pairings.is_empty() {
            return Ok(());
        }

        let mut by_request: HashMap<&str, Vec<u32>> = HashMap::new();
        for pairing in &pairings {
            by_request
                .entry(pairing.request_id.as_str())
                .or_default()
                .push(pairing.channel_id);
        }

        // Commit in submission order so the log reads like the queue.
        for request in &pending {
            let Some(channel_ids) = by_request.remove(request.request_id.as_str()) else {
                continue;
            };
            match self.commit(request, &channel_ids, now).await {
                Ok(()) => {
                    self.directory.end_wait(&request.requester, now);
                    tracing::info!(
                        "Matched request {} for {} with channels {:?}",
                        request.request_id,
                        request.requester,
                        channel_ids
                    );
                    self.dispatcher.publish(CompletionEvent {
                        request_id: request.request_id.clone(),
                        requester: request.requester.clone(),
                        channel_ids,
                    });
                }
                Err(e @ SchedError::Unavailable { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Dropping pairing for request {}: {e}",
                        request.request_id
                    );
                }
            }
        }
        Ok(())
    }

    /// Allocates all channels of one request and records the match.
    async fn commit(&self, request: &Request, channel_ids: &[u32], now: f64) -> Result<()> {
        let mut allocated: Vec<u32> = Vec::with_capacity(channel_ids.len());
        for &channel_id in channel_ids {
            if let Err(e) = self.pool.allocate(channel_id, &request.requester) {
                self.rollback(&allocated);
                return Err(e);
            }
            allocated.push(channel_id);
        }
        if let Err(e) = self
            .ledger
            .mark_matched(&request.request_id, allocated.clone(), now)
            .await
        {
            self.rollback(&allocated);
            return Err(e);
        }
        Ok(())
    }

    fn rollback(&self, allocated: &[u32]) {
        for &channel_id in allocated {
            if let Err(e) = self.pool.revert_allocation(channel_id) {
                tracing::error!("Rollback of channel {channel_id} failed: {e}");
            }
        }
    }
}
