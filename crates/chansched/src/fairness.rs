//! Fairness metrics over the per-requester QoS vector, and the sampling task
//! that reports them.
//!
//! The metrics are observability outputs only. They never feed back into
//! matching except through the QoS term the proportional-fair policy already
//! divides by.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::directory::{Clock, RequesterDirectory};
use crate::ledger::RequestLedger;
use crate::logging::METRICS_TARGET;
use crate::pool::ChannelPool;

/// Jain's fairness index: `(Σq)² / (n · Σq²)`, in `(0, 1]` with 1 meaning
/// perfectly fair. Defined as 0 for an empty or all-zero vector.
pub fn jain(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().sum();
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    if sum_sq == 0.0 {
        return 0.0;
    }
    (sum * sum) / (values.len() as f64 * sum_sq)
}

/// Gini coefficient: `Σ(2i - n - 1)·q_i / (n · Σq)` over the ascending-sorted
/// vector (1-indexed), in `[0, 1)` with 0 meaning perfect equality. Defined
/// as 0 for an empty or all-zero vector.
pub fn gini(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    let sum: f64 = sorted.iter().sum();
    if sum == 0.0 {
        return 0.0;
    }
    let numerator: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n - 1.0) * v)
        .sum();
    numerator / (n * sum)
}

/// One fairness observation.
#[derive(Debug, Clone, PartialEq)]
pub struct FairnessSample {
    pub jain: f64,
    pub gini: f64,
    pub avg_qos: f64,
    pub queue_length: usize,
    pub utilization: f64,
    pub requesters: usize,
}

/// Read-only sampler running on its own cadence.
pub struct FairnessMonitor {
    pool: Arc<ChannelPool>,
    ledger: Arc<RequestLedger>,
    directory: Arc<RequesterDirectory>,
    clock: Arc<Clock>,
    interval: Duration,
}

impl FairnessMonitor {
    pub fn new(
        pool: Arc<ChannelPool>,
        ledger: Arc<RequestLedger>,
        directory: Arc<RequesterDirectory>,
        clock: Arc<Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            ledger,
            directory,
            clock,
            interval,
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = self.sample(self.clock.now()).await;
                    tracing::info!(
                        target: METRICS_TARGET,
                        jain = sample.jain,
                        gini = sample.gini,
                        avg_qos = sample.avg_qos,
                        queue_length = sample.queue_length,
                        utilization = sample.utilization,
                        requesters = sample.requesters,
                    );
                }
            }
        }
    }

    pub async fn sample(&self, now: f64) -> FairnessSample {
        let qos = self.directory.qos_view(now).values();
        let avg_qos = if qos.is_empty() {
            0.0
        } else {
            qos.iter().sum::<f64>() / qos.len() as f64
        };
        let total = self.pool.len();
        let utilization = if total == 0 {
            0.0
        } else {
            self.pool.allocated_count() as f64 / total as f64
        };
        FairnessSample {
            jain: jain(&qos),
            gini: gini(&qos),
            avg_qos,
            queue_length: self.ledger.queue_len().await,
            utilization,
            requesters: qos.len(),
        }
    }
}
