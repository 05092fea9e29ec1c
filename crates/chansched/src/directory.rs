//! Requester directory: notification addresses and running QoS aggregates.
//!
//! QoS is delivered work per unit of time spent in the system:
//! `work_delivered / (service_time + wait_time)`, with the wait of a request
//! still sitting in the queue counted live. The ratio is floored at a small
//! epsilon so it can safely sit in a denominator. This is the fairness weight
//! the proportional-fair policy divides by.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Floor for QoS values, matching the live-wait accounting's epsilon.
pub const QOS_EPSILON: f64 = 1e-4;

/// Monotonic scheduler clock in fractional seconds.
///
/// Components take `now` as a plain value so the simulation can drive the
/// same code on a virtual clock.
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[derive(Debug, Clone, Default)]
struct RequesterRecord {
    notify_address: Option<String>,
    work_delivered: f64,
    service_time: f64,
    wait_time: f64,
    /// Clock timestamp when the requester's oldest queued request arrived.
    waiting_since: Option<f64>,
}

impl RequesterRecord {
    fn qos(&self, now: f64) -> f64 {
        let live_wait = self.waiting_since.map_or(0.0, |since| now - since);
        let denom = self.service_time + self.wait_time + live_wait;
        if denom <= 0.0 || self.work_delivered <= 0.0 {
            return QOS_EPSILON;
        }
        (self.work_delivered / denom).max(QOS_EPSILON)
    }
}

/// Read-only QoS snapshot handed to the matching engine and the monitor.
#[derive(Debug, Clone, Default)]
pub struct QosView {
    scores: HashMap<String, f64>,
}

impl QosView {
    pub fn score(&self, requester: &str) -> f64 {
        self.scores.get(requester).copied().unwrap_or(QOS_EPSILON)
    }

    /// All scores, ascending, so aggregate sums are reproducible run to run.
    pub fn values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.scores.values().copied().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[cfg(test)]
    pub fn with_scores(scores: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            scores: scores.into_iter().collect(),
        }
    }
}

/// Registry of requesters known to this process.
///
/// Identity is owned by an external user directory; this only carries what
/// the scheduler core needs: where to notify, and the usage aggregates.
#[derive(Default)]
pub struct RequesterDirectory {
    records: Mutex<HashMap<String, RequesterRecord>>,
}

impl RequesterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, requester: &str, notify_address: Option<String>) {
        let mut records = self.lock();
        let record = records.entry(requester.to_string()).or_default();
        if notify_address.is_some() {
            record.notify_address = notify_address;
        }
    }

    pub fn notify_address(&self, requester: &str) -> Option<String> {
        self.lock()
            .get(requester)
            .and_then(|r| r.notify_address.clone())
    }

    /// Records that the requester started waiting for an allocation.
    pub fn begin_wait(&self, requester: &str, now: f64) {
        let mut records = self.lock();
        let record = records.entry(requester.to_string()).or_default();
        // Waits overlap only per requester's oldest outstanding request.
        if record.waiting_since.is_none() {
            record.waiting_since = Some(now);
        }
    }

    /// Closes the requester's wait interval at match (or cancel) time.
    pub fn end_wait(&self, requester: &str, now: f64) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(requester) {
            if let Some(since) = record.waiting_since.take() {
                record.wait_time += (now - since).max(0.0);
            }
        }
    }

    /// Accounts a finished hold: `hold_time` of service and the work the
    /// held channels delivered over it.
    pub fn record_usage(&self, requester: &str, hold_time: f64, work_delivered: f64) {
        let mut records = self.lock();
        let record = records.entry(requester.to_string()).or_default();
        record.service_time += hold_time.max(0.0);
        record.work_delivered += work_delivered.max(0.0);
    }

    pub fn qos(&self, requester: &str, now: f64) -> f64 {
        self.lock()
            .get(requester)
            .map_or(QOS_EPSILON, |r| r.qos(now))
    }

    pub fn qos_view(&self, now: f64) -> QosView {
        let records = self.lock();
        QosView {
            scores: records
                .iter()
                .map(|(name, record)| (name.clone(), record.qos(now)))
                .collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RequesterRecord>> {
        self.records.lock().expect("requester directory poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_requester_gets_epsilon_qos() {
        let directory = RequesterDirectory::new();
        assert_eq!(directory.qos("ghost", 10.0), QOS_EPSILON);
    }

    #[test]
    fn qos_counts_live_wait() {
        let directory = RequesterDirectory::new();
        directory.record_usage("alice", 10.0, 100.0);
        let settled = directory.qos("alice", 0.0);
        assert!((settled - 10.0).abs() < 1e-9);

        // Queued again: the wait accrues against her score immediately.
        directory.begin_wait("alice", 0.0);
        let waiting = directory.qos("alice", 10.0);
        assert!((waiting - 5.0).abs() < 1e-9);
    }

    #[test]
    fn end_wait_folds_into_total() {
        let directory = RequesterDirectory::new();
        directory.begin_wait("bob", 1.0);
        directory.end_wait("bob", 4.0);
        directory.record_usage("bob", 3.0, 60.0);
        // 60 work over 3 service + 3 wait.
        assert!((directory.qos("bob", 100.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn no_work_floors_at_epsilon() {
        let directory = RequesterDirectory::new();
        directory.begin_wait("carol", 0.0);
        assert_eq!(directory.qos("carol", 50.0), QOS_EPSILON);
    }

    #[test]
    fn register_keeps_address_across_updates() {
        let directory = RequesterDirectory::new();
        directory.register("alice", Some("alice@example.net".into()));
        directory.register("alice", None);
        assert_eq!(
            directory.notify_address("alice").as_deref(),
            Some("alice@example.net")
        );
        assert_eq!(directory.notify_address("bob"), None);
    }

    #[test]
    fn qos_view_snapshots_all_requesters() {
        let directory = RequesterDirectory::new();
        directory.record_usage("alice", 1.0, 5.0);
        directory.record_usage("bob", 1.0, 1.0);
        let view = directory.qos_view(0.0);
        assert_eq!(view.len(), 2);
        assert!((view.score("alice") - 5.0).abs() < 1e-9);
        assert!((view.score("bob") - 1.0).abs() < 1e-9);
        assert_eq!(view.score("ghost"), QOS_EPSILON);
    }
}
