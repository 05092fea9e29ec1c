//! Closed-loop fairness simulation on a virtual clock.
//!
//! Simulated requesters cycle through think, request, hold, release against
//! the same pool, ledger, directory, and matching machinery the daemon runs.
//! Time is a binary-heap event queue advanced in fixed scheduling ticks, so a
//! run is fully deterministic under a seed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::directory::{Clock, RequesterDirectory};
use crate::error::Result;
use crate::fairness;
use crate::ledger::store::MemoryStore;
use crate::ledger::RequestLedger;
use crate::logging::METRICS_TARGET;
use crate::notifier;
use crate::pool::ChannelPool;
use crate::scheduler::ProportionalFair;
use crate::worker::AllocationWorker;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub requesters: u32,
    pub channels: u32,
    pub rate_min: u32,
    pub rate_max: u32,
    /// Virtual seconds to simulate.
    pub duration: f64,
    /// Scheduling tick; one matching cycle runs per tick.
    pub tick: f64,
    /// Cadence of fairness samples in the log.
    pub monitor_interval: f64,
    /// Mean of the exponential channel-hold time.
    pub mean_service: f64,
    /// Mean of the exponential pause between a release and the next request.
    pub mean_think: f64,
    pub alpha: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            requesters: 10,
            channels: 4,
            rate_min: 18_000,
            rate_max: 68_000,
            duration: 200.0,
            tick: 0.01,
            monitor_interval: 1.0,
            mean_service: 1.0,
            mean_think: 0.5,
            alpha: 0.0,
            seed: 7,
        }
    }
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub completed_jobs: u64,
    pub avg_wait: f64,
    pub avg_qos: f64,
    pub jain: f64,
    pub gini: f64,
    /// Final QoS per requester, name-ascending.
    pub per_requester: Vec<(String, f64)>,
}

impl std::fmt::Display for SimReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "completed jobs: {}", self.completed_jobs)?;
        writeln!(f, "avg wait:       {:.4}", self.avg_wait)?;
        writeln!(f, "avg qos:        {:.1}", self.avg_qos)?;
        writeln!(f, "jain index:     {:.4}", self.jain)?;
        writeln!(f, "gini coeff:     {:.4}", self.gini)?;
        for (name, qos) in &self.per_requester {
            writeln!(f, "  {name}: qos {qos:.1}")?;
        }
        Ok(())
    }
}

enum EventKind {
    /// The requester submits its next single-unit request.
    Submit { requester: usize },
    /// A held channel is handed back.
    Release {
        requester: usize,
        channel_id: u32,
        held_since: f64,
    },
}

struct Event {
    at: f64,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Event {}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.total_cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    // Inverse transform; 1 - u keeps the argument strictly positive.
    -mean * (1.0 - rng.random::<f64>()).ln()
}

pub async fn run(cfg: SimConfig) -> Result<SimReport> {
    let pool = Arc::new(ChannelPool::new(
        cfg.channels,
        cfg.rate_min,
        cfg.rate_max,
        Some(cfg.seed),
    ));
    let ledger = Arc::new(RequestLedger::new(Arc::new(MemoryStore::new())));
    let directory = Arc::new(RequesterDirectory::new());
    let (dispatcher, mut matches) = notifier::channel();
    let worker = AllocationWorker::new(
        pool.clone(),
        ledger.clone(),
        directory.clone(),
        Box::new(ProportionalFair::new(cfg.alpha)),
        dispatcher,
        Arc::new(Clock::start()),
        Duration::from_secs(5),
    );
    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_mul(0x9e37_79b9));

    let names: Vec<String> = (0..cfg.requesters).map(|i| format!("sim-{i}")).collect();
    for name in &names {
        directory.register(name, None);
    }

    let mut events: BinaryHeap<Reverse<Event>> = BinaryHeap::new();
    let mut event_seq = 0u64;
    let mut push = |events: &mut BinaryHeap<Reverse<Event>>, at: f64, kind: EventKind| {
        events.push(Reverse(Event {
            at,
            seq: event_seq,
            kind,
        }));
        event_seq += 1;
    };

    // Staggered cold start so the first cycle is not one giant batch.
    for requester in 0..names.len() {
        let at = rng.random::<f64>() * cfg.mean_think.max(cfg.tick);
        push(&mut events, at, EventKind::Submit { requester });
    }

    let mut submit_times: HashMap<String, f64> = HashMap::new();
    let mut requester_of: HashMap<String, usize> = HashMap::new();
    let mut completed_jobs = 0u64;
    let mut total_wait = 0.0f64;
    let mut matched_count = 0u64;
    let mut next_monitor = 0.0f64;

    let steps = (cfg.duration / cfg.tick).ceil() as u64;
    for step in 0..=steps {
        let now = step as f64 * cfg.tick;

        while events
            .peek()
            .is_some_and(|Reverse(head)| head.at <= now)
        {
            let Some(Reverse(event)) = events.pop() else {
                break;
            };
            match event.kind {
                EventKind::Submit { requester } => {
                    let name = &names[requester];
                    let id = ledger.submit(name, 1, None, None).await?;
                    directory.begin_wait(name, event.at);
                    submit_times.insert(id.clone(), event.at);
                    requester_of.insert(id, requester);
                }
                EventKind::Release {
                    requester,
                    channel_id,
                    held_since,
                } => {
                    let rate = pool.release(channel_id)?;
                    let hold = event.at - held_since;
                    // Delivered work is rate-seconds over the hold.
                    directory.record_usage(&names[requester], hold, rate as f64 * hold);
                    completed_jobs += 1;
                    let next = event.at + exponential(&mut rng, cfg.mean_think);
                    push(&mut events, next, EventKind::Submit { requester });
                }
            }
        }

        worker.run_cycle(now).await?;

        while let Ok(event) = matches.try_recv() {
            ledger.mark_completed(&event.request_id).await?;
            let submitted = submit_times
                .remove(&event.request_id)
                .unwrap_or(now);
            total_wait += now - submitted;
            matched_count += 1;
            let requester = requester_of
                .remove(&event.request_id)
                .expect("matched request was submitted here");
            for channel_id in event.channel_ids {
                let release_at = now + exponential(&mut rng, cfg.mean_service);
                push(
                    &mut events,
                    release_at,
                    EventKind::Release {
                        requester,
                        channel_id,
                        held_since: now,
                    },
                );
            }
        }

        if now >= next_monitor {
            let qos = directory.qos_view(now).values();
            tracing::debug!(
                target: METRICS_TARGET,
                time = now,
                jain = fairness::jain(&qos),
                gini = fairness::gini(&qos),
                queue_length = ledger.queue_len().await,
                utilization = pool.allocated_count() as f64 / pool.len().max(1) as f64,
            );
            next_monitor += cfg.monitor_interval;
        }
    }

    let end = cfg.duration;
    let view = directory.qos_view(end);
    let qos = view.values();
    let mut per_requester: Vec<(String, f64)> = names
        .iter()
        .map(|name| (name.clone(), view.score(name)))
        .collect();
    per_requester.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(SimReport {
        completed_jobs,
        avg_wait: if matched_count == 0 {
            0.0
        } else {
            total_wait / matched_count as f64
        },
        avg_qos: if qos.is_empty() {
            0.0
        } else {
            qos.iter().sum::<f64>() / qos.len() as f64
        },
        jain: fairness::jain(&qos),
        gini: fairness::gini(&qos),
        per_requester,
    })
}
