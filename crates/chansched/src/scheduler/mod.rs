//! Matching engine: which free channel goes to which pending request.
//!
//! A policy is a pure function of one polling cycle's snapshot. It may only
//! hand out channels that were free at snapshot time, and may only consider
//! requests that were queued at snapshot time; committing the result is the
//! allocation worker's job.

use crate::directory::QosView;
use crate::ledger::Request;
use crate::pool::Channel;

pub mod greedy;
pub mod hungarian;
pub mod optimal;

pub use greedy::GreedyFifo;
pub use optimal::ProportionalFair;

/// One proposed allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub channel_id: u32,
    pub request_id: String,
}

/// Policy selection. One deployment runs exactly one policy for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyKind {
    /// Walk the queue in submission order, batch all-or-nothing grants.
    GreedyFifo,
    /// Weighted bipartite matching biased towards poorly served requesters.
    ProportionalFair,
}

impl PolicyKind {
    pub fn build(self, alpha: f64) -> Box<dyn MatchingPolicy> {
        match self {
            Self::GreedyFifo => Box::new(GreedyFifo),
            Self::ProportionalFair => Box::new(ProportionalFair::new(alpha)),
        }
    }
}

pub trait MatchingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Computes an assignment for the snapshot. Deterministic; never proposes
    /// a partial grant for a multi-unit request.
    fn compute_assignment(
        &self,
        free: &[Channel],
        pending: &[Request],
        qos: &QosView,
    ) -> Vec<Pairing>;
}

/// Whether a channel may serve a request under its subset constraint.
pub(crate) fn eligible(request: &Request, channel_id: u32) -> bool {
    match &request.constraint {
        Some(allowed) => allowed.contains(&channel_id),
        None => true,
    }
}
