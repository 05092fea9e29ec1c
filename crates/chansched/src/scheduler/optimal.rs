//! Proportional-fair matching over a weighted bipartite graph.
//!
//! Each round pairs channels with requesters one unit at a time, maximising
//! the total of `ln(1 + adjusted_rate / qos)`. Dividing by the requester's
//! historical QoS is what makes this proportional-fair rather than pure
//! max-throughput: a poorly served requester sees every channel through a
//! smaller denominator and outbids a well-served one even for the fast links.
//!
//! Multi-unit requests accumulate units across rounds of the same cycle. A
//! request whose full demand cannot be met inside the cycle has its tentative
//! units returned to the free set; nothing partial ever leaves this function.

use crate::directory::QosView;
use crate::ledger::Request;
use crate::pool::Channel;

use super::hungarian::{self, FORBIDDEN};
use super::{eligible, MatchingPolicy, Pairing};

/// Relative bias per queue position so that ties resolve towards giving the
/// earliest-submitted request the heavier edge. Multiplicative, because a
/// constant per-request offset would cancel out in the assignment total.
/// Far below any real weight difference.
const TIE_BREAK: f64 = 1e-9;

pub struct ProportionalFair {
    /// Fairness dampening coefficient in `[0, 1]`; `0` disables dampening
    /// and uses the raw channel rate.
    alpha: f64,
}

impl ProportionalFair {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    fn edge_weight(&self, data_rate: u32, qos: f64) -> f64 {
        let rate = data_rate as f64;
        let adjusted = if self.alpha == 0.0 || (qos - 1.0).abs() < f64::EPSILON {
            rate
        } else {
            ((1.0 - self.alpha) * qos) * (self.alpha * rate)
        };
        (1.0 + adjusted / qos).ln()
    }

    /// Runs one single-unit matching round. Returns `(channel index in
    /// `free`, pending index)` pairs; at most one unit per request per round.
    fn match_round(
        &self,
        free: &[Channel],
        pending: &[Request],
        wanting: &[usize],
        qos: &QosView,
    ) -> Vec<(usize, usize)> {
        let weight = |chan_idx: usize, col_pos: usize| -> f64 {
            let request = &pending[wanting[col_pos]];
            if !eligible(request, free[chan_idx].id) {
                return FORBIDDEN;
            }
            let w = self.edge_weight(free[chan_idx].data_rate, qos.score(&request.requester));
            -(w * (1.0 + (wanting.len() - col_pos) as f64 * TIE_BREAK))
        };

        // The solver wants rows <= cols; orient the smaller side as rows.
        let channels_as_rows = free.len() <= wanting.len();
        let (rows, cols) = if channels_as_rows {
            (free.len(), wanting.len())
        } else {
            (wanting.len(), free.len())
        };

        let cost: Vec<Vec<f64>> = (0..rows)
            .map(|i| {
                (0..cols)
                    .map(|j| {
                        if channels_as_rows {
                            weight(i, j)
                        } else {
                            weight(j, i)
                        }
                    })
                    .collect()
            })
            .collect();

        let assignment = hungarian::solve(&cost);
        assignment
            .into_iter()
            .enumerate()
            .filter(|&(row, col)| cost[row][col] < FORBIDDEN / 2.0)
            .map(|(row, col)| {
                if channels_as_rows {
                    (row, wanting[col])
                } else {
                    (col, wanting[row])
                }
            })
            .collect()
    }
}

impl MatchingPolicy for ProportionalFair {
    fn name(&self) -> &'static str {
        "proportional-fair"
    }

    fn compute_assignment(
        &self,
        free: &[Channel],
        pending: &[Request],
        qos: &QosView,
    ) -> Vec<Pairing> {
        let mut free: Vec<Channel> = free.to_vec();
        let mut remaining: Vec<u32> = pending.iter().map(|r| r.channels_needed).collect();
        let mut tentative: Vec<Vec<u32>> = vec![Vec::new(); pending.len()];

        loop {
            let wanting: Vec<usize> = (0..pending.len())
                .filter(|&i| {
                    remaining[i] > 0 && free.iter().any(|c| eligible(&pending[i], c.id))
                })
                .collect();
            if free.is_empty() || wanting.is_empty() {
                break;
            }

            let matched = self.match_round(&free, pending, &wanting, qos);
            if matched.is_empty() {
                break;
            }

            let mut taken: Vec<usize> = Vec::with_capacity(matched.len());
            for (chan_idx, req_idx) in matched {
                tentative[req_idx].push(free[chan_idx].id);
                remaining[req_idx] -= 1;
                taken.push(chan_idx);
            }
            taken.sort_unstable();
            for idx in taken.into_iter().rev() {
                free.remove(idx);
            }
        }

        let mut pairings = Vec::new();
        for (idx, request) in pending.iter().enumerate() {
            if remaining[idx] > 0 {
                // Unmet demand: tentative units flow back to the free set by
                // simply not being reported.
                continue;
            }
            for &channel_id in &tentative[idx] {
                pairings.push(Pairing {
                    channel_id,
                    request_id: request.request_id.clone(),
                });
            }
        }
        pairings
    }
}
