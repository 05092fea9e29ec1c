//! FIFO policy with all-or-nothing batch grants.
//!
//! This is the live system's allocator: the head of the queue gets the first
//! `channels_needed` free channels in id order if enough are free, otherwise
//! it is skipped without consuming anything and the next request is tried.

use crate::directory::QosView;
use crate::ledger::Request;
use crate::pool::Channel;

use super::{eligible, MatchingPolicy, Pairing};

pub struct GreedyFifo;

impl MatchingPolicy for GreedyFifo {
    fn name(&self) -> &'static str {
        "greedy-fifo"
    }

    fn compute_assignment(
        &self,
        free: &[Channel],
        pending: &[Request],
        _qos: &QosView,
    ) -> Vec<Pairing> {
        let mut free: Vec<&Channel> = free.iter().collect();
        let mut pairings = Vec::new();

        for request in pending {
            if free.is_empty() {
                break;
            }
            let needed = request.channels_needed as usize;
            let picked: Vec<usize> = free
                .iter()
                .enumerate()
                .filter(|(_, c)| eligible(request, c.id))
                .map(|(idx, _)| idx)
                .take(needed)
                .collect();
            // Never a partial grant: an unsatisfiable request consumes nothing.
            if picked.len() < needed {
                continue;
            }
            for &idx in &picked {
                pairings.push(Pairing {
                    channel_id: free[idx].id,
                    request_id: request.request_id.clone(),
                });
            }
            for idx in picked.into_iter().rev() {
                free.remove(idx);
            }
        }

        pairings
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{channel, constrained, request};
    use super::*;

    fn ids_for(pairings: &[Pairing], request_id: &str) -> Vec<u32> {
        pairings
            .iter()
            .filter(|p| p.request_id == request_id)
            .map(|p| p.channel_id)
            .collect()
    }

    #[test]
    fn head_gets_lowest_ids_and_short_queue_waits() {
        // Pool of 3, R1 needs 2, R2 needs 2: R1 is served ids-ascending and
        // R2 stays queued because only one channel remains.
        let free = vec![channel(1, 10), channel(2, 20), channel(3, 30)];
        let pending = vec![request("r1", "alice", 2, 0), request("r2", "bob", 2, 1)];

        let pairings = GreedyFifo.compute_assignment(&free, &pending, &QosView::default());
        assert_eq!(ids_for(&pairings, "r1"), vec![1, 2]);
        assert!(ids_for(&pairings, "r2").is_empty());
    }

    #[test]
    fn unsatisfiable_head_does_not_block_later_requests() {
        let free = vec![channel(1, 10), channel(2, 20)];
        let pending = vec![request("big", "alice", 5, 0), request("small", "bob", 1, 1)];

        let pairings = GreedyFifo.compute_assignment(&free, &pending, &QosView::default());
        assert!(ids_for(&pairings, "big").is_empty());
        assert_eq!(ids_for(&pairings, "small"), vec![1]);
    }

    #[test]
    fn grant_is_exactly_the_requested_size() {
        let free = vec![channel(1, 10), channel(2, 20), channel(3, 30)];
        let pending = vec![request("r1", "alice", 2, 0)];
        let pairings = GreedyFifo.compute_assignment(&free, &pending, &QosView::default());
        assert_eq!(pairings.len(), 2);
    }

    #[test]
    fn constraint_limits_the_channel_set() {
        let free = vec![channel(1, 10), channel(2, 20), channel(3, 30)];
        let pending = vec![
            constrained("picky", "alice", 1, 0, &[3]),
            request("any", "bob", 2, 1),
        ];

        let pairings = GreedyFifo.compute_assignment(&free, &pending, &QosView::default());
        assert_eq!(ids_for(&pairings, "picky"), vec![3]);
        assert_eq!(ids_for(&pairings, "any"), vec![1, 2]);
    }

    #[test]
    fn constraint_that_cannot_be_met_consumes_nothing() {
        let free = vec![channel(1, 10), channel(2, 20)];
        let pending = vec![
            constrained("picky", "alice", 2, 0, &[2, 9]),
            request("any", "bob", 2, 1),
        ];

        let pairings = GreedyFifo.compute_assignment(&free, &pending, &QosView::default());
        assert!(ids_for(&pairings, "picky").is_empty());
        assert_eq!(ids_for(&pairings, "any"), vec![1, 2]);
    }

    #[test]
    fn no_channel_assigned_twice_in_a_cycle() {
        let free = vec![channel(1, 10), channel(2, 20), channel(3, 30)];
        let pending = vec![
            request("r1", "alice", 1, 0),
            request("r2", "bob", 1, 1),
            request("r3", "carol", 1, 2),
        ];
        let pairings = GreedyFifo.compute_assignment(&free, &pending, &QosView::default());
        let mut seen: Vec<u32> = pairings.iter().map(|p| p.channel_id).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), pairings.len());
    }
}
