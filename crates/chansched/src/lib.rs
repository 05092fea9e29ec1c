//! Asynchronous allocation of optical channels to competing requesters.
//!
//! The crate is organised around one long-lived scheduling loop
//! ([`worker::AllocationWorker`]) that periodically snapshots the free
//! channels and the queued requests, asks a [`scheduler::MatchingPolicy`]
//! which channel goes to which request, commits the result and hands
//! completion events to the [`notifier`]. Fairness over time is observed
//! (and, under the proportional-fair policy, enforced) through per-requester
//! QoS tracked by the [`directory`].

pub mod app;
pub mod config;
pub mod directory;
pub mod error;
pub mod fairness;
pub mod ledger;
pub mod logging;
pub mod notifier;
pub mod pool;
pub mod scheduler;
pub mod sim;
pub mod worker;

pub use error::{Result, SchedError};
