//! Fixed pool of optical channels and their free/allocated bookkeeping.
//!
//! The pool is the only place channel state lives. All mutation goes through
//! a single mutex so two concurrent commits can never hand the same channel
//! to two requests; the lock is never held across an await point.

use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SchedError};

/// Allocation state of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Allocated,
}

/// One allocatable optical channel.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: u32,
    /// Characterised data rate. Redrawn from the configured range on release,
    /// modelling post-use re-characterisation of the physical link.
    pub data_rate: u32,
    pub state: ChannelState,
    pub owner: Option<String>,
}

struct PoolInner {
    channels: BTreeMap<u32, Channel>,
    rng: StdRng,
}

/// Process-owned channel inventory.
pub struct ChannelPool {
    inner: Mutex<PoolInner>,
    rate_min: u32,
    rate_max: u32,
}

impl ChannelPool {
    /// Provisions `count` channels with ids `0..count`, rates drawn uniformly
    /// from `[rate_min, rate_max]`.
    pub fn new(count: u32, rate_min: u32, rate_max: u32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let channels = (0..count)
            .map(|id| {
                let data_rate = rng.random_range(rate_min..=rate_max);
                (
                    id,
                    Channel {
                        id,
                        data_rate,
                        state: ChannelState::Free,
                        owner: None,
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(PoolInner { channels, rng }),
            rate_min,
            rate_max,
        }
    }

    /// Provisions the pool from an explicit inventory of `(id, data_rate)`.
    pub fn from_inventory(
        inventory: impl IntoIterator<Item = (u32, u32)>,
        rate_min: u32,
        rate_max: u32,
    ) -> Self {
        let channels = inventory
            .into_iter()
            .map(|(id, data_rate)| {
                (
                    id,
                    Channel {
                        id,
                        data_rate,
                        state: ChannelState::Free,
                        owner: None,
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                channels,
                rng: StdRng::from_os_rng(),
            }),
            rate_min,
            rate_max,
        }
    }

    /// Free channels in ascending id order.
    pub fn list_free(&self) -> Vec<Channel> {
        let inner = self.lock();
        inner
            .channels
            .values()
            .filter(|c| c.state == ChannelState::Free)
            .cloned()
            .collect()
    }

    /// Marks a free channel as allocated to `requester`.
    pub fn allocate(&self, channel_id: u32, requester: &str) -> Result<()> {
        let mut inner = self.lock();
        let channel = inner
            .channels
            .get_mut(&channel_id)
            .ok_or(SchedError::NotFound {
                entity: "channel",
                id: channel_id.to_string(),
            })?;
        if channel.state != ChannelState::Free {
            return Err(SchedError::Conflict { channel_id });
        }
        channel.state = ChannelState::Allocated;
        channel.owner = Some(requester.to_string());
        Ok(())
    }

    /// Returns a channel to the free set after use and redraws its rate.
    ///
    /// Returns the rate the channel had while it was held, which is what the
    /// caller needs to account delivered work.
    pub fn release(&self, channel_id: u32) -> Result<u32> {
        let (rate_min, rate_max) = (self.rate_min, self.rate_max);
        let mut inner = self.lock();
        let redrawn = inner.rng.random_range(rate_min..=rate_max);
        let channel = inner
            .channels
            .get_mut(&channel_id)
            .ok_or(SchedError::NotFound {
                entity: "channel",
                id: channel_id.to_string(),
            })?;
        let held_rate = channel.data_rate;
        channel.state = ChannelState::Free;
        channel.owner = None;
        channel.data_rate = redrawn;
        Ok(held_rate)
    }

    /// Rolls back an allocation that was never used.
    ///
    /// Unlike [`release`](Self::release) this keeps the characterised rate,
    /// since the channel never carried traffic. Used when the ledger write of
    /// a commit fails and the channel mutation must be undone.
    pub fn revert_allocation(&self, channel_id: u32) -> Result<()> {
        let mut inner = self.lock();
        let channel = inner
            .channels
            .get_mut(&channel_id)
            .ok_or(SchedError::NotFound {
                entity: "channel",
                id: channel_id.to_string(),
            })?;
        channel.state = ChannelState::Free;
        channel.owner = None;
        Ok(())
    }

    pub fn get(&self, channel_id: u32) -> Option<Channel> {
        self.lock().channels.get(&channel_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().channels.is_empty()
    }

    pub fn allocated_count(&self) -> usize {
        self.lock()
            .channels
            .values()
            .filter(|c| c.state == ChannelState::Allocated)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // A poisoned pool mutex means a panic mid-mutation; state cannot be
        // trusted past that point.
        self.inner.lock().expect("channel pool mutex poisoned")
    }
}
