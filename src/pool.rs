use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::TetherResult;
use crate::error::RpcClientError;
use crate::transport::StreamTransport;
use crate::util::lock_unpoisoned;

pub const DEFAULT_STREAMS_PER_CHANNEL: usize = 100;

pub struct StreamChannel {
    index: usize,
    capacity: usize,
    transport: Arc<dyn StreamTransport>,
    permits: Arc<Semaphore>,
    occupants: Mutex<BTreeSet<u64>>,
}

impl StreamChannel {
    fn new(index: usize, capacity: usize, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            index,
            capacity,
            transport,
            permits: Arc::new(Semaphore::new(capacity)),
            occupants: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupancy(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    pub fn occupant_ids(&self) -> Vec<u64> {
        lock_unpoisoned(&self.occupants).iter().copied().collect()
    }

    pub(crate) fn transport(&self) -> Arc<dyn StreamTransport> {
        Arc::clone(&self.transport)
    }

    fn try_reserve(self: &Arc<Self>, subscription_id: u64) -> Option<SlotHandle> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        lock_unpoisoned(&self.occupants).insert(subscription_id);
        Some(SlotHandle {
            channel: Arc::clone(self),
            subscription_id,
            _permit: permit,
        })
    }
}

/// Fixed set of stream channels, each carrying at most `capacity_per_channel`
/// concurrent subscriptions.
pub struct ChannelPool {
    channels: Vec<Arc<StreamChannel>>,
    capacity_per_channel: usize,
}

impl ChannelPool {
    pub fn new(transports: Vec<Arc<dyn StreamTransport>>, capacity_per_channel: usize) -> Self {
        let capacity_per_channel = capacity_per_channel.max(1);
        let channels = transports
            .into_iter()
            .enumerate()
            .map(|(index, transport)| {
                Arc::new(StreamChannel::new(index, capacity_per_channel, transport))
            })
            .collect();
        Self {
            channels,
            capacity_per_channel,
        }
    }

    /// Claims a slot on the first channel with spare capacity. A fully
    /// packed pool fails immediately instead of queueing.
    pub fn allocate(&self, subscription_id: u64) -> TetherResult<SlotHandle> {
        for channel in &self.channels {
            if let Some(slot) = channel.try_reserve(subscription_id) {
                debug!(
                    channel = channel.index(),
                    occupancy = channel.occupancy(),
                    subscription_id,
                    "reserved subscription slot"
                );
                return Ok(slot);
            }
        }
        warn!(
            channels = self.channels.len(),
            capacity_per_channel = self.capacity_per_channel,
            "subscription capacity exhausted"
        );
        Err(RpcClientError::PoolExhausted {
            channels: self.channels.len(),
            capacity_per_channel: self.capacity_per_channel,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn total_capacity(&self) -> usize {
        self.channels.len() * self.capacity_per_channel
    }

    pub fn occupancy(&self) -> usize {
        self.channels.iter().map(|channel| channel.occupancy()).sum()
    }
}

/// Holds one subscription slot on one channel for as long as the
/// subscription lives. Dropping the handle frees the slot for immediate
/// reuse; reconnects of the same subscription keep the same slot.
pub struct SlotHandle {
    channel: Arc<StreamChannel>,
    subscription_id: u64,
    _permit: OwnedSemaphorePermit,
}

impl SlotHandle {
    pub fn channel_index(&self) -> usize {
        self.channel.index()
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    pub(crate) fn transport(&self) -> Arc<dyn StreamTransport> {
        self.channel.transport()
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SlotHandle")
            .field("channel", &self.channel.index())
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        lock_unpoisoned(&self.channel.occupants).remove(&self.subscription_id);
        debug!(
            channel = self.channel.index(),
            subscription_id = self.subscription_id,
            "released subscription slot"
        );
    }
}
