//! Set of channels currently streaming to this server.
//!
//! Admission (capacity check, duplicate check, insert) happens under one
//! `std::sync::Mutex`. The lock is never held across an `.await`.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use dvrelay_core::{Channel, MAX_CHANNELS};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("all {max} channel slots are taken")]
    Full { max: usize },
    #[error("channel {0} is already streaming")]
    InUse(Channel),
}

#[derive(Debug)]
pub struct ChannelRegistry {
    active: Mutex<BTreeSet<Channel>>,
    capacity: usize,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CHANNELS as usize)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { active: Mutex::new(BTreeSet::new()), capacity }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<Channel>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admissible(&self, active: &BTreeSet<Channel>, channel: Channel) -> Result<(), AdmissionError> {
        if active.len() >= self.capacity {
            return Err(AdmissionError::Full { max: self.capacity });
        }
        if active.contains(&channel) {
            return Err(AdmissionError::InUse(channel));
        }
        Ok(())
    }

    /// Would `channel` be admitted right now? Does not register it.
    pub fn check(&self, channel: Channel) -> Result<(), AdmissionError> {
        let active = self.lock();
        self.admissible(&active, channel)
    }

    /// Registers `channel` if there is room and nobody holds it.
    pub fn try_register(&self, channel: Channel) -> bool {
        let mut active = self.lock();
        if self.admissible(&active, channel).is_err() {
            return false;
        }
        active.insert(channel)
    }

    /// Removes `channel`. Unknown channels are ignored.
    pub fn unregister(&self, channel: Channel) {
        if self.lock().remove(&channel) {
            debug!("Channel[{}] released", channel);
        }
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        self.lock().contains(&channel)
    }

    /// Registers `channel` and returns a lease that releases it on drop.
    pub fn admit(self: &Arc<Self>, channel: Channel) -> Result<ChannelLease, AdmissionError> {
        let mut active = self.lock();
        self.admissible(&active, channel)?;
        active.insert(channel);
        Ok(ChannelLease { registry: Arc::clone(self), channel })
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of one registered channel.
#[derive(Debug)]
pub struct ChannelLease {
    registry: Arc<ChannelRegistry>,
    channel: Channel,
}

impl ChannelLease {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.registry.unregister(self.channel);
    }
}
