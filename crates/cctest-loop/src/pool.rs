//! First-free allocation over a finite set of loop slots.
//!
//! There is no central allocator: candidates are probed in ascending index
//! order and the first one the caller manages to claim wins. Two pools on
//! the same host can race for a slot unless the caller serializes claims
//! (see [`crate::lock`]).

use std::path::PathBuf;

use cctest_common::config::LoopConfig;
use cctest_common::error::Result;

/// A candidate slot: its index and the device node it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Index within the pool, starting at 0.
    pub index: u32,
    /// Device node path for this slot.
    pub device: PathBuf,
}

/// Outcome of one claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The slot is now ours.
    Claimed,
    /// The slot is taken or unusable; try the next one.
    Busy {
        /// Why the slot was refused, usually the tool's stderr.
        reason: String,
    },
}

/// A fixed-size pool of slots named `<prefix><index>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPool {
    prefix: String,
    capacity: u32,
}

impl SlotPool {
    /// Creates a pool of `capacity` slots named `<prefix>0..<prefix>{capacity-1}`.
    #[must_use]
    pub fn new(prefix: impl Into<String>, capacity: u32) -> Self {
        Self {
            prefix: prefix.into(),
            capacity,
        }
    }

    /// Creates the pool described by a loop configuration.
    #[must_use]
    pub fn from_config(config: &LoopConfig) -> Self {
        Self::new(config.device_prefix.clone(), config.max_tries)
    }

    /// Number of slots in the pool.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the slot at `index`.
    #[must_use]
    pub fn slot(&self, index: u32) -> Slot {
        Slot {
            index,
            device: PathBuf::from(format!("{}{index}", self.prefix)),
        }
    }

    /// Iterates candidates in ascending index order.
    pub fn candidates(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.capacity).map(|index| self.slot(index))
    }

    /// Offers each candidate to `claim` and returns the first one claimed,
    /// or `None` once the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `claim`; remaining candidates
    /// are not tried.
    pub fn allocate<F>(&self, mut claim: F) -> Result<Option<Slot>>
    where
        F: FnMut(&Slot) -> Result<Claim>,
    {
        for slot in self.candidates() {
            match claim(&slot)? {
                Claim::Claimed => return Ok(Some(slot)),
                Claim::Busy { reason } => {
                    tracing::trace!(
                        device = %slot.device.display(),
                        reason = %reason.trim(),
                        "slot busy"
                    );
                }
            }
        }
        Ok(None)
    }
}
