//! Bounded registry of worker slots
//!
//! Slots live in a fixed array sized at startup. A worker claims a free slot
//! on registration and gives it back when its [`ThreadHandle`] drops; the
//! slot index doubles as the owner tag written into lock words.
//!
//! [`ThreadHandle`]: crate::ThreadHandle

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use stoa_core::{Epoch, ThreadId};

use crate::rcu::RcuQueue;

/// Per-worker state shared with the epoch advancer
#[derive(Debug, Default)]
pub struct ThreadSlot {
    in_use: AtomicBool,
    /// Epoch the worker is reading under, zero when outside a transaction
    pub(crate) epoch: AtomicU64,
    /// Epoch at which the worker's current transaction started writing
    pub(crate) write_snapshot: AtomicU64,
    pub(crate) queue: Mutex<RcuQueue>,
}

impl ThreadSlot {
    /// Whether a worker currently owns the slot
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Announced reading epoch
    pub fn epoch(&self) -> Epoch {
        Epoch::new(self.epoch.load(Ordering::SeqCst))
    }

    /// Announced write-snapshot epoch
    pub fn write_snapshot(&self) -> Epoch {
        Epoch::new(self.write_snapshot.load(Ordering::Acquire))
    }

    /// Deferred frees queued in this slot
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Fixed-capacity table of worker slots
#[derive(Debug)]
pub struct ThreadRegistry {
    slots: Box<[ThreadSlot]>,
}

impl ThreadRegistry {
    /// Registry with `capacity` slots, clamped to what the owner tag encodes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, ThreadId::MAX_THREADS);
        let slots = (0..capacity).map(|_| ThreadSlot::default()).collect();
        Self { slots }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the lowest free slot
    pub fn claim(&self) -> Option<ThreadId> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .ok()
                .map(|_| ThreadId::from_raw(i as u8))
        })
    }

    /// Return a slot; its queue stays behind for the advancer to drain
    pub fn release(&self, id: ThreadId) {
        let slot = self.slot(id);
        slot.epoch.store(0, Ordering::SeqCst);
        slot.write_snapshot.store(0, Ordering::Release);
        slot.in_use.store(false, Ordering::Release);
    }

    /// Slot for `id`
    pub fn slot(&self, id: ThreadId) -> &ThreadSlot {
        &self.slots[id.index()]
    }

    /// All slots, claimed or not
    pub fn slots(&self) -> impl Iterator<Item = &ThreadSlot> {
        self.slots.iter()
    }

    /// Number of claimed slots
    pub fn registered(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_lowest_free() {
        let registry = ThreadRegistry::new(4);
        let a = registry.claim().unwrap();
        let b = registry.claim().unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        registry.release(a);
        assert_eq!(registry.claim().unwrap().index(), 0);
        assert_eq!(registry.registered(), 2);
    }

    #[test]
    fn test_claim_fails_when_full() {
        let registry = ThreadRegistry::new(2);
        assert!(registry.claim().is_some());
        assert!(registry.claim().is_some());
        assert!(registry.claim().is_none());
    }

    #[test]
    fn test_capacity_clamped_to_owner_tag() {
        assert_eq!(ThreadRegistry::new(1000).capacity(), 128);
        assert_eq!(ThreadRegistry::new(0).capacity(), 1);
    }

    #[test]
    fn test_release_clears_epochs() {
        let registry = ThreadRegistry::new(1);
        let id = registry.claim().unwrap();
        registry.slot(id).epoch.store(7, Ordering::SeqCst);
        registry.slot(id).write_snapshot.store(7, Ordering::SeqCst);
        registry.release(id);
        assert!(registry.slot(id).epoch().is_quiescent());
        assert!(registry.slot(id).write_snapshot().is_quiescent());
        assert!(!registry.slot(id).in_use());
    }
}
