//! Epoch-based reclamation
//!
//! Three process-wide counters drive reclamation:
//!
//! - `global`: advanced by the advancer; the epoch new readers announce.
//! - `read`: minimum write-snapshot epoch of any in-flight writer.
//! - `active`: minimum epoch any worker might still be reading under.
//!
//! A resource retired at epoch `E` is released once `active > E`. Every
//! worker that could still hold a reference announced an epoch `<= E` before
//! it read, and `active` never passes an announced epoch while the worker is
//! inside its transaction.
//!
//! # Memory Ordering
//!
//! Epoch announcement, the advancer's slot scan and the retire-time load of
//! `global` are all `SeqCst`. The announcement loop re-reads `global` after
//! publishing, so an advancer that missed the announcement cannot have
//! bumped `global` past it either.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stoa_core::{Epoch, Error, Result, ThreadId};
use tracing::{debug, info, warn};

use crate::rcu::{run_all, Deferred};
use crate::registry::{ThreadRegistry, ThreadSlot};

const INITIAL_GLOBAL: u64 = 2;
const INITIAL_ACTIVE: u64 = 1;

/// Process-wide epoch state plus the worker registry it scans
#[derive(Debug)]
pub struct Reclaimer {
    registry: ThreadRegistry,
    global: AtomicU64,
    read: AtomicU64,
    active: AtomicU64,
    /// Serializes advances and teardown
    advance_lock: Mutex<()>,
}

impl Reclaimer {
    /// New reclaimer with `max_threads` worker slots
    pub fn new(max_threads: usize) -> Self {
        Self {
            registry: ThreadRegistry::new(max_threads),
            global: AtomicU64::new(INITIAL_GLOBAL),
            read: AtomicU64::new(INITIAL_ACTIVE),
            active: AtomicU64::new(INITIAL_ACTIVE),
            advance_lock: Mutex::new(()),
        }
    }

    /// Claim a worker slot for the calling thread
    ///
    /// # Errors
    ///
    /// Returns `Error::RegistryFull` when every slot is taken.
    pub fn register(self: &Arc<Self>) -> Result<ThreadHandle> {
        let id = self.registry.claim().ok_or(Error::RegistryFull {
            capacity: self.registry.capacity(),
        })?;
        debug!(target: "stoa::epoch", thread = %id, "Worker registered");
        Ok(ThreadHandle {
            reclaimer: Arc::clone(self),
            id,
            depth: Cell::new(0),
            _not_send: PhantomData,
        })
    }

    /// Worker registry
    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    /// Current global epoch
    pub fn global_epoch(&self) -> Epoch {
        Epoch::new(self.global.load(Ordering::SeqCst))
    }

    /// Oldest write snapshot any in-flight writer holds
    pub fn read_epoch(&self) -> Epoch {
        Epoch::new(self.read.load(Ordering::Acquire))
    }

    /// Resources retired strictly before this epoch are released
    pub fn active_epoch(&self) -> Epoch {
        Epoch::new(self.active.load(Ordering::Acquire))
    }

    /// Deferred frees not yet released, across all slots
    pub fn pending(&self) -> usize {
        self.registry.slots().map(ThreadSlot::pending).sum()
    }

    /// One advancer step
    ///
    /// Recomputes `read` and `active` from the announced per-worker epochs,
    /// bumps `global`, then releases whatever became safe. Returns the new
    /// global epoch.
    pub fn advance_once(&self) -> Epoch {
        let active = {
            let _guard = self.advance_lock.lock();
            self.step()
        };

        for slot in self.registry.slots() {
            if let Some(mut queue) = slot.queue.try_lock() {
                let ready = queue.take_ready(active);
                drop(queue);
                run_all(ready);
            }
        }
        self.global_epoch()
    }

    /// Release every pending resource no worker can still see
    ///
    /// Meant for teardown. Advances until every queue is empty. A worker
    /// still inside a transaction pins the epoch it announced: resources
    /// retired at or after it stay queued, and the drain stops once no
    /// further progress is possible. Returns the number released.
    pub fn release_all(&self) -> usize {
        let _guard = self.advance_lock.lock();
        let mut released = 0;
        let mut stalled = 0;
        loop {
            let bound = self.step();
            let mut freed = 0;
            let mut remaining = 0;
            for slot in self.registry.slots() {
                let ready: Vec<Deferred> = slot.queue.lock().take_ready(bound);
                freed += run_all(ready);
                remaining += slot.pending();
            }
            released += freed;
            if remaining == 0 {
                break;
            }
            // two rounds cover everything retired at the current epoch
            stalled = if freed == 0 { stalled + 1 } else { 0 };
            if stalled >= 2 {
                let busy = self
                    .registry
                    .slots()
                    .filter(|s| !s.epoch().is_quiescent())
                    .count();
                warn!(target: "stoa::epoch", busy, remaining, "Deferred frees left pending behind active workers");
                break;
            }
        }
        info!(target: "stoa::epoch", released, "Deferred frees drained");
        released
    }

    /// Recompute `read` and `active`, then bump `global`; caller holds
    /// `advance_lock`
    fn step(&self) -> Epoch {
        let g = self.global.load(Ordering::SeqCst);
        let mut active = g;
        let mut read = g;
        for slot in self.registry.slots() {
            let e = slot.epoch.load(Ordering::SeqCst);
            if e != 0 {
                active = active.min(e);
            }
            let w = slot.write_snapshot.load(Ordering::Acquire);
            if w != 0 {
                read = read.min(w);
            }
        }
        self.active.fetch_max(active, Ordering::AcqRel);
        self.read.fetch_max(read, Ordering::AcqRel);
        self.global.store(g + 1, Ordering::SeqCst);
        debug!(target: "stoa::epoch", global = g + 1, active, read, "Epoch advanced");
        Epoch::new(self.active.load(Ordering::Acquire))
    }

    fn announce(&self, slot: &ThreadSlot) -> Epoch {
        loop {
            let g = self.global.load(Ordering::SeqCst);
            slot.epoch.store(g, Ordering::SeqCst);
            if self.global.load(Ordering::SeqCst) == g {
                return Epoch::new(g);
            }
        }
    }
}

/// A registered worker
///
/// Owns one registry slot for its lifetime. The handle is neither `Send` nor
/// `Sync`: everything a worker does through it happens on the thread that
/// registered.
pub struct ThreadHandle {
    reclaimer: Arc<Reclaimer>,
    id: ThreadId,
    depth: Cell<u32>,
    _not_send: PhantomData<*const ()>,
}

impl ThreadHandle {
    /// Slot id, also the owner tag for lock words
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Shared reclaimer
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    fn slot(&self) -> &ThreadSlot {
        self.reclaimer.registry.slot(self.id)
    }

    /// Enter a transaction
    ///
    /// The outermost entry announces the current global epoch and releases
    /// this worker's own resources that have become safe. Nested entries
    /// only count.
    pub fn enter(&self) -> Epoch {
        let depth = self.depth.get();
        self.depth.set(depth + 1);
        if depth > 0 {
            return self.slot().epoch();
        }
        let epoch = self.reclaimer.announce(self.slot());
        self.reclaim();
        epoch
    }

    /// Leave a transaction; the outermost exit goes quiescent
    pub fn exit(&self) {
        let depth = self.depth.get();
        debug_assert!(depth > 0, "exit without matching enter");
        let depth = depth.saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 {
            self.slot().write_snapshot.store(0, Ordering::Release);
            self.slot().epoch.store(0, Ordering::SeqCst);
        }
    }

    /// Whether the worker is inside a transaction
    pub fn in_transaction(&self) -> bool {
        self.depth.get() > 0
    }

    /// Announced epoch, quiescent outside transactions
    pub fn epoch(&self) -> Epoch {
        self.slot().epoch()
    }

    /// Record that the current transaction is about to retire resources
    pub fn mark_write_snapshot(&self) {
        let slot = self.slot();
        if slot.write_snapshot.load(Ordering::Relaxed) == 0 {
            slot.write_snapshot
                .store(slot.epoch.load(Ordering::Relaxed), Ordering::Release);
        }
    }

    /// Retire a resource; `callback` runs once no reader can still see it
    pub fn defer<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let epoch = self.reclaimer.global_epoch();
        self.slot().queue.lock().push(epoch, Box::new(callback));
    }

    /// Retire a heap value; it is dropped once no reader can still see it
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) {
        self.defer(move || drop(value));
    }

    /// Release this worker's resources that are already safe
    pub fn reclaim(&self) -> usize {
        let bound = self.reclaimer.active_epoch();
        let ready = self.slot().queue.lock().take_ready(bound);
        run_all(ready)
    }

    /// Resources this worker has retired but not yet released
    pub fn pending(&self) -> usize {
        self.slot().pending()
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.id)
            .field("depth", &self.depth.get())
            .finish()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        debug_assert_eq!(self.depth.get(), 0, "worker dropped inside a transaction");
        self.reclaimer.registry.release(self.id);
        debug!(target: "stoa::epoch", thread = %self.id, "Worker released");
    }
}
