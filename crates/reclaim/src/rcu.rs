//! Per-thread queue of deferred frees
//!
//! Each entry pairs the epoch at which memory was retired with the callback
//! that finally releases it. Entries become runnable once the active epoch
//! has moved past their epoch.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use stoa_core::Epoch;
use tracing::error;

/// A retired resource waiting for its epoch to pass
pub struct Deferred {
    epoch: Epoch,
    callback: Box<dyn FnOnce() + Send>,
}

impl Deferred {
    /// Epoch the resource was retired in
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Release the resource
    pub fn run(self) {
        (self.callback)()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("epoch", &self.epoch).finish()
    }
}

/// FIFO of deferred frees belonging to one worker slot
#[derive(Debug, Default)]
pub struct RcuQueue {
    entries: VecDeque<Deferred>,
}

impl RcuQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire a resource at `epoch`
    pub fn push(&mut self, epoch: Epoch, callback: Box<dyn FnOnce() + Send>) {
        debug_assert!(!epoch.is_quiescent());
        self.entries.push_back(Deferred { epoch, callback });
    }

    /// Detach every entry whose epoch is strictly below `bound`
    ///
    /// The entries are returned rather than run, so callers can release the
    /// queue's lock before running foreign drop code.
    pub fn take_ready(&mut self, bound: Epoch) -> Vec<Deferred> {
        let mut ready = Vec::new();
        while let Some(front) = self.entries.front() {
            if front.epoch >= bound {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                ready.push(entry);
            }
        }
        ready
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest pending epoch
    pub fn oldest(&self) -> Option<Epoch> {
        self.entries.front().map(|d| d.epoch)
    }
}

/// Run a batch of detached entries, returning how many were released
///
/// Each callback runs under its own `catch_unwind`: a panicking callback is
/// logged and counted as released, and the rest of the batch still runs.
pub fn run_all(ready: Vec<Deferred>) -> usize {
    let n = ready.len();
    for entry in ready {
        let epoch = entry.epoch;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| entry.run())) {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(target: "stoa::epoch", %epoch, panic = %msg, "Deferred callback panicked");
        }
    }
    n
}
