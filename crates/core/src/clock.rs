//! Global commit clock
//!
//! A single atomic counter hands out commit ids. `next()` returns the value
//! before the increment, so the clock always reads one step ahead of the
//! newest id handed out. A transaction whose start snapshot is `clock.now()`
//! therefore sees every already-assigned id as strictly older.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::tid::{Version, INCREMENT};

/// Monotonic source of commit ids
#[derive(Debug)]
pub struct CommitClock {
    next: AtomicU64,
}

impl CommitClock {
    /// Initial clock value; keeps every commit id away from zero
    pub const START: u64 = 3 * INCREMENT;

    /// New clock at [`CommitClock::START`]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(Self::START),
        }
    }

    /// Current clock value, used as a transaction's start snapshot
    pub fn now(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Allocate a commit id
    pub fn next(&self) -> Version {
        Version::from_raw(self.next.fetch_add(INCREMENT, Ordering::AcqRel))
    }
}

impl Default for CommitClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_commit_id_is_nonzero() {
        let clock = CommitClock::new();
        let id = clock.next();
        assert_ne!(id.raw(), 0);
        assert_eq!(id.raw(), CommitClock::START);
        assert_eq!(clock.now(), CommitClock::START + INCREMENT);
    }

    #[test]
    fn test_ids_are_unique_and_stepped() {
        let clock = Arc::new(CommitClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..1000).map(|_| clock.next().raw()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
        assert!(all.iter().all(|id| id % INCREMENT == 0));
    }
}
