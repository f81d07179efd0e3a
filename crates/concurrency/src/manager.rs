//! Transaction manager
//!
//! Holds what every transaction of one runtime shares: the global commit
//! clock, the item limits and the lock discipline. There is no global lock;
//! transactions only meet at the clock's fetch-and-add and at the versioned
//! locks of the objects they touch.

use stoa_core::{CommitClock, Limits, LockDiscipline};
use stoa_reclaim::ThreadHandle;

use crate::transaction::Transaction;

/// Shared state of all transactions of one runtime
#[derive(Debug)]
pub struct TransactionManager {
    clock: CommitClock,
    limits: Limits,
    discipline: LockDiscipline,
}

impl TransactionManager {
    /// Create a manager with a fresh clock
    pub fn new(limits: Limits, discipline: LockDiscipline) -> Self {
        Self {
            clock: CommitClock::new(),
            limits,
            discipline,
        }
    }

    /// Begin a transaction for the worker owning `thread`
    pub fn begin<'a>(&'a self, thread: &'a ThreadHandle) -> Transaction<'a> {
        Transaction::begin(self, thread)
    }

    /// Global commit clock
    pub fn clock(&self) -> &CommitClock {
        &self.clock
    }

    /// Item limits
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Write-lock ordering used by every commit
    pub fn discipline(&self) -> LockDiscipline {
        self.discipline
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(Limits::default(), LockDiscipline::default())
    }
}
