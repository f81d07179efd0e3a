//! Engine limits and commit policy
//!
//! Limits are fixed when the runtime opens. The defaults match the sizes a
//! typical OLTP-style transaction needs; `with_small_limits()` exists so tests
//! can hit the capacity paths without building huge transactions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::ThreadId;

/// Order in which a committing transaction acquires its write locks
///
/// A deployment picks one; transactions under different disciplines must not
/// share objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDiscipline {
    /// Lock writes in the order they were first registered
    #[default]
    InsertionOrder,
    /// Sort writes by (object, key) before locking
    Sorted,
}

impl fmt::Display for LockDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockDiscipline::InsertionOrder => f.write_str("insertion_order"),
            LockDiscipline::Sorted => f.write_str("sorted"),
        }
    }
}

/// Per-transaction and per-runtime limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of items one transaction may register (default: 32768)
    pub max_items: usize,

    /// Items per arena chunk (default: 512)
    pub item_chunk: usize,

    /// Failed lock attempts before a commit gives up (default: 64)
    pub lock_spin_bound: u32,

    /// Worker slots in the thread registry (default: 128)
    pub max_threads: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_items: 32768,
            item_chunk: 512,
            lock_spin_bound: 64,
            max_threads: ThreadId::MAX_THREADS,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_items: 16,
            item_chunk: 4,
            lock_spin_bound: 4,
            max_threads: 4,
        }
    }

    /// Check that every limit is usable
    pub fn validate(&self) -> Result<(), LimitError> {
        if self.item_chunk == 0 {
            return Err(LimitError::ZeroChunk);
        }
        if self.max_items == 0 {
            return Err(LimitError::ZeroItems);
        }
        if self.lock_spin_bound == 0 {
            return Err(LimitError::ZeroSpinBound);
        }
        if self.max_threads == 0 || self.max_threads > ThreadId::MAX_THREADS {
            return Err(LimitError::ThreadCount {
                requested: self.max_threads,
                max: ThreadId::MAX_THREADS,
            });
        }
        Ok(())
    }
}

/// Invalid limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    /// `item_chunk` must be positive
    #[error("item_chunk must be at least 1")]
    ZeroChunk,

    /// `max_items` must be positive
    #[error("max_items must be at least 1")]
    ZeroItems,

    /// `lock_spin_bound` must be positive
    #[error("lock_spin_bound must be at least 1")]
    ZeroSpinBound,

    /// Thread count outside what the owner tag can encode
    #[error("max_threads must be in 1..={max}, got {requested}")]
    ThreadCount {
        /// Requested slot count
        requested: usize,
        /// Largest supported slot count
        max: usize,
    },
}
