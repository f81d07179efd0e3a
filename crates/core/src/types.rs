//! Core identifier types
//!
//! - ThreadId: small integer naming a registered worker slot
//! - Epoch: reclamation epoch

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tid::THREAD_MASK;

/// Identifier of a registered worker thread
///
/// Fits in the owner tag of a versioned lock word, so there can be at most
/// [`ThreadId::MAX_THREADS`] of them alive at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(u8);

impl ThreadId {
    /// Number of distinct ids the owner tag can hold
    pub const MAX_THREADS: usize = (THREAD_MASK as usize) + 1;

    /// Wrap a raw id; the value is truncated to the owner-tag width
    pub const fn from_raw(raw: u8) -> Self {
        ThreadId(raw & THREAD_MASK as u8)
    }

    /// Slot index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// As the low bits of a lock word
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Reclamation epoch
///
/// Epochs only grow. `Epoch::QUIESCENT` (zero) is reserved for "not inside a
/// transaction" in per-thread slots and is never a live epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epoch(u64);

impl Epoch {
    /// Marker for an idle slot
    pub const QUIESCENT: Epoch = Epoch(0);

    /// Wrap a raw epoch
    pub const fn new(raw: u64) -> Self {
        Epoch(raw)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the idle marker
    pub const fn is_quiescent(self) -> bool {
        self.0 == 0
    }

    /// The epoch after this one
    pub const fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_truncates_to_owner_tag() {
        assert_eq!(ThreadId::from_raw(5).index(), 5);
        assert_eq!(ThreadId::from_raw(200).index(), 200 & 0x7F);
        assert_eq!(ThreadId::MAX_THREADS, 128);
    }

    #[test]
    fn test_epoch_ordering() {
        let e = Epoch::new(4);
        assert!(e < e.next());
        assert!(Epoch::QUIESCENT.is_quiescent());
        assert!(!e.is_quiescent());
        assert_eq!(e.to_string(), "e4");
    }
}
