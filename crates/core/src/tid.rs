//! Versioned lock words
//!
//! Every transactional resource carries one 64-bit word that packs a
//! monotonically increasing counter together with a lock bit, an owner tag,
//! and two status bits:
//!
//! ```text
//!  63                                  10   9    8     7    6      0
//! +--------------------------------------+----+-----+-----+--------+
//! |               counter                |user|nonop|lock | owner  |
//! +--------------------------------------+----+-----+-----+--------+
//! ```
//!
//! The counter only moves forward, by multiples of [`INCREMENT`]. Everything
//! below [`INCREMENT`] is status and is ignored by [`Version::same_version`].
//!
//! [`Version`] is the plain value type; [`VersionedLock`] is the atomic cell
//! that objects embed and that commit-time locking operates on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ThreadId;

/// Mask of the owner-tag bits
pub const THREAD_MASK: u64 = 0x7F;
/// Set while a committing transaction holds the word
pub const LOCK_BIT: u64 = 1 << 7;
/// Set on versions stamped without a commit id
pub const NONOPAQUE_BIT: u64 = 1 << 8;
/// Object-defined status bit, carried across installs at the object's choice
pub const USER_BIT: u64 = 1 << 9;
/// Counter step between two successive versions
pub const INCREMENT: u64 = 1 << 10;
/// Everything below the counter
pub const STATUS_MASK: u64 = INCREMENT - 1;

/// A snapshot of a versioned lock word
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly constructed object
    pub const INITIAL: Version = Version(0);

    /// Wrap a raw word
    pub const fn from_raw(raw: u64) -> Self {
        Version(raw)
    }

    /// The raw word
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The counter portion, with every status bit cleared
    pub const fn counter(self) -> u64 {
        self.0 & !STATUS_MASK
    }

    /// Whether the lock bit is set
    pub const fn is_locked(self) -> bool {
        self.0 & LOCK_BIT != 0
    }

    /// Owner tag; only meaningful while locked
    pub const fn owner(self) -> ThreadId {
        ThreadId::from_raw((self.0 & THREAD_MASK) as u8)
    }

    /// Locked by `here`
    pub fn is_locked_here(self, here: ThreadId) -> bool {
        self.is_locked() && self.owner() == here
    }

    /// Locked by any thread other than `here`
    pub fn is_locked_elsewhere(self, here: ThreadId) -> bool {
        self.is_locked() && self.owner() != here
    }

    /// Whether this version was stamped without a commit id
    pub const fn is_nonopaque(self) -> bool {
        self.0 & NONOPAQUE_BIT != 0
    }

    /// Whether the object-defined user bit is set
    pub const fn has_user_bit(self) -> bool {
        self.0 & USER_BIT != 0
    }

    /// Compare counters, ignoring lock, owner and status bits
    pub const fn same_version(self, other: Version) -> bool {
        (self.0 ^ other.0) & !STATUS_MASK == 0
    }

    /// Like [`same_version`](Self::same_version), but fails when `self` is
    /// locked by a thread other than `here`
    pub fn check_version(self, old: Version, here: ThreadId) -> bool {
        self.same_version(old) && !self.is_locked_elsewhere(here)
    }

    /// The version a non-opaque install moves to: one step past the current
    /// counter, flagged non-opaque
    pub const fn next_nonopaque(self) -> Version {
        Version(self.counter().wrapping_add(INCREMENT) | NONOPAQUE_BIT)
    }

    /// Fast opacity test
    ///
    /// True when `self` was committed strictly before `start` and is neither
    /// locked nor non-opaque; such a read cannot break the snapshot the
    /// transaction started from.
    pub const fn try_check_opacity(self, start: u64) -> bool {
        (start.wrapping_sub(self.0) as i64) > 0 && self.0 & (LOCK_BIT | NONOPAQUE_BIT) == 0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({:#x}", self.counter())?;
        if self.is_locked() {
            write!(f, " locked by {}", self.owner())?;
        }
        if self.is_nonopaque() {
            f.write_str(" nonopaque")?;
        }
        if self.has_user_bit() {
            f.write_str(" user")?;
        }
        f.write_str(")")
    }
}

/// Atomic versioned lock word
///
/// # Memory Ordering
///
/// Loads use `Acquire` so that data read after observing an unlocked version
/// is at least as new as that version. Every store that releases the lock uses
/// `Release`, so the next acquirer observes the installed data.
#[derive(Default)]
pub struct VersionedLock {
    word: AtomicU64,
}

impl VersionedLock {
    /// New, unlocked word at `version`
    pub const fn new(version: Version) -> Self {
        Self {
            word: AtomicU64::new(version.0),
        }
    }

    /// Current value
    pub fn load(&self) -> Version {
        Version(self.word.load(Ordering::Acquire))
    }

    /// Single lock attempt on behalf of `owner`
    ///
    /// Returns `true` if the word is now held by `owner`, including the case
    /// where `owner` already held it. Returns `false` if another thread holds
    /// it. A CAS that loses against an unlocked concurrent update is retried,
    /// since the word was never held by anyone else.
    pub fn try_lock(&self, owner: ThreadId) -> bool {
        let mut cur = self.word.load(Ordering::Relaxed);
        loop {
            let v = Version(cur);
            if v.is_locked() {
                return v.owner() == owner;
            }
            let locked = (cur & !THREAD_MASK) | LOCK_BIT | owner.as_u64();
            match self
                .word
                .compare_exchange_weak(cur, locked, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Bounded spin around [`try_lock`](Self::try_lock)
    ///
    /// Gives up after `spin_bound` failed attempts; never blocks.
    pub fn lock_bounded(&self, owner: ThreadId, spin_bound: u32) -> bool {
        let mut spins = 0;
        loop {
            if self.try_lock(owner) {
                return true;
            }
            spins += 1;
            if spins >= spin_bound {
                return false;
            }
            std::hint::spin_loop();
        }
    }

    /// Clear the lock bit and owner tag without touching the counter
    ///
    /// A no-op returning `false` unless `owner` holds the word, so releasing
    /// twice never clears a lock someone else took in between.
    pub fn unlock(&self, owner: ThreadId) -> bool {
        let cur = self.word.load(Ordering::Relaxed);
        if !Version(cur).is_locked_here(owner) {
            return false;
        }
        // only the holder writes a locked word
        self.word
            .store(cur & !(LOCK_BIT | THREAD_MASK), Ordering::Release);
        true
    }

    /// Stamp `new` while keeping the word locked by its current owner
    pub fn set_version(&self, new: Version) {
        let cur = Version(self.word.load(Ordering::Relaxed));
        debug_assert!(cur.is_locked(), "install without holding the lock");
        let stamped = (new.0 & !(LOCK_BIT | THREAD_MASK)) | LOCK_BIT | cur.owner().as_u64();
        self.word.store(stamped, Ordering::Release);
    }

}

impl fmt::Debug for VersionedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VersionedLock").field(&self.load()).finish()
    }
}
