//! The transactional object contract
//!
//! Any data structure that wants to take part in transactions implements
//! [`TObject`]. The engine never looks inside an object: it hands items back
//! to their owner at each step of the commit protocol and trusts the owner
//! to lock, validate and install the key the item names.
//!
//! Objects see the transaction through [`TxnCtx`], a read-only view that
//! exposes the owning thread, the commit id, lock helpers and the deferred
//! free API.

use stoa_core::{Version, VersionedLock};
use stoa_reclaim::ThreadHandle;

use crate::item::TransItem;
use crate::transaction::TxnState;

/// Contract between the engine and a transactional data structure
///
/// | Step | Called |
/// |---|---|
/// | `lock` | commit phase 1, once per write item |
/// | `check` | commit phase 2 and during opacity checks, per read item |
/// | `check_predicate` | commit phase 2 and during opacity checks, per predicate-only item |
/// | `install` | commit phase 3, per write item, lock held |
/// | `cleanup` | after commit or abort, per write item, newest first |
/// | `unlock` | last, per item whose lock is held |
pub trait TObject {
    /// Acquire exclusive access to the item's key
    ///
    /// Returns `false` if another transaction holds it. Must succeed if this
    /// transaction already holds it.
    fn lock(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) -> bool;

    /// Release what `lock` acquired
    ///
    /// Called once per item whose lock is held. Items that share one lock
    /// word each get the call, so releasing must tolerate a word that is
    /// already released; [`TxnCtx::unlock`] does.
    fn unlock(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>);

    /// Whether the item's read snapshot is still current
    ///
    /// A key locked by this same transaction counts as current when the
    /// version matches.
    fn check(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>) -> bool;

    /// Apply the item's write payload and stamp the key's version
    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>);

    /// Whether the item's predicate holds against current state
    ///
    /// `committing` is true during commit, when the write set is locked.
    /// Objects that never record predicates can keep the default, which
    /// refuses.
    fn check_predicate(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>, committing: bool) -> bool {
        let _ = (item, ctx, committing);
        false
    }

    /// Post-commit or post-abort bookkeeping
    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool) {
        let _ = (item, committed);
    }

    /// Short name used in logs
    fn name(&self) -> &'static str {
        "object"
    }
}

/// What an object may see of the transaction it serves
pub struct TxnCtx<'a> {
    pub(crate) thread: &'a ThreadHandle,
    pub(crate) state: TxnState,
    pub(crate) start_tid: u64,
    pub(crate) commit_tid: Option<Version>,
    pub(crate) spin_bound: u32,
}

impl<'a> TxnCtx<'a> {
    pub(crate) fn new(thread: &'a ThreadHandle, start_tid: u64, spin_bound: u32) -> Self {
        Self {
            thread,
            state: TxnState::InProgress,
            start_tid,
            commit_tid: None,
            spin_bound,
        }
    }

    /// Owner tag of the transaction's thread
    pub fn thread_id(&self) -> stoa_core::ThreadId {
        self.thread.id()
    }

    /// Current state
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Clock value the transaction's snapshot is consistent with
    pub fn start_tid(&self) -> u64 {
        self.start_tid
    }

    /// Commit id; assigned once the write set is locked
    pub fn commit_tid(&self) -> Version {
        debug_assert!(self.commit_tid.is_some(), "commit id read before it was assigned");
        self.commit_tid.unwrap_or_default()
    }

    /// Whether a commit id has been assigned
    pub fn has_commit_tid(&self) -> bool {
        self.commit_tid.is_some()
    }

    /// Lock `lock` for this transaction's thread, spinning a bounded number
    /// of times
    pub fn try_lock(&self, lock: &VersionedLock) -> bool {
        lock.lock_bounded(self.thread_id(), self.spin_bound)
    }

    /// Release `lock` if this transaction's thread holds it
    pub fn unlock(&self, lock: &VersionedLock) -> bool {
        lock.unlock(self.thread_id())
    }

    /// Current version of `lock` still matches `read`, treating a lock held
    /// by this transaction as unlocked
    pub fn check_version(&self, lock: &VersionedLock, read: Version) -> bool {
        lock.load().check_version(read, self.thread_id())
    }

    /// Retire a resource through the epoch reclaimer
    pub fn defer<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.thread.defer(callback);
    }

    /// Retire a heap value through the epoch reclaimer
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) {
        self.thread.defer_drop(value);
    }
}

impl std::fmt::Debug for TxnCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnCtx")
            .field("thread", &self.thread.id())
            .field("state", &self.state)
            .field("start_tid", &self.start_tid)
            .field("commit_tid", &self.commit_tid)
            .finish()
    }
}
