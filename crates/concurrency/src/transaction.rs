//! Per-thread transaction context
//!
//! A `Transaction` collects the items a transaction body touches and drives
//! the commit protocol over them:
//!
//! 1. **Lock**: acquire every write item's lock, in insertion order or sorted
//!    by (object, key) depending on the configured discipline.
//! 2. **Validate**: re-check every read item and every predicate-only item.
//! 3. **Install**: apply every write item, stamping the commit id.
//!
//! Cleanup and unlock run afterwards on both the commit and the abort path.
//!
//! Reads are kept opaque: when a read observes a version newer than the
//! transaction's start snapshot, every earlier read is revalidated before the
//! body may continue.

use smallvec::SmallVec;
use stoa_core::{Abort, AbortReason, ThreadId, TxnResult, Version, VersionedLock};
use stoa_reclaim::ThreadHandle;
use tracing::{debug, trace, warn};

use crate::item::{flags, TransItem};
use crate::item_set::{ItemIdx, ItemSet};
use crate::manager::TransactionManager;
use crate::object::{TObject, TxnCtx};
use crate::payload::Payload;
use crate::predicate::{CmpOp, IntRange};

/// Transaction state machine
///
/// `InProgress` ⇄ `OpacityCheck` while the body runs; `Committing` →
/// `CommittingLocked` during commit; `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxnState {
    /// Body running
    InProgress,
    /// Revalidating earlier reads
    OpacityCheck,
    /// Commit started, no lock taken yet
    Committing,
    /// Commit holds write locks
    CommittingLocked,
    /// Terminal: did not commit
    Aborted,
    /// Terminal: committed
    Committed,
}

impl TxnState {
    /// The body may still register items
    pub fn is_active(self) -> bool {
        self <= TxnState::OpacityCheck
    }

    /// Inside the commit protocol
    pub fn is_committing(self) -> bool {
        matches!(self, TxnState::Committing | TxnState::CommittingLocked)
    }

    /// Terminal state
    pub fn is_finished(self) -> bool {
        self >= TxnState::Aborted
    }
}

/// Summary of what a transaction has registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOperations {
    /// Items with a read snapshot
    pub reads: usize,
    /// Items with a write payload
    pub writes: usize,
    /// Items with a predicate
    pub predicates: usize,
}

impl PendingOperations {
    /// Total number of registered facts
    pub fn total(&self) -> usize {
        self.reads + self.writes + self.predicates
    }

    /// Whether nothing was registered
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One transaction attempt, bound to the thread that began it
///
/// The transaction borrows every object it touches for `'a`. It is neither
/// `Send` nor `Sync`. Dropping an unfinished transaction aborts it.
pub struct Transaction<'a> {
    manager: &'a TransactionManager,
    items: ItemSet<'a>,
    ctx: TxnCtx<'a>,
    any_writes: bool,
    any_nonopaque: bool,
    abort_reason: Option<AbortReason>,
}

impl<'a> Transaction<'a> {
    /// Begin a transaction on `thread`
    ///
    /// Announces the thread's reading epoch and snapshots the commit clock.
    pub fn begin(manager: &'a TransactionManager, thread: &'a ThreadHandle) -> Self {
        thread.enter();
        let limits = manager.limits();
        let start_tid = manager.clock().now();
        trace!(target: "stoa::txn", thread = %thread.id(), start_tid, "Transaction started");
        Self {
            manager,
            items: ItemSet::new(limits.item_chunk, limits.max_items),
            ctx: TxnCtx::new(thread, start_tid, limits.lock_spin_bound),
            any_writes: false,
            any_nonopaque: false,
            abort_reason: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Owner tag of the transaction's thread
    pub fn thread_id(&self) -> ThreadId {
        self.ctx.thread_id()
    }

    /// Current state
    pub fn state(&self) -> TxnState {
        self.ctx.state
    }

    /// Whether the body may still register items
    pub fn is_active(&self) -> bool {
        self.ctx.state.is_active()
    }

    /// Whether the transaction committed
    pub fn is_committed(&self) -> bool {
        self.ctx.state == TxnState::Committed
    }

    /// Whether the transaction aborted
    pub fn is_aborted(&self) -> bool {
        self.ctx.state == TxnState::Aborted
    }

    /// Clock value the current snapshot is consistent with
    pub fn start_snapshot(&self) -> u64 {
        self.ctx.start_tid
    }

    /// Commit id, once assigned
    pub fn commit_id(&self) -> Option<Version> {
        self.ctx.commit_tid
    }

    /// Why the transaction aborted, if it did
    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// Number of registered items
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Whether any item carries a write
    pub fn has_writes(&self) -> bool {
        self.any_writes
    }

    /// Counts of registered reads, writes and predicates
    pub fn pending_operations(&self) -> PendingOperations {
        self.items
            .iter()
            .fold(PendingOperations::default(), |mut acc, item| {
                acc.reads += item.has_read() as usize;
                acc.writes += item.has_write() as usize;
                acc.predicates += item.has_predicate() as usize;
                acc
            })
    }

    /// The existing item for (obj, key), without registering one
    pub fn find_item(&self, obj: &dyn TObject, key: u64) -> Option<&TransItem<'a>> {
        self.items.find(obj, key).map(|idx| self.items.get(idx))
    }

    /// Object-facing view of this transaction
    pub fn ctx(&self) -> &TxnCtx<'a> {
        &self.ctx
    }

    /// Fail unless the body may still register items
    ///
    /// An aborted transaction reports the reason it aborted with.
    pub fn ensure_active(&self) -> TxnResult<()> {
        if self.is_active() {
            return Ok(());
        }
        let reason = match self.ctx.state {
            TxnState::Aborted => self.abort_reason.unwrap_or(AbortReason::NotActive),
            _ => AbortReason::NotActive,
        };
        Err(Abort::new(reason))
    }

    // ========================================================================
    // Item registration
    // ========================================================================

    /// Proxy for the item of (obj, key), registering it on first access
    ///
    /// # Errors
    ///
    /// Fails if the transaction is no longer active, or aborts it with
    /// `CapacityExceeded` if the item limit is reached.
    pub fn item(&mut self, obj: &'a dyn TObject, key: u64) -> TxnResult<ItemProxy<'_, 'a>> {
        self.ensure_active()?;
        match self.items.find_or_insert(obj, key) {
            Ok(idx) => Ok(ItemProxy { txn: self, idx }),
            Err(abort) => {
                warn!(
                    target: "stoa::txn",
                    thread = %self.thread_id(),
                    max_items = self.manager.limits().max_items,
                    "Transaction exceeded item capacity"
                );
                Err(self.abort(abort.reason))
            }
        }
    }

    /// Record `snapshot` as what (obj, key) looked like when read
    ///
    /// The first snapshot recorded for a key is kept.
    pub fn add_read(&mut self, obj: &'a dyn TObject, key: u64, snapshot: impl Into<Payload>) -> TxnResult<()> {
        self.item(obj, key)?.add_read(snapshot);
        Ok(())
    }

    /// Record `payload` as the value to install for (obj, key)
    pub fn add_write(&mut self, obj: &'a dyn TObject, key: u64, payload: impl Into<Payload>) -> TxnResult<()> {
        self.item(obj, key)?.add_write(payload);
        Ok(())
    }

    /// Require `range` to hold for (obj, key) at commit
    ///
    /// Combined with any predicate already recorded for the key; aborts with
    /// `PredicateConflict` if the two cannot both hold.
    pub fn add_predicate(&mut self, obj: &'a dyn TObject, key: u64, range: IntRange) -> TxnResult<()> {
        self.item(obj, key)?.add_predicate(range)
    }

    /// Record that a read skipped opacity tracking
    ///
    /// Such a transaction is validated at commit even if it wrote nothing.
    pub fn note_nonopaque(&mut self) {
        self.any_nonopaque = true;
    }

    // ========================================================================
    // Opacity
    // ========================================================================

    /// Make sure reading version `v` keeps the transaction's view consistent
    ///
    /// Cheap when `v` predates the start snapshot; otherwise every earlier
    /// read is revalidated and the snapshot is moved forward.
    pub fn check_opacity(&mut self, v: Version) -> TxnResult<()> {
        self.check_opacity_at(None, v)
    }

    fn check_opacity_at(&mut self, idx: Option<ItemIdx>, v: Version) -> TxnResult<()> {
        if !v.try_check_opacity(self.ctx.start_tid) && self.ctx.state < TxnState::Committing {
            return self.hard_check_opacity(idx, v);
        }
        Ok(())
    }

    fn hard_check_opacity(&mut self, idx: Option<ItemIdx>, v: Version) -> TxnResult<()> {
        if self.ctx.state.is_committing() {
            return Ok(());
        }
        if let Some(idx) = idx {
            let item = self.items.get(idx);
            if item.has_read() && item.read.as_version() == Some(v) {
                return Ok(());
            }
        }
        if self.ctx.state == TxnState::OpacityCheck {
            return Err(self.abort(AbortReason::RecursiveOpacityCheck));
        }
        if v.is_locked_elsewhere(self.thread_id()) {
            return Err(self.abort(AbortReason::Locked));
        }

        self.ctx.state = TxnState::OpacityCheck;
        let new_start = self.manager.clock().now();
        let consistent = self.items.iter().all(|item| {
            if item.has_read() {
                item.owner().check(item, &self.ctx)
            } else if item.has_predicate() {
                item.owner().check_predicate(item, &self.ctx, false)
            } else {
                true
            }
        });
        self.ctx.state = TxnState::InProgress;

        if !consistent {
            return Err(self.abort(AbortReason::OpacityCheckFailed));
        }
        trace!(
            target: "stoa::txn",
            thread = %self.thread_id(),
            old_start = self.ctx.start_tid,
            new_start,
            "Snapshot extended"
        );
        self.ctx.start_tid = new_start;
        Ok(())
    }

    // ========================================================================
    // Commit protocol
    // ========================================================================

    /// Run the commit protocol
    ///
    /// Returns whether the transaction committed. Conflicts are reported by
    /// returning `false`; by then every lock is released and every object
    /// has cleaned up. Calling again after the transaction finished reports
    /// the same outcome.
    pub fn try_commit(&mut self) -> bool {
        match self.ctx.state {
            TxnState::Committed => return true,
            TxnState::Aborted => return false,
            _ => {}
        }

        if !self.any_writes && !self.any_nonopaque {
            trace!(target: "stoa::txn", thread = %self.thread_id(), "Read-only commit");
            self.stop(true);
            return true;
        }

        match self.run_commit_phases() {
            Ok(()) => {
                trace!(
                    target: "stoa::txn",
                    thread = %self.thread_id(),
                    commit_tid = ?self.ctx.commit_tid,
                    "Transaction committed"
                );
                self.stop(true);
                true
            }
            Err(reason) => {
                self.fail(reason);
                false
            }
        }
    }

    /// [`try_commit`](Self::try_commit) reporting the abort reason
    pub fn commit(&mut self) -> TxnResult<()> {
        if self.try_commit() {
            Ok(())
        } else {
            Err(Abort::new(
                self.abort_reason.unwrap_or(AbortReason::ValidationFailed),
            ))
        }
    }

    fn run_commit_phases(&mut self) -> Result<(), AbortReason> {
        self.ctx.state = TxnState::Committing;

        // Phase 1: lock
        let mut writeset: SmallVec<[ItemIdx; 16]> = SmallVec::new();
        writeset.extend(
            self.items
                .indices()
                .filter(|&idx| self.items.get(idx).has_write()),
        );
        if self.manager.discipline() == stoa_core::LockDiscipline::Sorted {
            let items = &self.items;
            writeset.sort_by_key(|&idx| {
                let item = items.get(idx);
                (item.owner_id(), item.key())
            });
        }
        if !writeset.is_empty() {
            self.ctx.state = TxnState::CommittingLocked;
        }
        for &idx in &writeset {
            let item = self.items.get_mut(idx);
            if item.needs_unlock() {
                continue;
            }
            let owner = item.owner();
            if !owner.lock(item, &self.ctx) {
                return Err(AbortReason::LockConflict);
            }
            item.add_flags(flags::NEEDS_UNLOCK | flags::LOCKED_AT_COMMIT);
        }
        trace!(target: "stoa::txn", thread = %self.thread_id(), locked = writeset.len(), "Write set locked");

        if !writeset.is_empty() {
            self.ctx.commit_tid = Some(self.manager.clock().next());
        }

        // Phase 2: validate
        for item in self.items.iter() {
            if item.has_read() {
                if !item.owner().check(item, &self.ctx) {
                    return Err(AbortReason::ValidationFailed);
                }
            } else if item.has_predicate()
                && !item.has_read()
                && !item.owner().check_predicate(item, &self.ctx, true)
            {
                return Err(AbortReason::PredicateFailed);
            }
        }

        // Phase 3: install
        for item in self.items.iter_mut() {
            if item.has_write() {
                let owner = item.owner();
                owner.install(item, &self.ctx);
            }
        }
        Ok(())
    }

    fn fail(&mut self, reason: AbortReason) {
        debug!(
            target: "stoa::txn",
            thread = %self.thread_id(),
            state = ?self.ctx.state,
            %reason,
            "Transaction aborted"
        );
        self.abort_reason = Some(reason);
        self.stop(false);
    }

    fn stop(&mut self, committed: bool) {
        if self.any_writes {
            for item in self.items.iter_mut().rev() {
                if item.has_write() {
                    let owner = item.owner();
                    owner.cleanup(item, committed);
                }
            }
        }
        for item in self.items.iter_mut().rev() {
            if item.needs_unlock() {
                let owner = item.owner();
                owner.unlock(item, &self.ctx);
                item.clear_flags(flags::NEEDS_UNLOCK | flags::LOCKED_AT_COMMIT);
            }
        }
        for item in self.items.iter_mut() {
            item.write = Payload::Empty;
            item.stash = Payload::Empty;
        }
        self.ctx.state = if committed {
            TxnState::Committed
        } else {
            TxnState::Aborted
        };
        self.ctx.thread.exit();
    }

    /// Abort now, unwinding locks and cleanup
    ///
    /// Returns the `Abort` so bodies can write `return Err(txn.abort(..))`.
    /// A no-op on an already finished transaction.
    pub fn abort(&mut self, reason: AbortReason) -> Abort {
        if !self.ctx.state.is_finished() {
            self.fail(reason);
        }
        Abort::new(reason)
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: TxnState) {
        self.ctx.state = state;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.ctx.state.is_finished() {
            self.fail(AbortReason::User);
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("ctx", &self.ctx)
            .field("items", &self.items.len())
            .field("any_writes", &self.any_writes)
            .field("abort_reason", &self.abort_reason)
            .finish()
    }
}

/// Handle to one item of an active transaction
///
/// Objects use the proxy to record what they read and what they intend to
/// write for the key the item names.
pub struct ItemProxy<'t, 'a> {
    txn: &'t mut Transaction<'a>,
    idx: ItemIdx,
}

impl<'t, 'a> ItemProxy<'t, 'a> {
    /// The item
    pub fn item(&self) -> &TransItem<'a> {
        self.txn.items.get(self.idx)
    }

    fn item_mut(&mut self) -> &mut TransItem<'a> {
        self.txn.items.get_mut(self.idx)
    }

    /// The owning transaction
    pub fn txn(&mut self) -> &mut Transaction<'a> {
        &mut *self.txn
    }

    /// A read was recorded
    pub fn has_read(&self) -> bool {
        self.item().has_read()
    }

    /// A write was recorded
    pub fn has_write(&self) -> bool {
        self.item().has_write()
    }

    /// A predicate was recorded
    pub fn has_predicate(&self) -> bool {
        self.item().has_predicate()
    }

    /// Object-defined bits in `mask` are all set
    pub fn has_flags(&self, mask: u16) -> bool {
        self.item().has_flags(mask)
    }

    /// Set or clear object-defined bits
    pub fn set_user_flags(&mut self, mask: u16, on: bool) -> &mut Self {
        self.item_mut().set_user_flags(mask, on);
        self
    }

    /// Record a read snapshot unless one is already recorded
    pub fn add_read(&mut self, snapshot: impl Into<Payload>) -> &mut Self {
        let item = self.item_mut();
        if !item.has_read() {
            item.read = snapshot.into();
            item.add_flags(flags::READ);
        }
        self
    }

    /// Record (or replace) the write payload
    pub fn add_write(&mut self, payload: impl Into<Payload>) -> &mut Self {
        if !self.txn.any_writes {
            self.txn.any_writes = true;
            self.txn.ctx.thread.mark_write_snapshot();
        }
        let item = self.item_mut();
        item.write = payload.into();
        item.add_flags(flags::WRITE);
        self
    }

    /// Current write payload
    pub fn write_value(&self) -> &Payload {
        &self.item().write
    }

    /// Mutable write payload
    pub fn write_value_mut(&mut self) -> &mut Payload {
        &mut self.item_mut().write
    }

    /// Recorded read snapshot
    pub fn read_value(&self) -> &Payload {
        &self.item().read
    }

    /// Combine `range` into the item's predicate
    pub fn add_predicate(&mut self, range: IntRange) -> TxnResult<()> {
        let combined = self.item().predicate.intersect(&range);
        match combined {
            Ok(range) => {
                let item = self.item_mut();
                item.predicate = range;
                item.add_flags(flags::PREDICATE);
                Ok(())
            }
            Err(abort) => Err(self.txn.abort(abort.reason)),
        }
    }

    /// Record the fact `value op rhs` about the item's key
    pub fn observe_predicate(&mut self, op: CmpOp, rhs: i64) -> TxnResult<()> {
        let mut range = IntRange::ANY;
        match range.observe(op, rhs) {
            Ok(()) => self.add_predicate(range),
            Err(abort) => Err(self.txn.abort(abort.reason)),
        }
    }

    /// Recorded predicate
    pub fn predicate(&self) -> IntRange {
        self.item().predicate
    }

    /// Store object state in the stash
    pub fn set_stash(&mut self, value: impl Into<Payload>) -> &mut Self {
        let item = self.item_mut();
        item.stash = value.into();
        item.add_flags(flags::STASH);
        self
    }

    /// The stash holds object state
    pub fn has_stash(&self) -> bool {
        self.item().has_stash()
    }

    /// Stash slot
    pub fn stash(&self) -> &Payload {
        &self.item().stash
    }

    /// Observe `lock` as an opaque read
    ///
    /// Aborts if the word is locked by another transaction or if the new
    /// version cannot be reconciled with earlier reads. Records the version
    /// as this item's read snapshot on first observation.
    pub fn observe(&mut self, lock: &VersionedLock) -> TxnResult<Version> {
        let v = lock.load();
        if v.is_locked_elsewhere(self.txn.thread_id()) {
            return Err(self.txn.abort(AbortReason::Locked));
        }
        self.txn.check_opacity_at(Some(self.idx), v)?;
        self.add_read(v);
        Ok(v)
    }

    /// Observe `lock` without opacity tracking
    ///
    /// The transaction will validate this read at commit even if it writes
    /// nothing.
    pub fn observe_nonopaque(&mut self, lock: &VersionedLock) -> TxnResult<Version> {
        let v = lock.load();
        if v.is_locked_elsewhere(self.txn.thread_id()) {
            return Err(self.txn.abort(AbortReason::Locked));
        }
        self.txn.note_nonopaque();
        self.add_read(v);
        Ok(v)
    }

    /// Take `lock` now, before commit
    ///
    /// The lock stays held until the transaction finishes. A read snapshot
    /// recorded before the lock was taken must still match the word, or the
    /// transaction aborts with `ValidationFailed`.
    pub fn acquire(&mut self, lock: &VersionedLock) -> TxnResult<()> {
        if self.item().needs_unlock() {
            return Ok(());
        }
        if !self.txn.ctx.try_lock(lock) {
            return Err(self.txn.abort(AbortReason::LockConflict));
        }
        self.item_mut().add_flags(flags::NEEDS_UNLOCK);
        if let Some(read) = self.item().read.as_version() {
            if self.has_read() && !lock.load().same_version(read) {
                return Err(self.txn.abort(AbortReason::ValidationFailed));
            }
        }
        Ok(())
    }

    /// Abort the owning transaction
    pub fn abort(&mut self, reason: AbortReason) -> Abort {
        self.txn.abort(reason)
    }
}
