//! TCounter: a commutative integer counter
//!
//! Increments are recorded as pending deltas and applied at install time
//! against whatever value is current then, so two transactions that only
//! increment never conflict. Reads come in two strengths:
//!
//! | Call | Records | Conflicts with |
//! |---|---|---|
//! | `add` | a delta | nothing |
//! | `compare` | a predicate on the committed value | writes that flip the answer |
//! | `get` | an exact version | any other write |
//!
//! ## Item layout
//!
//! One item per counter. The write payload is an `Int`; [`DELTA`] marks it
//! as an increment, [`ASSIGNED`] as an absolute value.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use stoa_concurrency::{flags, CmpOp, IntRange, ItemProxy, Payload, TObject, TransItem, Transaction, TxnCtx};
use stoa_core::{AbortReason, TxnResult, Version, VersionedLock};

/// Write payload is a delta to add at install
pub const DELTA: u16 = flags::USER0;
/// Write payload is the new value
pub const ASSIGNED: u16 = flags::USER1;

/// Transactional counter
#[derive(Default)]
pub struct TCounter {
    lock: VersionedLock,
    value: AtomicI64,
}

impl TCounter {
    /// New counter at `value`
    pub fn new(value: i64) -> Self {
        Self {
            lock: VersionedLock::default(),
            value: AtomicI64::new(value),
        }
    }

    /// Committed value, outside any transaction
    pub fn load(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Current version word
    pub fn version(&self) -> Version {
        self.lock.load()
    }

    /// Add `delta` at commit without reading
    pub fn add<'a>(&'a self, txn: &mut Transaction<'a>, delta: i64) -> TxnResult<()> {
        let mut item = txn.item(self, 0)?;
        if item.has_write() {
            if let Payload::Int(v) = item.write_value_mut() {
                *v = v.wrapping_add(delta);
            }
        } else {
            item.add_write(delta).set_user_flags(DELTA, true);
        }
        Ok(())
    }

    /// Overwrite the value at commit
    pub fn set<'a>(&'a self, txn: &mut Transaction<'a>, value: i64) -> TxnResult<()> {
        let mut item = txn.item(self, 0)?;
        item.add_write(value)
            .set_user_flags(DELTA, false)
            .set_user_flags(ASSIGNED, true);
        Ok(())
    }

    /// Exact value as this transaction would see it
    ///
    /// Records an exact read: any concurrent write aborts the transaction.
    /// The base value is stashed, so repeated reads agree with the first.
    pub fn get<'a>(&'a self, txn: &mut Transaction<'a>) -> TxnResult<i64> {
        let mut item = txn.item(self, 0)?;
        if item.has_flags(ASSIGNED) {
            return Ok(pending(&item));
        }
        if item.has_stash() {
            let base = item.stash().as_int().unwrap_or_default();
            return Ok(base.wrapping_add(pending_delta(&item)));
        }
        let v = item.observe(&self.lock)?;
        let base = self.value.load(Ordering::Acquire);
        if self.lock.load() != v {
            return Err(item.abort(AbortReason::ValidationFailed));
        }
        item.set_stash(base);
        Ok(base.wrapping_add(pending_delta(&item)))
    }

    /// Evaluate `value op rhs` as this transaction would see it
    ///
    /// Only the outcome is recorded: the transaction stays valid as long as
    /// concurrent writes leave the answer unchanged.
    pub fn compare<'a>(&'a self, txn: &mut Transaction<'a>, op: CmpOp, rhs: i64) -> TxnResult<bool> {
        let (exact, delta) = {
            let item = txn.item(self, 0)?;
            if item.has_flags(ASSIGNED) {
                return Ok(op.eval(pending(&item), rhs));
            }
            (item.has_read(), pending_delta(&item))
        };
        let Some(shift) = delta.checked_neg() else {
            return Ok(op.eval(self.get(txn)?, rhs));
        };
        if exact {
            return Ok(op.eval(self.get(txn)?, rhs));
        }

        let mut item = txn.item(self, 0)?;
        let (v, base) = self.stable_read(&mut item)?;
        item.txn().check_opacity(v)?;
        let outcome = op.eval(base.wrapping_add(delta), rhs);
        let mut range = IntRange::ANY;
        let fact = if outcome { op } else { op.negate() };
        if let Err(abort) = range.observe(fact, rhs) {
            return Err(txn.abort(abort.reason));
        }
        txn.item(self, 0)?.add_predicate(range.shifted(shift))?;
        Ok(outcome)
    }

    fn stable_read(&self, item: &mut ItemProxy<'_, '_>) -> TxnResult<(Version, i64)> {
        loop {
            let v = self.lock.load();
            if v.is_locked_elsewhere(item.txn().thread_id()) {
                return Err(item.abort(AbortReason::Locked));
            }
            let value = self.value.load(Ordering::Acquire);
            if self.lock.load() == v {
                return Ok((v, value));
            }
            std::hint::spin_loop();
        }
    }
}

fn pending(item: &ItemProxy<'_, '_>) -> i64 {
    item.write_value().as_int().unwrap_or_default()
}

fn pending_delta(item: &ItemProxy<'_, '_>) -> i64 {
    if item.has_flags(DELTA) {
        pending(item)
    } else {
        0
    }
}

impl TObject for TCounter {
    fn lock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) -> bool {
        ctx.try_lock(&self.lock)
    }

    fn unlock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        ctx.unlock(&self.lock);
    }

    fn check(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>) -> bool {
        let read = item.read_value().as_version().unwrap_or_default();
        ctx.check_version(&self.lock, read)
    }

    fn check_predicate(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>, _committing: bool) -> bool {
        let v = self.lock.load();
        if v.is_locked_elsewhere(ctx.thread_id()) {
            return false;
        }
        let value = self.value.load(Ordering::Acquire);
        self.lock.load() == v && item.predicate().contains(value)
    }

    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        let w = item.write_value().as_int().unwrap_or_default();
        if item.has_flags(ASSIGNED) {
            self.value.store(w, Ordering::Release);
        } else {
            let cur = self.value.load(Ordering::Relaxed);
            self.value.store(cur.wrapping_add(w), Ordering::Release);
        }
        self.lock.set_version(ctx.commit_tid());
    }

    fn name(&self) -> &'static str {
        "tcounter"
    }
}

impl fmt::Debug for TCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCounter")
            .field("value", &self.load())
            .field("version", &self.lock.load())
            .finish()
    }
}
