//! TBox: a transactional cell
//!
//! The value lives behind an atomic pointer and is never mutated in place.
//! A commit swaps in a freshly boxed value and hands the old box to the
//! epoch reclaimer, so readers that loaded the old pointer can keep cloning
//! from it until they leave their transaction.
//!
//! ## Versioning
//!
//! With [`VersionPolicy::Opaque`] each install stamps the commit id, and
//! reads go through the transaction's opacity check. With
//! [`VersionPolicy::Nonopaque`] installs bump the counter by one step and
//! set the non-opaque bit; reads skip the opacity check and the reading
//! transaction is validated at commit even if it is read-only.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use stoa_concurrency::{Payload, TObject, TransItem, Transaction, TxnCtx};
use stoa_core::{AbortReason, TxnResult, Version, VersionedLock};
use stoa_reclaim::ThreadHandle;
use tracing::trace;

/// How installs stamp the cell's version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPolicy {
    /// Stamp the commit id
    #[default]
    Opaque,
    /// Step the counter and mark the word non-opaque
    Nonopaque,
}

/// A single transactional value
pub struct TBox<T> {
    lock: VersionedLock,
    ptr: AtomicPtr<T>,
    policy: VersionPolicy,
    _owns: PhantomData<T>,
}

impl<T> TBox<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// New cell holding `value`, with opaque versioning
    pub fn new(value: T) -> Self {
        Self::with_policy(value, VersionPolicy::Opaque)
    }

    /// New cell holding `value`
    pub fn with_policy(value: T, policy: VersionPolicy) -> Self {
        Self {
            lock: VersionedLock::default(),
            ptr: AtomicPtr::new(Box::into_raw(Box::new(value))),
            policy,
            _owns: PhantomData,
        }
    }

    /// Versioning policy
    pub fn policy(&self) -> VersionPolicy {
        self.policy
    }

    /// Current version word
    pub fn version(&self) -> Version {
        self.lock.load()
    }

    /// Read the value inside `txn`
    ///
    /// Returns the transaction's own pending write if there is one.
    pub fn read<'a>(&'a self, txn: &mut Transaction<'a>) -> TxnResult<T> {
        let mut item = txn.item(self, 0)?;
        if let Some(pending) = item.write_value().downcast_ref::<T>() {
            return Ok(pending.clone());
        }
        let v = match self.policy {
            VersionPolicy::Opaque => item.observe(&self.lock)?,
            VersionPolicy::Nonopaque => item.observe_nonopaque(&self.lock)?,
        };
        // SAFETY: the transaction is active, so its thread has announced an
        // epoch; a box swapped out after that announcement is not freed
        // until the thread goes quiescent.
        let value = unsafe { self.clone_current() };
        if self.lock.load() != v {
            return Err(item.abort(AbortReason::ValidationFailed));
        }
        Ok(value)
    }

    /// Replace the value at commit
    pub fn write<'a>(&'a self, txn: &mut Transaction<'a>, value: T) -> TxnResult<()> {
        txn.add_write(self, 0, Payload::boxed(value))
    }

    /// Read, transform and write back; returns the new value
    pub fn update<'a, F>(&'a self, txn: &mut Transaction<'a>, f: F) -> TxnResult<T>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.read(txn)?);
        self.write(txn, next.clone())?;
        Ok(next)
    }

    /// Clone the committed value outside any transaction
    pub fn snapshot(&self, thread: &ThreadHandle) -> T {
        thread.enter();
        // SAFETY: `enter` announced an epoch before the pointer is loaded.
        let value = unsafe { self.clone_current() };
        thread.exit();
        value
    }

    /// Exclusive access to the value
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: `&mut self` rules out concurrent readers and installers;
        // the pointer is non-null until drop or `into_inner`.
        unsafe { &mut **self.ptr.get_mut() }
    }

    /// Consume the cell and return the value
    pub fn into_inner(mut self) -> T {
        let p = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        // SAFETY: `p` came from `Box::into_raw` and is no longer reachable
        // through `self`.
        unsafe { *Box::from_raw(p) }
    }

    /// # Safety
    ///
    /// The calling thread must be inside an epoch announcement.
    unsafe fn clone_current(&self) -> T {
        (*self.ptr.load(Ordering::Acquire)).clone()
    }
}

impl<T> TObject for TBox<T>
where
    T: Clone + Send + Sync + 'static,
{
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

    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        let mut payload = item.take_write();
        let Some(next) = payload.take_boxed::<T>() else {
            debug_assert!(false, "tbox write payload of the wrong type");
            return;
        };
        let old = self.ptr.swap(Box::into_raw(next), Ordering::AcqRel);
        // SAFETY: `old` came from `Box::into_raw` and was just unlinked;
        // readers still holding it are protected by their epoch.
        ctx.defer_drop(unsafe { Box::from_raw(old) });

        let stamp = match self.policy {
            VersionPolicy::Opaque => ctx.commit_tid(),
            VersionPolicy::Nonopaque => self.lock.load().next_nonopaque(),
        };
        trace!(target: "stoa::txn", version = ?stamp, "TBox installed");
        self.lock.set_version(stamp);
    }

    fn name(&self) -> &'static str {
        "tbox"
    }
}

impl<T> Drop for TBox<T> {
    fn drop(&mut self) {
        let p = *self.ptr.get_mut();
        if !p.is_null() {
            // SAFETY: exclusive access; every earlier value was retired
            // through the reclaimer, so `p` is the only live box.
            drop(unsafe { Box::from_raw(p) });
        }
    }
}

impl<T> fmt::Debug for TBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TBox")
            .field("version", &self.lock.load())
            .field("policy", &self.policy)
            .finish()
    }
}
