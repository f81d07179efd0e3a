//! Minimal transactional register for unit tests

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stoa_core::{AbortReason, Limits, LockDiscipline, TxnResult, Version, VersionedLock};
use stoa_reclaim::{Reclaimer, ThreadHandle};

use crate::item::TransItem;
use crate::manager::TransactionManager;
use crate::object::{TObject, TxnCtx};
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Lock(usize),
    Cleanup(usize),
}

thread_local! {
    static EVENTS: RefCell<Vec<Event>> = RefCell::new(Vec::new());
}

fn record(event: Event) {
    EVENTS.with(|e| e.borrow_mut().push(event));
}

pub(crate) struct Harness {
    pub manager: TransactionManager,
    pub reclaimer: Arc<Reclaimer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_discipline(LockDiscipline::InsertionOrder)
    }

    pub fn with_discipline(discipline: LockDiscipline) -> Self {
        Self::build(Limits::default(), discipline)
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self::build(limits, LockDiscipline::InsertionOrder)
    }

    fn build(limits: Limits, discipline: LockDiscipline) -> Self {
        EVENTS.with(|e| e.borrow_mut().clear());
        let reclaimer = Arc::new(Reclaimer::new(limits.max_threads));
        Self {
            manager: TransactionManager::new(limits, discipline),
            reclaimer,
        }
    }

    pub fn thread(&self) -> ThreadHandle {
        self.reclaimer.register().unwrap()
    }

    pub fn lock_order(&self) -> Vec<usize> {
        EVENTS.with(|e| {
            e.borrow()
                .iter()
                .filter_map(|ev| match ev {
                    Event::Lock(a) => Some(*a),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn cleanup_order(&self) -> Vec<usize> {
        EVENTS.with(|e| {
            e.borrow()
                .iter()
                .filter_map(|ev| match ev {
                    Event::Cleanup(a) => Some(*a),
                    _ => None,
                })
                .collect()
        })
    }
}

pub(crate) struct TestVar {
    lock: VersionedLock,
    value: AtomicI64,
    checks: AtomicUsize,
    cleanups: Mutex<Vec<bool>>,
}

impl TestVar {
    pub fn new(value: i64) -> Self {
        Self {
            lock: VersionedLock::default(),
            value: AtomicI64::new(value),
            checks: AtomicUsize::new(0),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn read<'a>(&'a self, txn: &mut Transaction<'a>) -> TxnResult<i64> {
        let mut item = txn.item(self, 0)?;
        if item.has_write() {
            return Ok(item.write_value().as_int().unwrap_or_default());
        }
        let v = item.observe(&self.lock)?;
        let value = self.value.load(Ordering::Acquire);
        if self.lock.load() != v {
            return Err(item.abort(AbortReason::ValidationFailed));
        }
        Ok(value)
    }

    pub fn write<'a>(&'a self, txn: &mut Transaction<'a>, value: i64) -> TxnResult<()> {
        txn.add_write(self, 0, value)
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn version(&self) -> Version {
        self.lock.load()
    }

    pub fn lock_word(&self) -> &VersionedLock {
        &self.lock
    }

    pub fn addr(&self) -> usize {
        self as *const Self as usize
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::Relaxed)
    }

    pub fn cleanups(&self) -> Vec<bool> {
        self.cleanups.lock().clone()
    }
}

impl TObject for TestVar {
    fn lock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) -> bool {
        record(Event::Lock(self.addr()));
        ctx.try_lock(&self.lock)
    }

    fn unlock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        ctx.unlock(&self.lock);
    }

    fn check(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>) -> bool {
        self.checks.fetch_add(1, Ordering::Relaxed);
        let read = item.read_value().as_version().unwrap_or_default();
        ctx.check_version(&self.lock, read)
    }

    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        let value = item.write_value().as_int().unwrap_or_default();
        self.value.store(value, Ordering::Release);
        self.lock.set_version(ctx.commit_tid());
    }

    fn check_predicate(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>, _committing: bool) -> bool {
        let before = self.lock.load();
        if before.is_locked_elsewhere(ctx.thread_id()) {
            return false;
        }
        let value = self.value.load(Ordering::Acquire);
        self.lock.load() == before && item.predicate().contains(value)
    }

    fn cleanup(&self, _item: &mut TransItem<'_>, committed: bool) {
        record(Event::Cleanup(self.addr()));
        self.cleanups.lock().push(committed);
    }

    fn name(&self) -> &'static str {
        "test_var"
    }
}
