//! Concurrent/Multi-threaded Tests for stoa-concurrency
//!
//! These tests run real threads against shared objects to exercise:
//!
//! 1. **Isolation** - Read-modify-write never loses an update
//! 2. **At-Most-One Lock Holder** - Commit locks are exclusive
//! 3. **Monotonic Versions** - Installed versions strictly increase
//! 4. **Opacity** - A running transaction never sees a torn pair of writes
//! 5. **Lock Discipline** - Opposite-order writers make progress under both disciplines
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! cargo test --test concurrent_tests -- --nocapture --test-threads=1  # sequential for debugging
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use stoa_concurrency::{TObject, TransItem, Transaction, TransactionManager, TxnCtx};
use stoa_core::{AbortReason, Limits, LockDiscipline, TxnResult, VersionedLock};
use stoa_reclaim::{Reclaimer, ThreadHandle};

// ============================================================================
// Test Helpers
// ============================================================================

/// Versioned integer register that audits its own lock usage
#[derive(Default)]
struct Register {
    lock: VersionedLock,
    value: AtomicI64,
    holders: AtomicUsize,
    violations: AtomicUsize,
    installs: Mutex<Vec<u64>>,
}

impl Register {
    fn read<'a>(&'a self, txn: &mut Transaction<'a>) -> TxnResult<i64> {
        let mut item = txn.item(self, 0)?;
        if let Some(v) = item.write_value().as_int() {
            return Ok(v);
        }
        let v = item.observe(&self.lock)?;
        let value = self.value.load(Ordering::Acquire);
        if self.lock.load() != v {
            return Err(item.abort(AbortReason::ValidationFailed));
        }
        Ok(value)
    }

    fn write<'a>(&'a self, txn: &mut Transaction<'a>, value: i64) -> TxnResult<()> {
        txn.add_write(self, 0, value)
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

impl TObject for Register {
    fn lock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) -> bool {
        if !ctx.try_lock(&self.lock) {
            return false;
        }
        if self.holders.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        true
    }

    fn unlock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        if ctx.unlock(&self.lock) {
            self.holders.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn check(&self, item: &TransItem<'_>, ctx: &TxnCtx<'_>) -> bool {
        let cur = self.lock.load();
        if cur.is_locked() && !item.has_write() {
            return false;
        }
        let read = item.read_value().as_version().unwrap_or_default();
        cur.check_version(read, ctx.thread_id())
    }

    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx<'_>) {
        if self.holders.load(Ordering::SeqCst) != 1 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let value = item.write_value().as_int().unwrap_or_default();
        self.value.store(value, Ordering::Release);
        self.installs.lock().push(ctx.commit_tid().counter());
        self.lock.set_version(ctx.commit_tid());
    }
}

/// Retry `body` until it commits; returns the result and the abort count
fn run<'a, R>(
    manager: &'a TransactionManager,
    thread: &'a ThreadHandle,
    mut body: impl FnMut(&mut Transaction<'a>) -> TxnResult<R>,
) -> (R, u64) {
    let mut aborts = 0;
    loop {
        let mut txn = manager.begin(thread);
        if let Ok(value) = body(&mut txn) {
            if txn.try_commit() {
                return (value, aborts);
            }
        }
        aborts += 1;
    }
}

fn shared_env(discipline: LockDiscipline) -> (Arc<TransactionManager>, Arc<Reclaimer>) {
    (
        Arc::new(TransactionManager::new(Limits::default(), discipline)),
        Arc::new(Reclaimer::new(32)),
    )
}

// ============================================================================
// SECTION 1: Isolation
// ============================================================================

mod isolation {
    use super::*;

    /// Concurrent read-modify-write increments: every committed increment is
    /// reflected exactly once in the final value.
    #[test]
    fn test_no_lost_updates() {
        const THREADS: usize = 4;
        const PER_THREAD: i64 = 2_000;

        let (manager, reclaimer) = shared_env(LockDiscipline::InsertionOrder);
        let counter = Arc::new(Register::default());
        let barrier = Arc::new(Barrier::new(THREADS));
        let total_aborts = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let reclaimer = Arc::clone(&reclaimer);
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                let total_aborts = Arc::clone(&total_aborts);
                thread::spawn(move || {
                    let thread = reclaimer.register().unwrap();
                    let counter: &Register = &counter;
                    barrier.wait();
                    for _ in 0..PER_THREAD {
                        let ((), aborts) = run(&manager, &thread, |txn| {
                            let v = counter.read(txn)?;
                            counter.write(txn, v + 1)
                        });
                        total_aborts.fetch_add(aborts, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.get(), THREADS as i64 * PER_THREAD);
        assert_eq!(counter.violations.load(Ordering::SeqCst), 0);
    }

    /// Two transactions racing on the same key: one commits, the other aborts
    /// and sees the first's value on retry.
    #[test]
    fn test_first_committer_wins() {
        let (manager, reclaimer) = shared_env(LockDiscipline::InsertionOrder);
        let reg = Register::default();
        let t1 = reclaimer.register().unwrap();
        let t2 = reclaimer.register().unwrap();

        let mut a = manager.begin(&t1);
        let mut b = manager.begin(&t2);
        let va = reg.read(&mut a).unwrap();
        let vb = reg.read(&mut b).unwrap();
        reg.write(&mut a, va + 10).unwrap();
        reg.write(&mut b, vb + 20).unwrap();

        assert!(a.try_commit());
        assert!(!b.try_commit());
        assert_eq!(reg.get(), 10);

        let mut retry = manager.begin(&t2);
        let v = reg.read(&mut retry).unwrap();
        assert_eq!(v, 10);
        reg.write(&mut retry, v + 20).unwrap();
        assert!(retry.try_commit());
        assert_eq!(reg.get(), 30);
    }
}

// ============================================================================
// SECTION 2: Lock Exclusivity and Version Monotonicity
// ============================================================================

mod locking {
    use super::*;

    #[test]
    fn test_at_most_one_holder_and_monotonic_versions() {
        const THREADS: usize = 6;
        const PER_THREAD: usize = 1_000;

        let (manager, reclaimer) = shared_env(LockDiscipline::InsertionOrder);
        let regs = Arc::new([Register::default(), Register::default()]);
        let done = Arc::new(AtomicBool::new(false));

        // Watches the raw word and checks the counter never moves back.
        let watcher = {
            let regs = Arc::clone(&regs);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = [0u64; 2];
                let mut regressions = 0;
                while !done.load(Ordering::Acquire) {
                    for (i, reg) in regs.iter().enumerate() {
                        let c = reg.lock.load().counter();
                        if c < last[i] {
                            regressions += 1;
                        }
                        last[i] = c;
                    }
                }
                regressions
            })
        };

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let manager = Arc::clone(&manager);
                let reclaimer = Arc::clone(&reclaimer);
                let regs = Arc::clone(&regs);
                thread::spawn(move || {
                    let thread = reclaimer.register().unwrap();
                    let regs: &[Register; 2] = &regs;
                    for i in 0..PER_THREAD {
                        // alternate the order the two registers are written in
                        let (first, second) = if (t + i) % 2 == 0 { (0, 1) } else { (1, 0) };
                        run(&manager, &thread, |txn| {
                            regs[first].write(txn, i as i64)?;
                            regs[second].write(txn, i as i64)
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        done.store(true, Ordering::Release);

        assert_eq!(watcher.join().unwrap(), 0);
        for reg in regs.iter() {
            assert_eq!(reg.violations.load(Ordering::SeqCst), 0);
            let installs = reg.installs.lock();
            assert_eq!(installs.len(), THREADS * PER_THREAD);
            assert!(installs.windows(2).all(|w| w[0] < w[1]), "versions must strictly increase");
            assert!(!reg.lock.load().is_locked());
        }
    }

    #[test]
    fn test_sorted_discipline_makes_progress() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 500;

        let (manager, reclaimer) = shared_env(LockDiscipline::Sorted);
        let regs: Arc<Vec<Register>> = Arc::new((0..4).map(|_| Register::default()).collect());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let manager = Arc::clone(&manager);
                let reclaimer = Arc::clone(&reclaimer);
                let regs = Arc::clone(&regs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let thread = reclaimer.register().unwrap();
                    let regs: &[Register] = &regs;
                    barrier.wait();
                    for _ in 0..PER_THREAD {
                        run(&manager, &thread, |txn| {
                            // even threads go forwards, odd threads backwards
                            if t % 2 == 0 {
                                for r in regs.iter() {
                                    let v = r.read(txn)?;
                                    r.write(txn, v + 1)?;
                                }
                            } else {
                                for r in regs.iter().rev() {
                                    let v = r.read(txn)?;
                                    r.write(txn, v + 1)?;
                                }
                            }
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for r in regs.iter() {
            assert_eq!(r.get(), (THREADS * PER_THREAD) as i64);
            assert_eq!(r.violations.load(Ordering::SeqCst), 0);
        }
    }
}

// ============================================================================
// SECTION 3: Opacity
// ============================================================================

mod opacity {
    use super::*;

    /// Writers always set both registers to the same value. A reader that
    /// gets both values back inside one transaction must see them equal,
    /// even if it later fails to commit.
    #[test]
    fn test_reader_never_sees_torn_pair() {
        const WRITERS: usize = 2;
        const READERS: usize = 3;
        const ROUNDS: usize = 2_000;

        let (manager, reclaimer) = shared_env(LockDiscipline::InsertionOrder);
        let pair = Arc::new((Register::default(), Register::default()));
        let torn = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(WRITERS + READERS));

        let mut handles = Vec::new();
        for w in 0..WRITERS {
            let manager = Arc::clone(&manager);
            let reclaimer = Arc::clone(&reclaimer);
            let pair = Arc::clone(&pair);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                let thread = reclaimer.register().unwrap();
                let (a, b) = &*pair;
                barrier.wait();
                for i in 0..ROUNDS {
                    let value = (w * ROUNDS + i) as i64;
                    run(&manager, &thread, |txn| {
                        a.write(txn, value)?;
                        b.write(txn, value)
                    });
                }
            }));
        }
        for _ in 0..READERS {
            let manager = Arc::clone(&manager);
            let reclaimer = Arc::clone(&reclaimer);
            let pair = Arc::clone(&pair);
            let torn = Arc::clone(&torn);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                let thread = reclaimer.register().unwrap();
                let (a, b) = &*pair;
                barrier.wait();
                for _ in 0..ROUNDS {
                    let mut txn = manager.begin(&thread);
                    let seen = a.read(&mut txn).and_then(|x| Ok((x, b.read(&mut txn)?)));
                    if let Ok((x, y)) = seen {
                        if x != y {
                            torn.fetch_add(1, Ordering::SeqCst);
                        }
                        assert!(txn.try_commit());
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(torn.load(Ordering::SeqCst), 0);
    }
}
