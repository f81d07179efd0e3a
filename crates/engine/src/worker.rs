//! Per-thread worker and the retry loop
//!
//! A `Worker` is a thread's membership in a runtime. It owns one registry
//! slot and is neither `Send` nor `Sync`, so every transaction it begins
//! runs on the thread that registered.

use stoa_concurrency::Transaction;
use stoa_core::{Error, Result, ThreadId, TxnResult};
use stoa_reclaim::ThreadHandle;
use tracing::{debug, warn};

use crate::retry::{RetryPolicy, RunOutcome};
use crate::runtime::Stm;

/// A registered thread of an [`Stm`] runtime
pub struct Worker<'s> {
    stm: &'s Stm,
    thread: ThreadHandle,
}

impl<'s> Worker<'s> {
    pub(crate) fn new(stm: &'s Stm, thread: ThreadHandle) -> Self {
        Self { stm, thread }
    }

    /// Slot id, also the owner tag this worker locks with
    pub fn id(&self) -> ThreadId {
        self.thread.id()
    }

    /// The runtime this worker belongs to
    pub fn stm(&self) -> &'s Stm {
        self.stm
    }

    /// Underlying epoch handle
    pub fn thread(&self) -> &ThreadHandle {
        &self.thread
    }

    /// Begin a transaction for manual control
    ///
    /// Prefer [`run`](Self::run), which retries on conflict.
    pub fn begin(&self) -> Transaction<'_> {
        self.stm.manager().begin(&self.thread)
    }

    /// Run `body` until an attempt commits, using the runtime's retry policy
    ///
    /// `body` may run several times and must not have effects outside the
    /// transaction. Returning `Err` from the body aborts the attempt; the
    /// loop retries unless the reason is not retryable.
    ///
    /// # Example
    /// ```text
    /// let outcome = worker.run(|txn| {
    ///     let v = counter.get(txn)?;
    ///     counter.set(txn, v + 1)
    /// })?;
    /// assert_eq!(outcome.commits(), 1);
    /// ```
    ///
    /// # Errors
    ///
    /// `RetryLimitExceeded` once the configured limit is reached, or
    /// `Aborted` for a non-retryable abort.
    pub fn run<'a, R, F>(&'a self, body: F) -> Result<RunOutcome<R>>
    where
        F: FnMut(&mut Transaction<'a>) -> TxnResult<R>,
    {
        let policy = self.stm.retry_policy();
        self.run_with_policy(&policy, body)
    }

    /// [`run`](Self::run) with an explicit attempt limit
    pub fn run_with_limit<'a, R, F>(&'a self, limit: Option<u64>, body: F) -> Result<RunOutcome<R>>
    where
        F: FnMut(&mut Transaction<'a>) -> TxnResult<R>,
    {
        let policy = self.stm.retry_policy().with_limit(limit);
        self.run_with_policy(&policy, body)
    }

    /// [`run`](Self::run) with an explicit policy
    pub fn run_with_policy<'a, R, F>(&'a self, policy: &RetryPolicy, mut body: F) -> Result<RunOutcome<R>>
    where
        F: FnMut(&mut Transaction<'a>) -> TxnResult<R>,
    {
        let mut attempts = 0u64;
        let mut aborts = 0u64;
        let mut last_abort = None;

        loop {
            attempts += 1;
            let mut txn = self.begin();
            let result = match body(&mut txn) {
                Ok(value) => txn.commit().map(|()| value),
                Err(abort) => Err(txn.abort(abort.reason)),
            };
            drop(txn);

            let abort = match result {
                Ok(value) => {
                    return Ok(RunOutcome {
                        value,
                        attempts,
                        aborts,
                        last_abort,
                    })
                }
                Err(abort) => abort,
            };
            aborts += 1;
            last_abort = Some(abort.reason);

            if !abort.is_retryable() {
                debug!(target: "stoa::txn", thread = %self.id(), reason = %abort.reason, "Abort is not retryable");
                return Err(Error::Aborted(abort));
            }
            if !policy.allows(attempts) {
                warn!(
                    target: "stoa::txn",
                    thread = %self.id(),
                    attempts,
                    last = %abort.reason,
                    "Retry limit exhausted"
                );
                return Err(Error::RetryLimitExceeded {
                    attempts,
                    last: abort.reason,
                });
            }
            debug!(target: "stoa::txn", thread = %self.id(), attempt = attempts, reason = %abort.reason, "Retrying transaction");
            policy.backoff(aborts - 1);
        }
    }

    /// Retire a resource; `callback` runs once no reader can still see it
    pub fn defer<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.thread.defer(callback);
    }

    /// Retire a heap value; it is dropped once no reader can still see it
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) {
        self.thread.defer_drop(value);
    }

    /// Release this worker's resources that are already safe
    pub fn reclaim(&self) -> usize {
        self.thread.reclaim()
    }
}

impl std::fmt::Debug for Worker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id()).finish()
    }
}
