//! Stoa - in-process software transactional memory
//!
//! Stoa lets ordinary in-memory objects be read and written inside atomic,
//! isolated, retryable transactions. Objects implement a small contract
//! ([`TObject`]: lock, check, install, unlock) and get optimistic
//! concurrency control, opacity and commit atomicity from the engine.
//!
//! # Quick Start
//!
//! ```ignore
//! use stoa::{Stm, TBox, TCounter};
//!
//! let stm = Stm::new()?;
//! let balance = TCounter::new(100);
//! let owner = TBox::new(String::from("alice"));
//!
//! let worker = stm.worker()?;
//! worker.run(|txn| {
//!     if balance.compare(txn, stoa::CmpOp::Ge, 30)? {
//!         balance.add(txn, -30)?;
//!         owner.write(txn, String::from("bob"))?;
//!     }
//!     Ok(())
//! })?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Provides |
//! |---|---|
//! | `stoa-core` | versioned lock words, commit clock, errors, limits |
//! | `stoa-reclaim` | worker registry, epochs, deferred frees, advancer |
//! | `stoa-concurrency` | items, predicates, `Transaction`, three-phase commit |
//! | `stoa-primitives` | `TBox`, `TCounter` |
//! | `stoa-engine` | `Stm` runtime, config, `Worker` retry loop |

pub use stoa_concurrency::{
    flags, CmpOp, IntRange, ItemProxy, Payload, TObject, TransItem, Transaction,
    TransactionManager, TxnCtx, TxnState,
};
pub use stoa_core::{
    Abort, AbortReason, Epoch, Error, LockDiscipline, Result, ThreadId, TxnResult, Version,
    VersionedLock,
};
pub use stoa_engine::{RetryPolicy, RunOutcome, Stm, StmConfig, Worker, CONFIG_FILE_NAME};
pub use stoa_primitives::{TBox, TCounter, VersionPolicy};
pub use stoa_reclaim::{EpochAdvancer, Reclaimer, ThreadHandle};
