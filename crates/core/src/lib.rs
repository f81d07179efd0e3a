//! Core types for the stoa STM engine
//!
//! This crate defines the leaf types every other layer builds on:
//! - Versioned lock words (`Version`, `VersionedLock`)
//! - The global commit clock
//! - Thread and epoch identifiers
//! - Limits and lock discipline
//! - Runtime errors and transaction aborts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod limits;
pub mod tid;
pub mod types;

pub use clock::CommitClock;
pub use error::{Abort, AbortReason, Error, Result, TxnResult};
pub use limits::{LimitError, Limits, LockDiscipline};
pub use tid::{Version, VersionedLock};
pub use types::{Epoch, ThreadId};
