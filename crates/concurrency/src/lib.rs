//! Transaction engine for the stoa STM
//!
//! This crate implements optimistic concurrency control over arbitrary
//! in-memory objects:
//! - `TObject`: the lock/check/install/unlock contract objects implement
//! - `TransItem` and `ItemSet`: the per-transaction access set
//! - `Transaction`: item registration, opacity checking, three-phase commit
//! - `IntRange`: predicates that tolerate concurrent changes
//! - `TransactionManager`: the shared commit clock and policy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod item;
pub mod item_set;
pub mod manager;
pub mod object;
pub mod payload;
pub mod predicate;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use item::{flags, TransItem};
pub use item_set::{ItemIdx, ItemSet};
pub use manager::TransactionManager;
pub use object::{TObject, TxnCtx};
pub use payload::Payload;
pub use predicate::{CmpOp, IntRange};
pub use transaction::{ItemProxy, PendingOperations, Transaction, TxnState};
