//! Runtime layer for the stoa STM
//!
//! Wires the transaction manager, the epoch reclaimer and the background
//! advancer into one [`Stm`] runtime, and gives each thread a [`Worker`]
//! with a retry loop:
//!
//! ```rust,ignore
//! use stoa_engine::Stm;
//! use stoa_primitives::TCounter;
//!
//! let stm = Stm::new()?;
//! let counter = TCounter::new(0);
//!
//! let worker = stm.worker()?;
//! let outcome = worker.run(|txn| {
//!     let v = counter.get(txn)?;
//!     counter.set(txn, v + 1)
//! })?;
//! println!("committed after {} attempts", outcome.attempts);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod retry;
pub mod runtime;
pub mod worker;

pub use config::{StmConfig, CONFIG_FILE_NAME};
pub use retry::{RetryPolicy, RunOutcome};
pub use runtime::Stm;
pub use worker::Worker;
