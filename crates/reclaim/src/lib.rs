//! Epoch-based reclamation for the stoa STM engine
//!
//! Transactional objects retire memory (an old value, a replaced buffer)
//! while other workers may still be reading it. This crate defers the actual
//! release until every worker that could hold a reference has finished:
//!
//! - `ThreadRegistry`: bounded table of worker slots
//! - `Reclaimer`: global/read/active epochs and the advance step
//! - `ThreadHandle`: a registered worker; announces epochs, retires resources
//! - `EpochAdvancer`: background thread driving `Reclaimer::advance_once`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod advancer;
pub mod epoch;
pub mod rcu;
pub mod registry;

pub use advancer::EpochAdvancer;
pub use epoch::{Reclaimer, ThreadHandle};
pub use rcu::RcuQueue;
pub use registry::{ThreadRegistry, ThreadSlot};
