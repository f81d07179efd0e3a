//! Transactional objects for the stoa STM
//!
//! Two objects built on the `TObject` contract:
//! - **TBox**: a single versioned cell; installs swap the value and retire
//!   the old one through epoch reclamation
//! - **TCounter**: a commutative counter; increments never read, and
//!   comparisons record predicates instead of exact reads
//!
//! ## Example
//!
//! ```rust,ignore
//! use stoa_primitives::{TBox, TCounter};
//!
//! let name = TBox::new(String::from("a"));
//! let hits = TCounter::new(0);
//!
//! let mut txn = manager.begin(&thread);
//! let current = name.read(&mut txn)?;
//! name.write(&mut txn, current + "b")?;
//! hits.add(&mut txn, 1)?;
//! txn.commit()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod counter;
pub mod tbox;

pub use counter::TCounter;
pub use tbox::{TBox, VersionPolicy};
