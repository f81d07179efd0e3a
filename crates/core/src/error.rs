//! Error types for the STM runtime
//!
//! Two families live here:
//!
//! - [`Error`]: failures of the runtime itself (configuration, registration,
//!   background threads). Returned through [`Result`].
//! - [`Abort`]: an attempt that did not commit. Aborts are ordinary control
//!   flow inside transaction bodies and propagate with `?` through
//!   [`TxnResult`].

use std::io;
use thiserror::Error;

use crate::limits::LimitError;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for operations inside a transaction
pub type TxnResult<T> = std::result::Result<T, Abort>;

/// Error types for the STM runtime
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Configuration parsed but is not usable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Every worker slot is taken
    #[error("Thread registry full: all {capacity} slots in use")]
    RegistryFull {
        /// Number of slots in the registry
        capacity: usize,
    },

    /// A background thread could not be started
    #[error("Background thread error: {0}")]
    Background(String),

    /// A transaction attempt did not commit
    #[error("Transaction aborted: {0}")]
    Aborted(#[from] Abort),

    /// The retry loop gave up
    #[error("Retry limit exceeded after {attempts} attempts (last abort: {last})")]
    RetryLimitExceeded {
        /// Attempts made, including the last failed one
        attempts: u64,
        /// Reason the final attempt aborted
        last: AbortReason,
    },
}

impl From<LimitError> for Error {
    fn from(e: LimitError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

/// Why a transaction attempt aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AbortReason {
    /// A write lock was held by another transaction at commit
    #[error("lock conflict")]
    LockConflict,

    /// A read observed a word locked by another transaction
    #[error("observed locked version")]
    Locked,

    /// A read no longer matches the current version
    #[error("read validation failed")]
    ValidationFailed,

    /// A predicate no longer holds
    #[error("predicate check failed")]
    PredicateFailed,

    /// Two predicates on the same key cannot both hold
    #[error("contradictory predicates")]
    PredicateConflict,

    /// Mid-flight revalidation found an inconsistent snapshot
    #[error("opacity check failed")]
    OpacityCheckFailed,

    /// Revalidation was requested while one was already running
    #[error("recursive opacity check")]
    RecursiveOpacityCheck,

    /// The transaction registered more items than allowed
    #[error("item capacity exceeded")]
    CapacityExceeded,

    /// The transaction body gave up
    #[error("explicit abort")]
    User,

    /// The transaction had already finished
    #[error("transaction not active")]
    NotActive,
}

impl AbortReason {
    /// Whether a fresh attempt could succeed
    pub fn is_retryable(self) -> bool {
        !matches!(self, AbortReason::CapacityExceeded | AbortReason::NotActive)
    }
}

/// A transaction attempt that did not commit
///
/// By the time an `Abort` reaches the caller, every lock the attempt held has
/// been released and every object has run its cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("{reason}")]
pub struct Abort {
    /// Why the attempt stopped
    pub reason: AbortReason,
}

impl Abort {
    /// Wrap a reason
    pub fn new(reason: AbortReason) -> Self {
        Abort { reason }
    }

    /// See [`AbortReason::is_retryable`]
    pub fn is_retryable(&self) -> bool {
        self.reason.is_retryable()
    }
}

impl From<AbortReason> for Abort {
    fn from(reason: AbortReason) -> Self {
        Abort { reason }
    }
}
