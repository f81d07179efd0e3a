//! Retry policy and outcome accounting for the run loop

use std::time::Duration;
use stoa_core::AbortReason;

use crate::config::StmConfig;

// ============================================================================
// Retry Policy
// ============================================================================

/// How the run loop retries aborted attempts
///
/// # Example
/// ```ignore
/// let policy = RetryPolicy::default()
///     .with_limit(Some(5))
///     .with_backoff_us(10, 200);
/// worker.run_with_policy(&policy, |txn| { ... })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first; unlimited when `None`
    pub limit: Option<u64>,
    /// Backoff before the first retry, in microseconds
    pub base_delay_us: u64,
    /// Backoff ceiling, in microseconds
    pub max_delay_us: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: None,
            base_delay_us: 0,
            max_delay_us: 1000,
        }
    }
}

impl RetryPolicy {
    /// Policy from the runtime config
    pub fn from_config(config: &StmConfig) -> Self {
        Self {
            limit: config.retry_limit,
            base_delay_us: config.backoff_base_us,
            max_delay_us: config.backoff_max_us,
        }
    }

    /// Set the attempt limit
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Set the backoff range
    pub fn with_backoff_us(mut self, base: u64, max: u64) -> Self {
        self.base_delay_us = base;
        self.max_delay_us = max;
        self
    }

    /// Whether another attempt is allowed after `attempts`
    pub fn allows(&self, attempts: u64) -> bool {
        self.limit.map_or(true, |limit| attempts < limit)
    }

    /// Delay before retry number `retry` (exponential backoff)
    pub(crate) fn calculate_delay(&self, retry: u64) -> Duration {
        // Cap the shift to prevent overflow
        let shift = retry.min(63);
        let delay_us = self.base_delay_us.saturating_mul(1u64 << shift);
        Duration::from_micros(delay_us.min(self.max_delay_us))
    }

    /// Wait before retry number `retry`
    pub(crate) fn backoff(&self, retry: u64) {
        let delay = self.calculate_delay(retry);
        if delay.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(delay);
        }
    }
}

// ============================================================================
// Run Outcome
// ============================================================================

/// Result of a transaction body that eventually committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome<R> {
    /// Value returned by the committed attempt
    pub value: R,
    /// Attempts made, the committed one included
    pub attempts: u64,
    /// Attempts that aborted
    pub aborts: u64,
    /// Reason the most recent aborted attempt gave
    pub last_abort: Option<AbortReason>,
}

impl<R> RunOutcome<R> {
    /// Attempts that committed; always one
    pub fn commits(&self) -> u64 {
        self.attempts - self.aborts
    }

    /// Drop the accounting
    pub fn into_value(self) -> R {
        self.value
    }
}
