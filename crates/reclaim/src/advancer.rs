//! Background epoch advancer
//!
//! A dedicated thread calls [`Reclaimer::advance_once`] at a fixed interval.
//!
//! # Design Notes
//!
//! - Owns an `Arc<Reclaimer>`; the epoch state outlives the thread
//! - Graceful shutdown via atomic flag, joined on stop or drop
//! - A panicking deferred callback is logged by `run_all` and does not kill
//!   the thread or skip the callbacks queued after it

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use stoa_core::{Error, Result};
use tracing::{error, info};

use crate::epoch::Reclaimer;

/// Longest single sleep, so shutdown stays responsive with long intervals
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Handle to the running advancer thread
///
/// # Example
///
/// ```ignore
/// let reclaimer = Arc::new(Reclaimer::new(16));
/// let mut advancer = EpochAdvancer::start(Arc::clone(&reclaimer), Duration::from_millis(1))?;
/// // ... run transactions ...
/// advancer.shutdown();
/// reclaimer.release_all();
/// ```
#[derive(Debug)]
pub struct EpochAdvancer {
    shutdown: Arc<AtomicBool>,
    advances: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl EpochAdvancer {
    /// Spawn the advancer thread
    ///
    /// # Errors
    ///
    /// Returns `Error::Background` if the thread cannot be spawned.
    pub fn start(reclaimer: Arc<Reclaimer>, interval: Duration) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let advances = Arc::new(AtomicU64::new(0));

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            let advances = Arc::clone(&advances);
            thread::Builder::new()
                .name("stoa-epoch".to_string())
                .spawn(move || run_loop(&reclaimer, interval, &shutdown, &advances))
                .map_err(|e| {
                    error!(target: "stoa::epoch", error = %e, "Failed to spawn epoch advancer");
                    Error::Background(e.to_string())
                })?
        };

        info!(target: "stoa::epoch", interval_ms = interval.as_millis() as u64, "Epoch advancer started");
        Ok(Self {
            shutdown,
            advances,
            handle: Some(handle),
            interval,
        })
    }

    /// Signal the thread to stop and wait for it
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(target: "stoa::epoch", "Epoch advancer thread panicked");
            }
            info!(
                target: "stoa::epoch",
                advances = self.advances.load(Ordering::Relaxed),
                "Epoch advancer stopped"
            );
        }
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Completed advances so far
    pub fn advances(&self) -> u64 {
        self.advances.load(Ordering::Relaxed)
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for EpochAdvancer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(reclaimer: &Reclaimer, interval: Duration, shutdown: &AtomicBool, advances: &AtomicU64) {
    while !shutdown.load(Ordering::Acquire) {
        let mut remaining = interval;
        while !remaining.is_zero() && !shutdown.load(Ordering::Acquire) {
            let slice = remaining.min(MAX_SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        reclaimer.advance_once();
        advances.fetch_add(1, Ordering::Relaxed);
    }
}
