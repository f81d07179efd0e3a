//! The STM runtime
//!
//! `Stm` ties the pieces together: one commit clock and lock policy
//! (`TransactionManager`), one epoch reclaimer with its worker registry, and
//! the optional background advancer. Threads join by taking a [`Worker`].
//!
//! ## Lifecycle
//!
//! ```text
//! open ──> worker() per thread ──> run / begin ... ──> shutdown (or drop)
//! ```
//!
//! Shutdown stops the advancer and releases every deferred resource. The
//! borrow checker ensures no worker outlives the runtime.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stoa_concurrency::TransactionManager;
use stoa_core::{Epoch, Result};
use stoa_reclaim::{EpochAdvancer, Reclaimer};
use tracing::{debug, info};

use crate::config::StmConfig;
use crate::retry::RetryPolicy;
use crate::worker::Worker;

/// An STM runtime
pub struct Stm {
    config: StmConfig,
    manager: TransactionManager,
    reclaimer: Arc<Reclaimer>,
    advancer: Mutex<Option<EpochAdvancer>>,
}

impl Stm {
    /// Open a runtime with `config`
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid or the advancer cannot be spawned.
    pub fn open(config: StmConfig) -> Result<Self> {
        config.validate()?;
        let stm = Stm {
            manager: TransactionManager::new(config.to_limits(), config.lock_discipline),
            reclaimer: Arc::new(Reclaimer::new(config.max_threads)),
            advancer: Mutex::new(None),
            config,
        };
        if stm.config.start_advancer {
            stm.start_advancer()?;
        }
        info!(
            target: "stoa::txn",
            max_threads = stm.config.max_threads,
            discipline = %stm.config.lock_discipline,
            "STM runtime opened"
        );
        Ok(stm)
    }

    /// Open a runtime with the default config
    pub fn new() -> Result<Self> {
        Self::open(StmConfig::default())
    }

    /// Open a runtime configured by the TOML file at `path`
    pub fn open_file(path: &Path) -> Result<Self> {
        Self::open(StmConfig::from_file(path)?)
    }

    /// Runtime configuration
    pub fn config(&self) -> &StmConfig {
        &self.config
    }

    /// Commit clock and lock policy
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Epoch reclaimer
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    /// Retry policy `Worker::run` uses
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// Register the calling thread
    ///
    /// # Errors
    ///
    /// Returns `RegistryFull` if every worker slot is taken.
    pub fn worker(&self) -> Result<Worker<'_>> {
        let thread = self.reclaimer.register()?;
        Ok(Worker::new(self, thread))
    }

    // ========================================================================
    // Epoch advancer
    // ========================================================================

    /// Start the background advancer; a no-op if it is running
    pub fn start_advancer(&self) -> Result<()> {
        let mut slot = self.advancer.lock();
        if slot.as_ref().map_or(false, EpochAdvancer::is_running) {
            return Ok(());
        }
        let interval = Duration::from_millis(self.config.epoch_interval_ms);
        *slot = Some(EpochAdvancer::start(Arc::clone(&self.reclaimer), interval)?);
        Ok(())
    }

    /// Stop the background advancer; returns whether one was running
    pub fn stop_advancer(&self) -> bool {
        match self.advancer.lock().take() {
            Some(mut advancer) => {
                advancer.shutdown();
                true
            }
            None => false,
        }
    }

    /// Whether the background advancer is running
    pub fn advancer_running(&self) -> bool {
        self.advancer
            .lock()
            .as_ref()
            .map_or(false, EpochAdvancer::is_running)
    }

    /// Run one advance step on the calling thread
    pub fn advance_epoch(&self) -> Epoch {
        self.reclaimer.advance_once()
    }

    /// Epoch new retirements are tagged with
    pub fn global_epoch(&self) -> Epoch {
        self.reclaimer.global_epoch()
    }

    /// Oldest epoch a write snapshot may still need
    pub fn read_epoch(&self) -> Epoch {
        self.reclaimer.read_epoch()
    }

    /// Resources retired before this epoch are released
    pub fn active_epoch(&self) -> Epoch {
        self.reclaimer.active_epoch()
    }

    /// Retired resources not yet released
    pub fn pending_frees(&self) -> usize {
        self.reclaimer.pending()
    }

    /// Stop the advancer and release every pending resource
    ///
    /// Takes `&mut self`, so no [`Worker`] borrowed from this runtime is
    /// alive. Returns how many resources were released. Safe to call more
    /// than once.
    pub fn shutdown(&mut self) -> usize {
        self.stop_advancer();
        self.reclaimer.release_all()
    }
}

impl Drop for Stm {
    fn drop(&mut self) {
        let released = self.shutdown();
        debug!(target: "stoa::epoch", released, "STM runtime dropped");
    }
}

impl std::fmt::Debug for Stm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stm")
            .field("config", &self.config)
            .field("workers", &self.reclaimer.registry().registered())
            .field("advancer_running", &self.advancer_running())
            .finish()
    }
}
