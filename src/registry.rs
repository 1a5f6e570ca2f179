//! Process-wide slot for the active automation run
//!
//! Triggers are stateless: `stop()` may arrive from a different request than
//! the `start()` that launched the run. The registry is the shared state that
//! connects them. It is created once, wrapped in an `Arc` and handed to
//! whoever needs it. At most one run is registered at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AutomationError, Result};

#[derive(Debug)]
struct ActiveRun {
    run_id: String,
    stop: CancellationToken,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Signalled { run_id: String },
    NoActiveRun,
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    slot: Mutex<Option<ActiveRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The slot holds plain data, so a poisoned lock is still consistent
    fn lock(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a run and its stop token
    ///
    /// Fails with `RegistryConflict` while another run is registered. The
    /// returned guard clears the slot when dropped.
    pub fn register(self: &Arc<Self>, run_id: &str, stop: CancellationToken) -> Result<RunGuard> {
        let mut slot = self.lock();
        if let Some(active) = slot.as_ref() {
            return Err(AutomationError::RegistryConflict {
                active_run: active.run_id.clone(),
            });
        }

        *slot = Some(ActiveRun {
            run_id: run_id.to_string(),
            stop,
        });
        debug!("Registered automation run {}", run_id);

        Ok(RunGuard {
            registry: Arc::clone(self),
            run_id: run_id.to_string(),
        })
    }

    /// Signal the registered run to stop at its next checkpoint
    pub fn request_stop(&self) -> StopOutcome {
        match self.lock().as_ref() {
            Some(active) => {
                active.stop.cancel();
                info!("Stop requested for automation run {}", active.run_id);
                StopOutcome::Signalled {
                    run_id: active.run_id.clone(),
                }
            }
            None => StopOutcome::NoActiveRun,
        }
    }

    /// Clear the slot if it still holds `run_id`
    pub fn clear(&self, run_id: &str) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|active| active.run_id == run_id) {
            *slot = None;
            debug!("Cleared automation run {}", run_id);
            true
        } else {
            false
        }
    }

    pub fn has_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn active_run_id(&self) -> Option<String> {
        self.lock().as_ref().map(|active| active.run_id.clone())
    }
}

/// Keeps a run registered for as long as it lives
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    run_id: String,
}

impl RunGuard {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.clear(&self.run_id);
    }
}
