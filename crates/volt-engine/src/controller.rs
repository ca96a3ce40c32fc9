//! Run trigger and stop protocol.
//!
//! The controller is the only way a run is started. It enforces the single
//! run guard through the store, owns the in-process stop handle and the task
//! running the engine, and turns a stop request into both a durable store
//! flag and, when it holds the handle, an immediate wake-up of the engine.

use crate::engine::{AcquisitionEngine, RunOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use volt_core::{stop_channel, StatusText, StopHandle, TestConfiguration};
use volt_storage::store::flag;
use volt_storage::{StatusStore, StoreError, StoreKey};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("invalid test configuration: {0}")]
    InvalidConfiguration(String),

    #[error("status store error: {0}")]
    Store(#[from] StoreError),

    #[error("acquisition worker failed: {0}")]
    Worker(String),
}

struct ActiveRun {
    stop: StopHandle,
    task: JoinHandle<RunOutcome>,
}

/// Starts, stops and awaits acquisition runs.
pub struct RunController {
    engine: AcquisitionEngine,
    store: Arc<dyn StatusStore>,
    active: Mutex<Option<ActiveRun>>,
}

impl RunController {
    pub fn new(engine: AcquisitionEngine) -> Self {
        let store = engine.store().clone();
        Self {
            engine,
            store,
            active: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Validate, claim the run flag, clear live samples and spawn the engine.
    pub fn start(&self, config: TestConfiguration) -> Result<(), ControlError> {
        config.validate().map_err(ControlError::InvalidConfiguration)?;

        if !self.store.try_begin_run()? {
            warn!("Start rejected: a run is already in progress");
            return Err(ControlError::AlreadyRunning);
        }

        if let Err(e) = self.store.clear_samples() {
            let message = format!("setup fault (io) on store: {}", e);
            let released = self.store.set_many(&[
                (StoreKey::StatusText, StatusText::Error.to_string()),
                (StoreKey::IsRunning, flag(false).to_string()),
                (StoreKey::LastError, message),
            ]);
            if let Err(release_err) = released {
                warn!(error = %release_err, "Could not release run flag after failed start");
            }
            return Err(e.into());
        }

        let (stop, signal) = stop_channel();
        let engine = self.engine.clone();
        let task = tokio::spawn(async move { engine.run(config, signal).await });

        info!("Acquisition run started");
        *self.active.lock() = Some(ActiveRun { stop, task });
        Ok(())
    }

    /// Ask the current run to stop.
    ///
    /// Writes the durable request to the store so a worker in another process
    /// sees it, and signals the local engine directly when this controller
    /// started it. Returns `false` when no run was in progress.
    pub fn request_stop(&self) -> Result<bool, ControlError> {
        let running = request_stop_in_store(self.store.as_ref())?;

        let local = self.active.lock().as_ref().map(|run| {
            run.stop.stop();
            !run.task.is_finished()
        });

        if running {
            info!(local_handle = local.is_some(), "Stop requested");
            Ok(true)
        } else {
            Ok(local.unwrap_or(false))
        }
    }

    /// Whether this controller has a run that has not been awaited yet.
    pub fn has_active_run(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Await the run started by this controller, if any.
    pub async fn wait(&self) -> Result<Option<RunOutcome>, ControlError> {
        let Some(run) = self.active.lock().take() else {
            return Ok(None);
        };

        match run.task.await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                let message = format!("acquisition worker aborted: {}", e);
                let published = self.store.set_many(&[
                    (StoreKey::StatusText, StatusText::Error.to_string()),
                    (StoreKey::IsRunning, flag(false).to_string()),
                    (StoreKey::RemainingTime, "0".to_string()),
                    (StoreKey::PlotReady, flag(false).to_string()),
                    (StoreKey::LastError, message.clone()),
                ]);
                if let Err(store_err) = published {
                    warn!(error = %store_err, "Could not publish worker failure");
                }
                Err(ControlError::Worker(message))
            }
        }
    }

    /// Clear a run flag left behind by a worker that died.
    ///
    /// Refused while this controller still owns a live run.
    pub fn reset(&self) -> Result<(), ControlError> {
        if self
            .active
            .lock()
            .as_ref()
            .is_some_and(|run| !run.task.is_finished())
        {
            return Err(ControlError::AlreadyRunning);
        }
        force_reset(self.store.as_ref())?;
        Ok(())
    }
}

/// Publish a stop request without holding the engine's handle.
///
/// The worker picks the flag up at its next checkpoint. Returns `false`
/// without writing when no run is in progress.
pub fn request_stop_in_store(store: &dyn StatusStore) -> Result<bool, StoreError> {
    store.try_request_stop()
}

/// Return the store to idle regardless of the current flags.
pub fn force_reset(store: &dyn StatusStore) -> Result<(), StoreError> {
    warn!("Forcing run status back to Idle");
    store.set_many(&[
        (StoreKey::IsRunning, flag(false).to_string()),
        (StoreKey::StatusText, StatusText::Idle.to_string()),
        (StoreKey::RemainingTime, "0".to_string()),
        (StoreKey::PlotReady, flag(false).to_string()),
        (StoreKey::StopRequested, flag(false).to_string()),
    ])
}
