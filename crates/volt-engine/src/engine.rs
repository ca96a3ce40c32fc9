//! AcquisitionEngine - the measurement run state machine
//!
//! One call to [`AcquisitionEngine::run`] drives one load test from device
//! connection to terminal status. Every transition is published to the
//! status store before the engine moves on, so observers never see a phase
//! the engine has not reached.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()  ┌────────────┐      ┌─────────────┐      ┌─────────┐
//! │ Idle │────────▶│ Connecting │─────▶│ Configuring │─────▶│ Running │
//! └──────┘         └─────┬──────┘      └──────┬──────┘      └────┬────┘
//!                        │ fault              │ fault            │
//!                        ▼                    ▼                  │ duration elapsed ──▶ Finished
//!                    ┌───────┐◀───────────────────────────────────┤ channel fault ──────▶ Error
//!                    │ Error │                                   │ stop ──▶ Stopping ──▶ Stopped
//!                    └───────┘
//! ```
//!
//! A stop request is honoured at every phase boundary as well as at the top
//! of each tick. A run stopped before it reaches `Running` never switches the
//! supply output on and never creates an artifact.
//!
//! Store calls are synchronous, so the engine runs each one on Tokio's
//! blocking pool and never stalls the worker thread driving the run.
//!
//! Whatever the exit, cleanup runs (meter accumulator stopped and reset,
//! supply output off, both devices closed, shared transport released, CSV
//! flushed) and only then is the terminal status published together with
//! `is_running = 0`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = AcquisitionEngine::new(store, connector, EngineSettings::default());
//! let (handle, signal) = stop_channel();
//! let outcome = engine.run(config, signal).await;
//! println!("{} after {} rows", outcome.status, outcome.rows_written);
//! ```

use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use volt_core::error::{FaultPhase, InstrumentResult, RunFault};
use volt_core::status::IDENTITY_FAILED;
use volt_core::{
    AcquisitionTiming, Channel, EnergyMeter, InstrumentConnector, MeterSetup, PowerSource,
    StatusText, StopSignal, TestConfiguration, TickReading,
};
use volt_storage::store::flag;
use volt_storage::{CsvArtifact, StatusStore, StoreError, StoreKey, StoreResult};

/// Link and file settings that stay fixed across runs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub supply_baud: u32,
    pub meter_baud: u32,
    pub meter_timeout: Duration,
    pub artifact_dir: PathBuf,
    pub timing: AcquisitionTiming,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            supply_baud: 115_200,
            meter_baud: 115_200,
            meter_timeout: Duration::from_secs(2),
            artifact_dir: PathBuf::from("csv"),
            timing: AcquisitionTiming::default(),
        }
    }
}

/// What a finished run reports back to its in-process caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: StatusText,
    pub artifact_path: Option<PathBuf>,
    pub rows_written: usize,
    pub samples_published: usize,
    pub error: Option<String>,
}

/// How the sample loop ended when no fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Completed,
    Cancelled,
}

/// Resources owned by one run. Everything here is released by cleanup.
#[derive(Default)]
struct Session {
    source: Option<Box<dyn PowerSource>>,
    meter: Option<Box<dyn EnergyMeter>>,
    artifact: Option<CsvArtifact>,
    samples: usize,
}

/// Drives one acquisition run at a time.
#[derive(Clone)]
pub struct AcquisitionEngine {
    store: Arc<dyn StatusStore>,
    connector: Arc<dyn InstrumentConnector>,
    settings: EngineSettings,
}

impl AcquisitionEngine {
    pub fn new(
        store: Arc<dyn StatusStore>,
        connector: Arc<dyn InstrumentConnector>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            connector,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Execute one run to completion.
    ///
    /// Never fails: faults end up in the returned outcome and in the store.
    /// The configuration is assumed to be validated by the caller.
    pub async fn run(&self, config: TestConfiguration, mut stop: StopSignal) -> RunOutcome {
        info!(
            supply = %config.supply_port,
            meter = %config.meter_port,
            volts = config.target_voltage,
            amps = config.current_limit,
            duration_s = config.duration_seconds,
            "Starting acquisition run"
        );

        let mut session = Session::default();
        let result = self.execute(&config, &mut stop, &mut session).await;

        let (status, error) = match result {
            Ok(LoopExit::Completed) => (StatusText::Finished, None),
            Ok(LoopExit::Cancelled) => (StatusText::Stopped, None),
            Err(fault) => {
                error!(phase = %fault.phase(), kind = %fault.kind(), error = %fault, "Run failed");
                (StatusText::Error, Some(fault.to_string()))
            }
        };

        self.cleanup(&mut session).await;

        let rows_written = session.artifact.as_ref().map_or(0, CsvArtifact::rows);
        let artifact_path = session.artifact.as_ref().map(|a| a.path().to_path_buf());
        self.publish_terminal(status, error.as_deref(), rows_written).await;

        info!(
            status = %status,
            rows = rows_written,
            samples = session.samples,
            "Acquisition run ended"
        );

        RunOutcome {
            status,
            artifact_path,
            rows_written,
            samples_published: session.samples,
            error,
        }
    }

    async fn execute(
        &self,
        config: &TestConfiguration,
        stop: &mut StopSignal,
        session: &mut Session,
    ) -> Result<LoopExit, RunFault> {
        let timing = self.settings.timing;

        if self.stop_pending(stop).await {
            return Ok(self.cancel_before_sampling("start").await);
        }

        // Connect
        self.publish_status(StatusText::Connecting).await;
        let source: &dyn PowerSource = &**session.source.insert(
            self.connector
                .connect_source(&config.supply_port, self.settings.supply_baud)
                .await
                .map_err(RunFault::Connection)?,
        );
        let meter: &dyn EnergyMeter = &**session.meter.insert(
            self.connector
                .connect_meter(
                    &config.meter_port,
                    self.settings.meter_baud,
                    self.settings.meter_timeout,
                )
                .await
                .map_err(RunFault::Connection)?,
        );

        let identity = match source.query_identity().await {
            Ok(idn) => idn,
            Err(e) => {
                warn!(error = %e, "Supply identity query failed");
                IDENTITY_FAILED.to_string()
            }
        };
        self.publish(StoreKey::PsuIdn, identity).await;
        self.publish(StoreKey::MeterPortName, meter.port_name()).await;
        if self.stop_pending(stop).await {
            return Ok(self.cancel_before_sampling("connect").await);
        }

        // Configure
        self.publish_status(StatusText::Configuring).await;
        source
            .set_voltage(config.target_voltage)
            .await
            .map_err(RunFault::Configuration)?;
        source
            .set_current_limit(config.current_limit)
            .await
            .map_err(RunFault::Configuration)?;
        meter
            .configure(&MeterSetup::for_run(Local::now().naive_local()))
            .await
            .map_err(RunFault::Configuration)?;
        if self.stop_pending(stop).await {
            return Ok(self.cancel_before_sampling("configure").await);
        }

        // Energize
        source
            .set_output(true)
            .await
            .map_err(RunFault::Configuration)?;
        tokio::time::sleep(timing.output_settle).await;
        meter
            .start_accumulation()
            .await
            .map_err(RunFault::Configuration)?;
        if self.stop_pending(stop).await {
            return Ok(self.cancel_before_sampling("energize").await);
        }

        let started = Instant::now();
        let artifact = session.artifact.insert(
            CsvArtifact::create(&self.settings.artifact_dir, Local::now()).map_err(|source| {
                RunFault::Artifact {
                    phase: FaultPhase::Setup,
                    source,
                }
            })?,
        );
        self.publish(
            StoreKey::CurrentCsvFilename,
            artifact.path().display().to_string(),
        )
        .await;
        self.publish_status(StatusText::Running).await;

        // Sample loop
        let duration = f64::from(config.duration_seconds);
        loop {
            if self.stop_pending(stop).await {
                info!("Stop requested, leaving sample loop");
                self.publish_status(StatusText::Stopping).await;
                return Ok(LoopExit::Cancelled);
            }

            let tick_start = Instant::now();
            let elapsed = tick_start.duration_since(started).as_secs_f64();
            if elapsed >= duration {
                debug!(elapsed, "Run duration reached");
                return Ok(LoopExit::Completed);
            }

            let at = Local::now();
            let artifact_fault = |source| RunFault::Artifact {
                phase: FaultPhase::InRun,
                source,
            };
            match read_tick(meter).await {
                Ok(reading) => {
                    artifact
                        .write_reading(at, elapsed, &reading)
                        .map_err(artifact_fault)?;
                    if let Some(sample) = reading.to_sample(elapsed) {
                        match self.store_op(move |store| store.append_sample(&sample)).await {
                            Ok(()) => session.samples += 1,
                            Err(e) => warn!(error = %e, "Failed to publish live sample"),
                        }
                    }
                }
                Err(e) if !e.kind.is_fatal_on_fetch() => {
                    warn!(elapsed, error = %e, "Unusable reading, tick recorded as ERROR");
                    artifact.write_error(at, elapsed).map_err(artifact_fault)?;
                }
                Err(e) => {
                    artifact.write_error(at, elapsed).map_err(artifact_fault)?;
                    return Err(RunFault::Channel(e));
                }
            }

            let remaining = (duration - elapsed).max(0.0);
            self.publish(StoreKey::RemainingTime, format!("{:.3}", remaining)).await;

            let wait = timing.record_interval.saturating_sub(tick_start.elapsed());
            stop.wait_timeout(wait).await;
        }
    }

    /// Release everything the session holds. Each step is independent and
    /// only logged on failure.
    async fn cleanup(&self, session: &mut Session) {
        if let Some(meter) = session.meter.take() {
            if let Err(e) = meter.stop_accumulation().await {
                warn!(error = %e, "Cleanup: stopping energy accumulation failed");
            }
            if let Err(e) = meter.reset_accumulation().await {
                warn!(error = %e, "Cleanup: resetting energy accumulation failed");
            }
            if let Err(e) = meter.close().await {
                warn!(error = %e, "Cleanup: closing meter failed");
            }
        }

        if let Some(source) = session.source.take() {
            if let Err(e) = source.set_output(false).await {
                warn!(error = %e, "Cleanup: switching supply output off failed");
            }
            if let Err(e) = source.close().await {
                warn!(error = %e, "Cleanup: closing supply failed");
            }
        }

        if let Err(e) = self.connector.release().await {
            warn!(error = %e, "Cleanup: releasing instrument transport failed");
        }

        if let Some(artifact) = session.artifact.as_mut() {
            if let Err(e) = artifact.flush() {
                warn!(path = %artifact.path().display(), error = %e, "Cleanup: flushing artifact failed");
            }
        }

        debug!("Cleanup complete");
    }

    async fn publish_terminal(
        &self,
        status: StatusText,
        error: Option<&str>,
        rows_written: usize,
    ) {
        let plot_ready = status == StatusText::Finished && rows_written > 0;
        let mut entries = vec![
            (StoreKey::StatusText, status.to_string()),
            (StoreKey::IsRunning, flag(false).to_string()),
            (StoreKey::RemainingTime, "0".to_string()),
            (StoreKey::PlotReady, flag(plot_ready).to_string()),
            (StoreKey::StopRequested, flag(false).to_string()),
        ];
        if let Some(message) = error {
            entries.push((StoreKey::LastError, message.to_string()));
        }
        if let Err(e) = self.store_op(move |store| store.set_many(&entries)).await {
            warn!(error = %e, status = %status, "Failed to publish terminal status");
        }
    }

    /// Leave before the sample loop, with no artifact created.
    async fn cancel_before_sampling(&self, phase: &'static str) -> LoopExit {
        info!(phase, "Stop requested before sampling started");
        self.publish_status(StatusText::Stopping).await;
        LoopExit::Cancelled
    }

    async fn stop_pending(&self, stop: &StopSignal) -> bool {
        stop.is_set() || self.durable_stop_requested().await
    }

    async fn durable_stop_requested(&self) -> bool {
        self.store_op(|store| store.get_flag(StoreKey::StopRequested))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read stop flag");
                false
            })
    }

    async fn publish_status(&self, status: StatusText) {
        debug!(status = %status, "Publishing status");
        if let Err(e) = self.store_op(move |store| store.set_status(status)).await {
            warn!(error = %e, status = %status, "Failed to publish status");
        }
    }

    async fn publish(&self, key: StoreKey, value: String) {
        if let Err(e) = self.store_op(move |store| store.set(key, &value)).await {
            warn!(error = %e, key = %key, "Failed to publish status value");
        }
    }

    /// Run one store call on the blocking pool.
    async fn store_op<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StatusStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Fetch every channel once, in order.
async fn read_tick(meter: &dyn EnergyMeter) -> InstrumentResult<TickReading> {
    let mut reading = TickReading::default();
    for channel in Channel::ALL {
        reading.set(channel, meter.fetch(channel).await?);
    }
    Ok(reading)
}
