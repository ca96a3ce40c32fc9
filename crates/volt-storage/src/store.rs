//! Shared Run Status Store
//!
//! The store is the only channel between the acquisition worker and the
//! observers. It holds a small set of string-valued status keys and an
//! append-only table of live samples.
//!
//! Every operation is individually atomic. Missing keys read back as their
//! documented default (see [`StoreKey::default_value`]), so a fresh store is
//! indistinguishable from an idle one.
//!
//! Two engines implement [`StatusStore`]:
//! - [`SqliteStatusStore`](crate::SqliteStatusStore): file-backed, shared across processes
//! - [`MemoryStatusStore`](crate::MemoryStatusStore): in-process, for tests and `--simulate`

use thiserror::Error;
use volt_core::status::{RunStatus, StatusText, NOT_AVAILABLE};
use volt_core::Sample;

/// Errors raised by a status store engine.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keys of the `status` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    IsRunning,
    StatusText,
    RemainingTime,
    LastError,
    CurrentCsvFilename,
    PsuIdn,
    MeterPortName,
    PlotReady,
    StopRequested,
}

impl StoreKey {
    pub const ALL: [StoreKey; 9] = [
        StoreKey::IsRunning,
        StoreKey::StatusText,
        StoreKey::RemainingTime,
        StoreKey::LastError,
        StoreKey::CurrentCsvFilename,
        StoreKey::PsuIdn,
        StoreKey::MeterPortName,
        StoreKey::PlotReady,
        StoreKey::StopRequested,
    ];

    /// Column value in the `status` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::IsRunning => "is_running",
            StoreKey::StatusText => "status_text",
            StoreKey::RemainingTime => "remaining_time",
            StoreKey::LastError => "last_error",
            StoreKey::CurrentCsvFilename => "current_csv_filename",
            StoreKey::PsuIdn => "psu_idn",
            StoreKey::MeterPortName => "meter_port_name",
            StoreKey::PlotReady => "plot_ready",
            StoreKey::StopRequested => "stop_requested",
        }
    }

    /// Value reported when the key has never been written.
    pub fn default_value(&self) -> &'static str {
        match self {
            StoreKey::IsRunning => "0",
            StoreKey::StatusText => "Idle",
            StoreKey::RemainingTime => "0",
            StoreKey::LastError => "",
            StoreKey::CurrentCsvFilename => "",
            StoreKey::PsuIdn => NOT_AVAILABLE,
            StoreKey::MeterPortName => NOT_AVAILABLE,
            StoreKey::PlotReady => "0",
            StoreKey::StopRequested => "0",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a boolean flag the way the `status` table stores it.
pub fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Key/value pairs written when a run is claimed.
pub fn fresh_run_entries() -> Vec<(StoreKey, String)> {
    vec![
        (StoreKey::IsRunning, flag(true).to_string()),
        (StoreKey::StatusText, StatusText::Connecting.to_string()),
        (StoreKey::RemainingTime, "0".to_string()),
        (StoreKey::LastError, String::new()),
        (StoreKey::CurrentCsvFilename, String::new()),
        (StoreKey::PsuIdn, NOT_AVAILABLE.to_string()),
        (StoreKey::MeterPortName, NOT_AVAILABLE.to_string()),
        (StoreKey::PlotReady, flag(false).to_string()),
        (StoreKey::StopRequested, flag(false).to_string()),
    ]
}

/// Key/value pairs written when a stop is accepted.
pub fn stop_request_entries() -> Vec<(StoreKey, String)> {
    vec![
        (StoreKey::StatusText, StatusText::Stopping.to_string()),
        (StoreKey::StopRequested, flag(true).to_string()),
    ]
}

/// Contract shared by the status store engines.
pub trait StatusStore: Send + Sync {
    /// Upsert one key.
    fn set(&self, key: StoreKey, value: &str) -> StoreResult<()>;

    /// Raw stored value, `None` if the key was never written.
    fn get_raw(&self, key: StoreKey) -> StoreResult<Option<String>>;

    /// Upsert several keys in one atomic write.
    fn set_many(&self, entries: &[(StoreKey, String)]) -> StoreResult<()>;

    fn append_sample(&self, sample: &Sample) -> StoreResult<()>;

    /// Remove every sample. Safe on an empty table.
    fn clear_samples(&self) -> StoreResult<()>;

    /// All samples in insertion order.
    fn read_all_samples(&self) -> StoreResult<Vec<Sample>>;

    /// Claim the single-run flag.
    ///
    /// Returns `false` without writing anything when `is_running` is already
    /// `"1"`. Otherwise stages [`fresh_run_entries`] in the same transaction.
    fn try_begin_run(&self) -> StoreResult<bool>;

    /// Ask the current run to stop.
    ///
    /// Writes [`stop_request_entries`] only while `is_running` is `"1"`, in
    /// the same transaction as the check. Returns `false` and leaves the
    /// store untouched when no run is in progress.
    fn try_request_stop(&self) -> StoreResult<bool>;

    /// Stored value or the key's default.
    fn get(&self, key: StoreKey) -> StoreResult<String> {
        Ok(self
            .get_raw(key)?
            .unwrap_or_else(|| key.default_value().to_string()))
    }

    fn set_status(&self, status: StatusText) -> StoreResult<()> {
        self.set(StoreKey::StatusText, status.as_str())
    }

    fn get_flag(&self, key: StoreKey) -> StoreResult<bool> {
        Ok(self.get(key)?.trim() == "1")
    }

    /// Typed view of every status key.
    fn snapshot(&self) -> StoreResult<RunStatus> {
        let status_raw = self.get(StoreKey::StatusText)?;
        let status_text = status_raw.parse().unwrap_or_else(|_| {
            tracing::warn!(value = %status_raw, "unrecognised status_text in store");
            StatusText::Idle
        });
        let remaining_seconds = self
            .get(StoreKey::RemainingTime)?
            .trim()
            .parse::<f64>()
            .unwrap_or(0.0)
            .max(0.0);

        Ok(RunStatus {
            is_running: self.get_flag(StoreKey::IsRunning)?,
            status_text,
            remaining_seconds,
            last_error: self.get(StoreKey::LastError)?,
            artifact_path: self.get(StoreKey::CurrentCsvFilename)?,
            source_identity: self.get(StoreKey::PsuIdn)?,
            meter_port: self.get(StoreKey::MeterPortName)?,
            result_ready: self.get_flag(StoreKey::PlotReady)?,
            stop_requested: self.get_flag(StoreKey::StopRequested)?,
        })
    }
}
