//! Run status model shared between the acquisition engine and observers.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle phase of the acquisition engine, as published to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusText {
    #[default]
    Idle,
    Connecting,
    Configuring,
    Running,
    Stopping,
    Stopped,
    Finished,
    Error,
}

impl StatusText {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusText::Idle => "Idle",
            StatusText::Connecting => "Connecting",
            StatusText::Configuring => "Configuring",
            StatusText::Running => "Running",
            StatusText::Stopping => "Stopping",
            StatusText::Stopped => "Stopped",
            StatusText::Finished => "Finished",
            StatusText::Error => "Error",
        }
    }

    /// Whether `is_running` must be set while this phase is published.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StatusText::Connecting
                | StatusText::Configuring
                | StatusText::Running
                | StatusText::Stopping
        )
    }

    /// Terminal phases a run ends in.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatusText::Stopped | StatusText::Finished | StatusText::Error
        )
    }
}

impl std::fmt::Display for StatusText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status string is not a known phase.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status text: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for StatusText {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(StatusText::Idle),
            "Connecting" => Ok(StatusText::Connecting),
            "Configuring" => Ok(StatusText::Configuring),
            "Running" => Ok(StatusText::Running),
            "Stopping" => Ok(StatusText::Stopping),
            "Stopped" => Ok(StatusText::Stopped),
            "Finished" => Ok(StatusText::Finished),
            "Error" => Ok(StatusText::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Placeholder for identities not yet known.
pub const NOT_AVAILABLE: &str = "N/A";

/// Published in place of the supply identity when the query fails.
pub const IDENTITY_FAILED: &str = "IDN Failed";

/// Typed view of the shared status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub status_text: StatusText,
    pub remaining_seconds: f64,
    pub last_error: String,
    pub artifact_path: String,
    pub source_identity: String,
    pub meter_port: String,
    pub result_ready: bool,
    pub stop_requested: bool,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            is_running: false,
            status_text: StatusText::Idle,
            remaining_seconds: 0.0,
            last_error: String::new(),
            artifact_path: String::new(),
            source_identity: NOT_AVAILABLE.to_string(),
            meter_port: NOT_AVAILABLE.to_string(),
            result_ready: false,
            stop_requested: false,
        }
    }
}

impl RunStatus {
    /// `is_running` agrees with the published phase, and a result is only
    /// ready after a finished run.
    pub fn is_consistent(&self) -> bool {
        self.is_running == self.status_text.is_active()
            && (!self.result_ready || self.status_text == StatusText::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            StatusText::Idle,
            StatusText::Connecting,
            StatusText::Configuring,
            StatusText::Running,
            StatusText::Stopping,
            StatusText::Stopped,
            StatusText::Finished,
            StatusText::Error,
        ] {
            assert_eq!(status.as_str().parse::<StatusText>(), Ok(status));
        }
        assert!("Paused".parse::<StatusText>().is_err());
    }

    #[test]
    fn test_active_and_terminal_sets_are_disjoint() {
        assert!(StatusText::Running.is_active());
        assert!(StatusText::Stopping.is_active());
        assert!(!StatusText::Idle.is_active());
        assert!(StatusText::Finished.is_terminal());
        assert!(!StatusText::Stopping.is_terminal());
    }

    #[test]
    fn test_default_status_is_idle_and_consistent() {
        let status = RunStatus::default();
        assert_eq!(status.status_text, StatusText::Idle);
        assert_eq!(status.source_identity, "N/A");
        assert!(status.is_consistent());

        let bad = RunStatus {
            is_running: true,
            status_text: StatusText::Finished,
            ..RunStatus::default()
        };
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_stopping_requires_running_flag() {
        let stale_stop = RunStatus {
            status_text: StatusText::Stopping,
            ..RunStatus::default()
        };
        assert!(!stale_stop.is_consistent());

        let stopping = RunStatus {
            is_running: true,
            ..stale_stop
        };
        assert!(stopping.is_consistent());

        let ready_after_stop = RunStatus {
            status_text: StatusText::Stopped,
            result_ready: true,
            ..RunStatus::default()
        };
        assert!(!ready_after_stop.is_consistent());
    }
}
