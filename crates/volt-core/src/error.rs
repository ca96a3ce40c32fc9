//! Fault taxonomy for instrument communication and acquisition runs.
//!
//! Two layers of errors exist:
//!
//! - [`InstrumentError`]: raised by a single device operation. It carries the
//!   device label and a [`FaultKind`] so callers can `match` on the category
//!   instead of inspecting message strings.
//! - [`RunFault`]: what the acquisition engine records when a run cannot
//!   continue. It tags the instrument error with the phase it happened in, so
//!   observers can tell a setup failure from a mid-run disconnect.
//!
//! ## Fatal vs non-fatal
//!
//! | Situation                              | Representation                          | Fatal |
//! |----------------------------------------|-----------------------------------------|-------|
//! | Device missing / unreachable at start  | `RunFault::Connection`                  | yes   |
//! | Command rejected during setup          | `RunFault::Configuration`               | yes   |
//! | Channel did not answer in its window   | `Ok(None)` from `EnergyMeter::fetch`    | no    |
//! | Channel answered with garbage          | `FaultKind::MalformedResponse`          | no    |
//! | I/O error on a channel mid-run         | `RunFault::Channel`                     | yes   |
//! | CSV artifact cannot be written         | `RunFault::Artifact`                    | yes   |
//! | Teardown command fails                 | logged only                             | no    |

use thiserror::Error;

// =============================================================================
// Instrument Errors
// =============================================================================

/// Category of an instrument fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Device did not answer within the allowed time.
    Timeout,
    /// Transport-level failure (port closed, cable pulled, write failed).
    Io,
    /// Device or port does not exist.
    NotFound,
    /// Device answered with something that could not be parsed.
    MalformedResponse,
    /// Device refused a command.
    Rejected,
}

impl FaultKind {
    /// Whether a fault of this kind ends a run when it happens on a fetch.
    ///
    /// A malformed reply only spoils the current tick; everything else means
    /// the channel can no longer be trusted.
    pub fn is_fatal_on_fetch(&self) -> bool {
        !matches!(self, FaultKind::MalformedResponse)
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FaultKind::Timeout => "timeout",
            FaultKind::Io => "io",
            FaultKind::NotFound => "not-found",
            FaultKind::MalformedResponse => "malformed-response",
            FaultKind::Rejected => "rejected",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a single instrument operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{device} {kind} fault: {message}")]
pub struct InstrumentError {
    pub device: String,
    pub kind: FaultKind,
    pub message: String,
}

impl InstrumentError {
    pub fn new(device: impl Into<String>, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, FaultKind::Timeout, message)
    }

    pub fn io(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, FaultKind::Io, message)
    }

    pub fn malformed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, FaultKind::MalformedResponse, message)
    }

    /// Classify a `std::io::Error` coming from a device transport.
    pub fn from_io(device: impl Into<String>, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => FaultKind::Timeout,
            std::io::ErrorKind::NotFound => FaultKind::NotFound,
            std::io::ErrorKind::InvalidData => FaultKind::MalformedResponse,
            _ => FaultKind::Io,
        };
        Self::new(device, kind, err.to_string())
    }
}

/// Convenience alias for device operations.
pub type InstrumentResult<T> = std::result::Result<T, InstrumentError>;

// =============================================================================
// Run Faults
// =============================================================================

/// Phase a run fault happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPhase {
    /// Connecting or configuring instruments, or preparing the artifact.
    Setup,
    /// Inside the sample loop.
    InRun,
}

impl std::fmt::Display for FaultPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultPhase::Setup => write!(f, "setup"),
            FaultPhase::InRun => write!(f, "in-run"),
        }
    }
}

/// A fault that terminates an acquisition run.
///
/// The `Display` form is what gets published as `last_error`:
/// `"<phase> fault (<category>) on <device>: <detail>"`.
#[derive(Error, Debug)]
pub enum RunFault {
    /// An instrument could not be opened.
    #[error("setup fault ({}) on {}: {}", .0.kind, .0.device, .0.message)]
    Connection(InstrumentError),

    /// An instrument rejected or failed a setup command.
    #[error("setup fault ({}) on {}: {}", .0.kind, .0.device, .0.message)]
    Configuration(InstrumentError),

    /// The run artifact could not be created or written.
    #[error("{phase} fault (io) on artifact: {source}")]
    Artifact {
        phase: FaultPhase,
        #[source]
        source: std::io::Error,
    },

    /// A channel fetch failed at the transport level during the run.
    #[error("in-run fault ({}) on {}: {}", .0.kind, .0.device, .0.message)]
    Channel(InstrumentError),
}

impl RunFault {
    pub fn phase(&self) -> FaultPhase {
        match self {
            RunFault::Connection(_) | RunFault::Configuration(_) => FaultPhase::Setup,
            RunFault::Artifact { phase, .. } => *phase,
            RunFault::Channel(_) => FaultPhase::InRun,
        }
    }

    /// Category of the underlying fault.
    pub fn kind(&self) -> FaultKind {
        match self {
            RunFault::Connection(e) | RunFault::Configuration(e) | RunFault::Channel(e) => e.kind,
            RunFault::Artifact { .. } => FaultKind::Io,
        }
    }
}
