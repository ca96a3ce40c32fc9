//! `volt-core`
//!
//! Shared building blocks for the volt-runner load tester.
//!
//! ## Modules
//!
//! - [`capabilities`]: `PowerSource`, `EnergyMeter` and `InstrumentConnector`
//!   traits implemented by the drivers in `volt-hardware`
//! - [`error`]: instrument fault taxonomy and the run-terminating [`RunFault`]
//! - [`status`]: the published run status record
//! - [`measurement`]: samples, per-tick readings and [`TestConfiguration`]
//! - [`cancel`]: cooperative stop channel for a run
//! - [`serial`]: async serial helpers shared by the drivers
//! - [`timing`]: cadence and settle times
//!
//! [`RunFault`]: error::RunFault
//! [`TestConfiguration`]: measurement::TestConfiguration

pub mod cancel;
pub mod capabilities;
pub mod error;
pub mod measurement;
pub mod serial;
pub mod status;
pub mod timing;

pub use cancel::{stop_channel, StopHandle, StopSignal};
pub use capabilities::{
    AcquisitionMode, Channel, EnergyMeter, InstrumentConnector, MeterSetup, PowerSource,
};
pub use error::{FaultKind, FaultPhase, InstrumentError, InstrumentResult, RunFault};
pub use measurement::{Sample, TestConfiguration, TickReading};
pub use status::{RunStatus, StatusText};
pub use timing::AcquisitionTiming;
