//! Instrument Capabilities
//!
//! The acquisition engine never talks to a serial port directly. It drives two
//! small capability traits, one per instrument role, and obtains the handles
//! through an [`InstrumentConnector`]:
//!
//! - [`PowerSource`]: a programmable bench supply (voltage, current limit,
//!   output switch, identity query)
//! - [`EnergyMeter`]: a power/energy meter with an accumulating energy counter
//!   and four independently fetched channels
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Returns [`InstrumentResult`] so the caller can match on [`FaultKind`]
//! - Uses `&self`; drivers keep their port behind a mutex
//!
//! [`FaultKind`]: crate::error::FaultKind
//!
//! # Example
//!
//! ```rust,ignore
//! async fn energize(psu: &dyn PowerSource, volts: f64, amps: f64) -> InstrumentResult<()> {
//!     psu.set_voltage(volts).await?;
//!     psu.set_current_limit(amps).await?;
//!     psu.set_output(true).await
//! }
//! ```

use crate::error::InstrumentResult;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;

// =============================================================================
// Meter Channels
// =============================================================================

/// A measured quantity fetched from the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Voltage,
    Current,
    Power,
    Energy,
}

impl Channel {
    /// All channels in fetch order.
    pub const ALL: [Channel; 4] = [
        Channel::Voltage,
        Channel::Current,
        Channel::Power,
        Channel::Energy,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Channel::Voltage => "voltage",
            Channel::Current => "current",
            Channel::Power => "power",
            Channel::Energy => "energy",
        }
    }

}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// =============================================================================
// Meter Setup
// =============================================================================

/// Measurement function selected on the meter. Runs only use DC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    #[default]
    Dc,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Dc => "DC",
        }
    }
}

/// Settings pushed to the meter during the configure phase.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSetup {
    pub mode: AcquisitionMode,
    /// Zero the energy counter before the run.
    pub reset_energy: bool,
    /// Local wall-clock time to program into the meter, if any.
    pub sync_clock: Option<NaiveDateTime>,
}

impl MeterSetup {
    /// DC mode, energy reset, clock synced to `now`.
    pub fn for_run(now: NaiveDateTime) -> Self {
        Self {
            mode: AcquisitionMode::Dc,
            reset_energy: true,
            sync_clock: Some(now),
        }
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Programmable DC Source
///
/// # Contract
/// - `set_voltage` / `set_current_limit` take effect on the next output enable
/// - `query_identity` is best effort; callers substitute a placeholder on error
/// - `close` releases the transport; calling it twice is harmless
#[async_trait]
pub trait PowerSource: Send + Sync {
    /// Program the output voltage setpoint (volts)
    async fn set_voltage(&self, volts: f64) -> InstrumentResult<()>;

    /// Program the current limit (amperes)
    async fn set_current_limit(&self, amps: f64) -> InstrumentResult<()>;

    /// Switch the output on or off
    async fn set_output(&self, enabled: bool) -> InstrumentResult<()>;

    /// Identification string (`*IDN?` reply or equivalent)
    async fn query_identity(&self) -> InstrumentResult<String>;

    /// Release the device
    async fn close(&self) -> InstrumentResult<()>;
}

/// Capability: Power / Energy Meter
///
/// # Contract
/// - `fetch` returns `Ok(None)` when the channel produced no reply within its
///   fetch window. That is not an error; the caller records a missing value.
/// - `fetch` returns `Err` with `FaultKind::MalformedResponse` when the reply
///   could not be parsed, and any other kind for transport failures.
#[async_trait]
pub trait EnergyMeter: Send + Sync {
    /// Apply acquisition mode, energy reset and clock sync
    async fn configure(&self, setup: &MeterSetup) -> InstrumentResult<()>;

    /// Start the energy accumulator
    async fn start_accumulation(&self) -> InstrumentResult<()>;

    /// Stop the energy accumulator
    async fn stop_accumulation(&self) -> InstrumentResult<()>;

    /// Zero the energy accumulator
    async fn reset_accumulation(&self) -> InstrumentResult<()>;

    /// Fetch one channel
    async fn fetch(&self, channel: Channel) -> InstrumentResult<Option<f64>>;

    /// Name of the port the meter is attached to
    fn port_name(&self) -> String;

    /// Release the device
    async fn close(&self) -> InstrumentResult<()>;
}

/// Opens instruments for a run and owns any shared transport behind them
/// (a VISA resource manager, a USB context, a simulated bench).
#[async_trait]
pub trait InstrumentConnector: Send + Sync {
    /// Open the supply at `address`
    async fn connect_source(
        &self,
        address: &str,
        baud_rate: u32,
    ) -> InstrumentResult<Box<dyn PowerSource>>;

    /// Open the meter at `port`
    async fn connect_meter(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> InstrumentResult<Box<dyn EnergyMeter>>;

    /// Release the shared transport after both devices are closed
    async fn release(&self) -> InstrumentResult<()> {
        Ok(())
    }
}
