//! SCPI Bench Power Supply Driver (serial)
//!
//! Protocol Overview:
//! - Format: SCPI text, one command per line
//! - Baud: 115200, 8N1, no flow control
//! - Terminator: LF (\n)
//! - Commands: `VOLTage <v>`, `CURRent <i>`, `OUTPut ON|OFF`
//! - Queries: `*IDN?`
//!
//! The supply never acknowledges setpoint commands, so each one is followed
//! by a fixed settle delay instead of a read.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let psu = ScpiSupply::open("ASRL/dev/ttyUSB0::INSTR", 115200, Duration::from_millis(200)).await?;
//! psu.set_voltage(5.0).await?;
//! psu.set_current_limit(1.0).await?;
//! psu.set_output(true).await?;
//! ```

use super::scpi::ScpiPort;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};
use volt_core::error::{InstrumentError, InstrumentResult};
use volt_core::serial::{open_serial_async, resource_to_port, wrap_shared, SharedPort};
use volt_core::PowerSource;

pub const DEVICE: &str = "psu";

/// Reply timeout for `*IDN?`.
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial SCPI power supply.
pub struct ScpiSupply {
    port: ScpiPort,
    settle: Duration,
    closed: AtomicBool,
}

impl ScpiSupply {
    /// Open the supply at `address` (bare port or `ASRL<port>::INSTR`).
    pub async fn open(address: &str, baud_rate: u32, settle: Duration) -> InstrumentResult<Self> {
        let path = resource_to_port(address);
        let stream = open_serial_async(path, baud_rate, DEVICE).await?;
        debug!(port = path, baud_rate, "supply port opened");
        Ok(Self::with_port(wrap_shared(Box::new(stream)), settle))
    }

    /// Build on an already open transport.
    pub fn with_port(port: SharedPort, settle: Duration) -> Self {
        Self {
            port: ScpiPort::new(port, DEVICE, IDENTITY_TIMEOUT),
            settle,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> InstrumentResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(InstrumentError::io(DEVICE, "supply already closed"));
        }
        Ok(())
    }

    async fn command(&self, command: &str) -> InstrumentResult<()> {
        self.ensure_open()?;
        self.port.write_line(command).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

#[async_trait]
impl PowerSource for ScpiSupply {
    #[instrument(skip(self), err)]
    async fn set_voltage(&self, volts: f64) -> InstrumentResult<()> {
        self.command(&format!("VOLTage {}", volts)).await
    }

    #[instrument(skip(self), err)]
    async fn set_current_limit(&self, amps: f64) -> InstrumentResult<()> {
        self.command(&format!("CURRent {}", amps)).await
    }

    #[instrument(skip(self), err)]
    async fn set_output(&self, enabled: bool) -> InstrumentResult<()> {
        self.command(if enabled { "OUTPut ON" } else { "OUTPut OFF" })
            .await
    }

    #[instrument(skip(self), err)]
    async fn query_identity(&self) -> InstrumentResult<String> {
        self.ensure_open()?;
        self.port
            .query("*IDN?", IDENTITY_TIMEOUT, true)
            .await?
            .ok_or_else(|| InstrumentError::timeout(DEVICE, "no reply to *IDN?"))
    }

    async fn close(&self) -> InstrumentResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("supply closed");
        }
        Ok(())
    }
}
