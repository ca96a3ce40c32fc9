//! SCPI Power / Energy Meter Driver (serial)
//!
//! Protocol Overview:
//! - Baud: 115200, 8N1, no flow control
//! - Terminator: LF (\n)
//! - Setup: `:FUNCtion:mode DC`, `:FUNCtion:ecmode MAN`,
//!   `:SYSTem:year|MONth|date|hour|MINute|SECond <nn>`
//! - Accumulator: `:FUNCtion:ENERgy reset|run|stop`
//! - Queries: `:FETCh VOLTage|CURRent|power|energy`, reply is a bare number
//!
//! # Important Notes
//!
//! - Setup commands are never acknowledged; each one is followed by a short
//!   settle delay.
//! - The meter sometimes emits unsolicited bytes, so the input buffer is
//!   drained before every fetch.
//! - A fetch that gets no reply inside its window is reported as `Ok(None)`,
//!   not as an error.

use super::scpi::ScpiPort;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};
use volt_core::error::{InstrumentError, InstrumentResult};
use volt_core::serial::{open_serial_async, wrap_shared, SharedPort};
use volt_core::{Channel, EnergyMeter, MeterSetup};

pub const DEVICE: &str = "meter";

/// Settle and reply windows for the meter.
#[derive(Debug, Clone, Copy)]
pub struct MeterTiming {
    pub settle: Duration,
    pub fetch_window: Duration,
    pub write_timeout: Duration,
}

/// Serial SCPI energy meter.
pub struct SerialEnergyMeter {
    port: ScpiPort,
    port_name: String,
    timing: MeterTiming,
    closed: AtomicBool,
}

/// `:FETCh` query for a channel.
pub fn fetch_command(channel: Channel) -> &'static str {
    match channel {
        Channel::Voltage => ":FETCh VOLTage",
        Channel::Current => ":FETCh CURRent",
        Channel::Power => ":FETCh power",
        Channel::Energy => ":FETCh energy",
    }
}

/// Clock-sync commands for `at`, two digits each (year without century).
pub fn clock_commands(at: &NaiveDateTime) -> [String; 6] {
    [
        format!(":SYSTem:year {:02}", at.year().rem_euclid(100)),
        format!(":SYSTem:MONth {:02}", at.month()),
        format!(":SYSTem:date {:02}", at.day()),
        format!(":SYSTem:hour {:02}", at.hour()),
        format!(":SYSTem:MINute {:02}", at.minute()),
        format!(":SYSTem:SECond {:02}", at.second()),
    ]
}

impl SerialEnergyMeter {
    /// Open the meter on `port_path`.
    pub async fn open(port_path: &str, baud_rate: u32, timing: MeterTiming) -> InstrumentResult<Self> {
        let stream = open_serial_async(port_path, baud_rate, DEVICE).await?;
        debug!(port = port_path, baud_rate, "meter port opened");
        Ok(Self::with_port(
            wrap_shared(Box::new(stream)),
            port_path,
            timing,
        ))
    }

    /// Build on an already open transport.
    pub fn with_port(port: SharedPort, port_name: &str, timing: MeterTiming) -> Self {
        Self {
            port: ScpiPort::new(port, DEVICE, timing.write_timeout),
            port_name: port_name.to_string(),
            timing,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> InstrumentResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(InstrumentError::io(DEVICE, "meter already closed"));
        }
        Ok(())
    }

    async fn command(&self, command: &str) -> InstrumentResult<()> {
        self.ensure_open()?;
        self.port.write_line(command).await?;
        tokio::time::sleep(self.timing.settle).await;
        Ok(())
    }
}

fn parse_reading(channel: Channel, reply: &str) -> InstrumentResult<f64> {
    reply
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            InstrumentError::malformed(
                DEVICE,
                format!("unparsable {} reply: {:?}", channel, reply),
            )
        })
}

#[async_trait]
impl EnergyMeter for SerialEnergyMeter {
    #[instrument(skip(self, setup), err)]
    async fn configure(&self, setup: &MeterSetup) -> InstrumentResult<()> {
        self.command(&format!(":FUNCtion:mode {}", setup.mode.as_str()))
            .await?;
        if setup.reset_energy {
            self.command(":FUNCtion:ENERgy reset").await?;
        }
        self.command(":FUNCtion:ecmode MAN").await?;
        if let Some(at) = &setup.sync_clock {
            for cmd in clock_commands(at) {
                self.command(&cmd).await?;
            }
        }
        Ok(())
    }

    async fn start_accumulation(&self) -> InstrumentResult<()> {
        self.command(":FUNCtion:ENERgy run").await
    }

    async fn stop_accumulation(&self) -> InstrumentResult<()> {
        self.command(":FUNCtion:ENERgy stop").await
    }

    async fn reset_accumulation(&self) -> InstrumentResult<()> {
        self.command(":FUNCtion:ENERgy reset").await
    }

    #[instrument(skip(self), level = "trace", err)]
    async fn fetch(&self, channel: Channel) -> InstrumentResult<Option<f64>> {
        self.ensure_open()?;
        let reply = self
            .port
            .query(fetch_command(channel), self.timing.fetch_window, true)
            .await?;
        reply.map(|r| parse_reading(channel, &r)).transpose()
    }

    fn port_name(&self) -> String {
        self.port_name.clone()
    }

    async fn close(&self) -> InstrumentResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(port = %self.port_name, "meter closed");
        }
        Ok(())
    }
}
