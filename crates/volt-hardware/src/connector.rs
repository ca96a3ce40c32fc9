//! Instrument connectors: how the engine obtains device handles.

use crate::drivers::energy_meter::{MeterTiming, SerialEnergyMeter};
use crate::drivers::scpi_supply::ScpiSupply;
use crate::drivers::simulated::{SimulatedBench, SimulatedMeter, SimulatedSupply};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;
use volt_core::error::InstrumentResult;
use volt_core::{AcquisitionTiming, EnergyMeter, InstrumentConnector, PowerSource};

/// Opens the serial SCPI drivers.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    timing: AcquisitionTiming,
}

impl SerialConnector {
    pub fn new(timing: AcquisitionTiming) -> Self {
        Self { timing }
    }
}

#[async_trait]
impl InstrumentConnector for SerialConnector {
    async fn connect_source(
        &self,
        address: &str,
        baud_rate: u32,
    ) -> InstrumentResult<Box<dyn PowerSource>> {
        let supply = ScpiSupply::open(address, baud_rate, self.timing.supply_settle).await?;
        info!(address, "supply connected");
        Ok(Box::new(supply))
    }

    async fn connect_meter(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> InstrumentResult<Box<dyn EnergyMeter>> {
        let timing = MeterTiming {
            settle: self.timing.meter_settle,
            fetch_window: self.timing.fetch_window,
            write_timeout: timeout,
        };
        let meter = SerialEnergyMeter::open(port, baud_rate, timing).await?;
        info!(port, "meter connected");
        Ok(Box::new(meter))
    }
}

/// Opens devices on a [`SimulatedBench`].
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    bench: SimulatedBench,
}

impl SimulatedConnector {
    pub fn new(bench: SimulatedBench) -> Self {
        Self { bench }
    }

    pub fn bench(&self) -> &SimulatedBench {
        &self.bench
    }
}

#[async_trait]
impl InstrumentConnector for SimulatedConnector {
    async fn connect_source(
        &self,
        address: &str,
        _baud_rate: u32,
    ) -> InstrumentResult<Box<dyn PowerSource>> {
        let delay = self.bench.connect_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(SimulatedSupply::connect(&self.bench, address)?))
    }

    async fn connect_meter(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> InstrumentResult<Box<dyn EnergyMeter>> {
        Ok(Box::new(SimulatedMeter::connect(&self.bench, port)?))
    }

    async fn release(&self) -> InstrumentResult<()> {
        self.bench.record("release");
        Ok(())
    }
}
