//! Simulated supply and meter wired to a shared resistive load.
//!
//! The two devices share one [`SimulatedBench`], so the meter reads what the
//! supply is driving: a constant-voltage source into a fixed resistance,
//! current limited by the programmed limit. Energy integrates on the Tokio
//! clock while the accumulator runs, which keeps paused-clock tests exact.
//!
//! A [`FaultPlan`] injects failures deterministically:
//! - per (channel, fetch index): no reply, malformed reply or I/O failure
//! - per device: connect failure with a chosen [`FaultKind`]
//! - a connect delay, to hold a run in its `Connecting` phase
//!
//! # Example
//!
//! ```rust,ignore
//! let plan = FaultPlan::none().on_fetch(Channel::Current, 1, InjectedFault::NoResponse);
//! let bench = SimulatedBench::new(50.0).with_faults(plan);
//! let connector = SimulatedConnector::new(bench.clone());
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use volt_core::error::{FaultKind, InstrumentError, InstrumentResult};
use volt_core::{Channel, EnergyMeter, MeterSetup, PowerSource};

pub const SIMULATED_IDENTITY: &str = "VOLT/RUNNER,SIM-PSU,0,1.0";

/// Failure injected on a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// The meter stays silent for the whole fetch window.
    NoResponse,
    /// The meter answers with text that is not a number.
    Malformed,
    /// The transport fails.
    Io,
}

/// Deterministic fault schedule for a simulated bench.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    fetch_faults: HashMap<(Channel, u32), InjectedFault>,
    connect_source: Option<FaultKind>,
    connect_meter: Option<FaultKind>,
    fail_identity: bool,
    fail_configure: bool,
    connect_delay: Duration,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    /// Fail the `index`-th fetch (0-based) of `channel`.
    pub fn on_fetch(mut self, channel: Channel, index: u32, fault: InjectedFault) -> Self {
        self.fetch_faults.insert((channel, index), fault);
        self
    }

    pub fn fail_source_connect(mut self, kind: FaultKind) -> Self {
        self.connect_source = Some(kind);
        self
    }

    pub fn fail_meter_connect(mut self, kind: FaultKind) -> Self {
        self.connect_meter = Some(kind);
        self
    }

    /// Make `*IDN?` fail.
    pub fn fail_identity(mut self) -> Self {
        self.fail_identity = true;
        self
    }

    /// Make the meter reject its setup.
    pub fn fail_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Delay opening the supply by `delay` on the Tokio clock.
    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

#[derive(Debug)]
struct BenchState {
    load_ohms: f64,
    setpoint_v: f64,
    limit_a: f64,
    output_on: bool,
    accumulating: bool,
    energy_wh: f64,
    last_integration: Option<Instant>,
    fetch_counts: HashMap<Channel, u32>,
    log: Vec<String>,
    plan: FaultPlan,
}

impl BenchState {
    /// Voltage and current at the load right now.
    fn operating_point(&self) -> (f64, f64) {
        if !self.output_on || self.load_ohms <= 0.0 {
            return (0.0, 0.0);
        }
        let unlimited = self.setpoint_v / self.load_ohms;
        if unlimited > self.limit_a {
            (self.limit_a * self.load_ohms, self.limit_a)
        } else {
            (self.setpoint_v, unlimited)
        }
    }

    fn integrate(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_integration {
            if self.accumulating {
                let (v, i) = self.operating_point();
                let hours = now.duration_since(last).as_secs_f64() / 3600.0;
                self.energy_wh += v * i * hours;
            }
        }
        self.last_integration = Some(now);
    }

    fn record(&mut self, entry: impl Into<String>) {
        self.log.push(entry.into());
    }
}

/// Shared simulated load. Cloning yields another handle to the same bench.
#[derive(Debug, Clone)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}

impl SimulatedBench {
    pub fn new(load_ohms: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BenchState {
                load_ohms,
                setpoint_v: 0.0,
                limit_a: 0.0,
                output_on: false,
                accumulating: false,
                energy_wh: 0.0,
                last_integration: None,
                fetch_counts: HashMap::new(),
                log: Vec::new(),
                plan: FaultPlan::none(),
            })),
        }
    }

    pub fn with_faults(self, plan: FaultPlan) -> Self {
        self.state.lock().plan = plan;
        self
    }

    /// Every command the devices received, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn output_on(&self) -> bool {
        self.state.lock().output_on
    }

    pub(crate) fn connect_delay(&self) -> Duration {
        self.state.lock().plan.connect_delay
    }

    fn connect_fault(&self, device: &'static str) -> Option<FaultKind> {
        let state = self.state.lock();
        match device {
            SUPPLY_DEVICE => state.plan.connect_source,
            _ => state.plan.connect_meter,
        }
    }

    pub(crate) fn record(&self, entry: impl Into<String>) {
        self.state.lock().record(entry);
    }
}

const SUPPLY_DEVICE: &str = "psu";
const METER_DEVICE: &str = "meter";

/// Simulated programmable supply.
pub struct SimulatedSupply {
    bench: SimulatedBench,
}

impl SimulatedSupply {
    pub fn connect(bench: &SimulatedBench, address: &str) -> InstrumentResult<Self> {
        if let Some(kind) = bench.connect_fault(SUPPLY_DEVICE) {
            return Err(InstrumentError::new(
                SUPPLY_DEVICE,
                kind,
                format!("cannot open {}", address),
            ));
        }
        bench.record(format!("open psu {}", address));
        Ok(Self {
            bench: bench.clone(),
        })
    }
}

#[async_trait]
impl PowerSource for SimulatedSupply {
    async fn set_voltage(&self, volts: f64) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.integrate();
        state.setpoint_v = volts;
        state.record(format!("VOLTage {}", volts));
        Ok(())
    }

    async fn set_current_limit(&self, amps: f64) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.integrate();
        state.limit_a = amps;
        state.record(format!("CURRent {}", amps));
        Ok(())
    }

    async fn set_output(&self, enabled: bool) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.integrate();
        state.output_on = enabled;
        state.record(if enabled { "OUTPut ON" } else { "OUTPut OFF" });
        Ok(())
    }

    async fn query_identity(&self) -> InstrumentResult<String> {
        let mut state = self.bench.state.lock();
        state.record("*IDN?");
        if state.plan.fail_identity {
            return Err(InstrumentError::timeout(SUPPLY_DEVICE, "no reply to *IDN?"));
        }
        Ok(SIMULATED_IDENTITY.to_string())
    }

    async fn close(&self) -> InstrumentResult<()> {
        self.bench.record("close psu");
        Ok(())
    }
}

/// Simulated energy meter reading the bench load.
pub struct SimulatedMeter {
    bench: SimulatedBench,
    port: String,
}

impl SimulatedMeter {
    pub fn connect(bench: &SimulatedBench, port: &str) -> InstrumentResult<Self> {
        if let Some(kind) = bench.connect_fault(METER_DEVICE) {
            return Err(InstrumentError::new(
                METER_DEVICE,
                kind,
                format!("cannot open {}", port),
            ));
        }
        bench.record(format!("open meter {}", port));
        Ok(Self {
            bench: bench.clone(),
            port: port.to_string(),
        })
    }
}

#[async_trait]
impl EnergyMeter for SimulatedMeter {
    async fn configure(&self, setup: &MeterSetup) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.record(format!(":FUNCtion:mode {}", setup.mode.as_str()));
        if state.plan.fail_configure {
            return Err(InstrumentError::new(
                METER_DEVICE,
                FaultKind::Rejected,
                "mode command rejected",
            ));
        }
        if setup.reset_energy {
            state.energy_wh = 0.0;
            state.record(":FUNCtion:ENERgy reset");
        }
        state.record(":FUNCtion:ecmode MAN");
        if setup.sync_clock.is_some() {
            state.record(":SYSTem clock sync");
        }
        Ok(())
    }

    async fn start_accumulation(&self) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.integrate();
        state.accumulating = true;
        state.record(":FUNCtion:ENERgy run");
        Ok(())
    }

    async fn stop_accumulation(&self) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.integrate();
        state.accumulating = false;
        state.record(":FUNCtion:ENERgy stop");
        Ok(())
    }

    async fn reset_accumulation(&self) -> InstrumentResult<()> {
        let mut state = self.bench.state.lock();
        state.integrate();
        state.energy_wh = 0.0;
        state.record(":FUNCtion:ENERgy reset");
        Ok(())
    }

    async fn fetch(&self, channel: Channel) -> InstrumentResult<Option<f64>> {
        let mut state = self.bench.state.lock();
        state.integrate();

        let count = state.fetch_counts.entry(channel).or_insert(0);
        let index = *count;
        *count += 1;

        if let Some(fault) = state.plan.fetch_faults.get(&(channel, index)).copied() {
            debug!(%channel, index, ?fault, "injecting fetch fault");
            return match fault {
                InjectedFault::NoResponse => Ok(None),
                InjectedFault::Malformed => Err(InstrumentError::malformed(
                    METER_DEVICE,
                    format!("unparsable {} reply: \"#@!\"", channel),
                )),
                InjectedFault::Io => Err(InstrumentError::io(
                    METER_DEVICE,
                    format!("{} fetch failed: device disconnected", channel),
                )),
            };
        }

        let (v, i) = state.operating_point();
        let value = match channel {
            Channel::Voltage => v,
            Channel::Current => i,
            Channel::Power => v * i,
            Channel::Energy => state.energy_wh,
        };
        Ok(Some(value))
    }

    fn port_name(&self) -> String {
        self.port.clone()
    }

    async fn close(&self) -> InstrumentResult<()> {
        self.bench.record("close meter");
        Ok(())
    }
}
