//! `volt-hardware`
//!
//! Drivers implementing the `volt-core` capability traits, and the
//! connectors the acquisition engine uses to open them.

pub mod connector;
pub mod drivers;

pub use connector::{SerialConnector, SimulatedConnector};
pub use drivers::energy_meter::SerialEnergyMeter;
pub use drivers::scpi_supply::ScpiSupply;
pub use drivers::simulated::{FaultPlan, InjectedFault, SimulatedBench};
