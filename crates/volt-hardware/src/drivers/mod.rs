//! Instrument drivers.
//!
//! - [`scpi_supply`]: serial SCPI bench supply
//! - [`energy_meter`]: serial SCPI power/energy meter
//! - [`simulated`]: supply and meter on a shared simulated load

pub mod energy_meter;
pub mod scpi;
pub mod scpi_supply;
pub mod simulated;
