//! `volt-engine`
//!
//! The background acquisition state machine ([`AcquisitionEngine`]) and the
//! trigger/stop protocol around it ([`RunController`]).

pub mod controller;
pub mod engine;

pub use controller::{force_reset, request_stop_in_store, ControlError, RunController};
pub use engine::{AcquisitionEngine, EngineSettings, RunOutcome};
