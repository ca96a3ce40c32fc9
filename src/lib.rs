//! # volt-runner
//!
//! Application crate for the volt-runner load tester. The acquisition logic
//! lives in the workspace crates; this crate wires them to a configuration
//! file, a tracing subscriber and the `volt-runner` command line.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered [`VoltConfig`](config::VoltConfig) (defaults, TOML
//!   file, `VOLT_RUNNER_` environment) and its conversion into engine settings.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`observer`**: the store-polling loop behind `run` and `watch`.
//!
//! ## Workspace
//!
//! - `volt-core`: capability traits, fault taxonomy, status model
//! - `volt-hardware`: SCPI supply and energy meter drivers, simulated bench
//! - `volt-storage`: SQLite status store, CSV artifacts, archive summaries
//! - `volt-engine`: acquisition state machine and run controller

pub mod config;
pub mod logging;
pub mod observer;

pub use volt_core as core;
pub use volt_engine as engine;
pub use volt_hardware as hardware;
pub use volt_storage as storage;
