//! Configuration for volt-runner using Figment
//!
//! Values are layered, later sources winning:
//! 1. built-in defaults
//! 2. `config/volt_runner.toml` (or the file given with `--config`)
//! 3. environment variables prefixed with `VOLT_RUNNER_`, sections split by `__`
//!
//! # Example
//! ```no_run
//! use volt_runner::config::VoltConfig;
//!
//! let config = VoltConfig::load()?;
//! println!("Store: {}", config.storage.db_path.display());
//! # Ok::<(), figment::Error>(())
//! ```
//!
//! `VOLT_RUNNER_INSTRUMENTS__METER_PORT=/dev/ttyACM1` overrides
//! `instruments.meter_port`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use volt_core::{AcquisitionTiming, TestConfiguration};
use volt_engine::EngineSettings;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/volt_runner.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "VOLT_RUNNER_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VoltConfig {
    pub application: ApplicationConfig,
    pub instruments: InstrumentConfig,
    pub timing: TimingConfig,
    pub storage: StorageConfig,
    /// Run parameters used when the command line leaves them out.
    pub defaults: RunDefaults,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "VOLT/RUNNER".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial addresses and line settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Plain device path or an `ASRL<path>::INSTR` resource.
    pub supply_port: String,
    pub supply_baud: u32,
    pub meter_port: String,
    pub meter_baud: u32,
    pub meter_timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            supply_port: "/dev/ttyUSB0".to_string(),
            supply_baud: 115_200,
            meter_port: "/dev/ttyACM0".to_string(),
            meter_baud: 115_200,
            meter_timeout_ms: 2000,
        }
    }
}

/// Cadence and settle times in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub record_interval_ms: u64,
    pub observer_refresh_ms: u64,
    pub fetch_window_ms: u64,
    pub meter_settle_ms: u64,
    pub supply_settle_ms: u64,
    pub output_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let timing = AcquisitionTiming::default();
        Self {
            record_interval_ms: millis(timing.record_interval),
            observer_refresh_ms: millis(timing.observer_refresh),
            fetch_window_ms: millis(timing.fetch_window),
            meter_settle_ms: millis(timing.meter_settle),
            supply_settle_ms: millis(timing.supply_settle),
            output_settle_ms: millis(timing.output_settle),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl TimingConfig {
    pub fn to_timing(&self) -> AcquisitionTiming {
        AcquisitionTiming {
            record_interval: Duration::from_millis(self.record_interval_ms),
            observer_refresh: Duration::from_millis(self.observer_refresh_ms),
            fetch_window: Duration::from_millis(self.fetch_window_ms),
            meter_settle: Duration::from_millis(self.meter_settle_ms),
            supply_settle: Duration::from_millis(self.supply_settle_ms),
            output_settle: Duration::from_millis(self.output_settle_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the shared run status.
    pub db_path: PathBuf,
    /// Directory receiving one CSV artifact per run.
    pub csv_dir: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("Database/VoltRunner.db"),
            csv_dir: PathBuf::from("csv"),
            busy_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDefaults {
    pub target_voltage: f64,
    pub current_limit: f64,
    pub duration_seconds: u32,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            target_voltage: 3.7,
            current_limit: 1.0,
            duration_seconds: 10,
        }
    }
}

/// Parameters of the simulated bench used with `--simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub load_ohms: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { load_ohms: 50.0 }
    }
}

impl VoltConfig {
    /// Load from the default path and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path. A missing file leaves the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(VoltConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.timing.record_interval_ms == 0 {
            return Err("timing.record_interval_ms must be greater than 0".to_string());
        }
        if self.timing.observer_refresh_ms == 0 {
            return Err("timing.observer_refresh_ms must be greater than 0".to_string());
        }
        if self.instruments.supply_baud == 0 || self.instruments.meter_baud == 0 {
            return Err("baud rates must be greater than 0".to_string());
        }
        if self.instruments.meter_timeout_ms == 0 {
            return Err("instruments.meter_timeout_ms must be greater than 0".to_string());
        }
        if self.simulation.load_ohms.is_nan() || self.simulation.load_ohms <= 0.0 {
            return Err(format!(
                "simulation.load_ohms must be positive, got {}",
                self.simulation.load_ohms
            ));
        }

        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            supply_baud: self.instruments.supply_baud,
            meter_baud: self.instruments.meter_baud,
            meter_timeout: Duration::from_millis(self.instruments.meter_timeout_ms),
            artifact_dir: self.storage.csv_dir.clone(),
            timing: self.timing.to_timing(),
        }
    }

    /// Run parameters from the config, each replaceable by an explicit value.
    pub fn test_configuration(
        &self,
        voltage: Option<f64>,
        current_limit: Option<f64>,
        duration_seconds: Option<u32>,
    ) -> TestConfiguration {
        TestConfiguration {
            supply_port: self.instruments.supply_port.clone(),
            meter_port: self.instruments.meter_port.clone(),
            target_voltage: voltage.unwrap_or(self.defaults.target_voltage),
            current_limit: current_limit.unwrap_or(self.defaults.current_limit),
            duration_seconds: duration_seconds.unwrap_or(self.defaults.duration_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = VoltConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.to_timing(), AcquisitionTiming::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = VoltConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_record_interval_rejected() {
        let mut config = VoltConfig::default();
        config.timing.record_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("record_interval_ms"));
    }

    #[test]
    fn test_non_positive_load_rejected() {
        let mut config = VoltConfig::default();
        config.simulation.load_ohms = 0.0;
        assert!(config.validate().is_err());
        config.simulation.load_ohms = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_settings_follow_config() {
        let mut config = VoltConfig::default();
        config.instruments.meter_timeout_ms = 500;
        config.storage.csv_dir = PathBuf::from("runs");
        config.timing.record_interval_ms = 250;

        let settings = config.engine_settings();
        assert_eq!(settings.meter_timeout, Duration::from_millis(500));
        assert_eq!(settings.artifact_dir, PathBuf::from("runs"));
        assert_eq!(settings.timing.record_interval, Duration::from_millis(250));
        assert_eq!(settings.supply_baud, 115_200);
    }

    #[test]
    fn test_test_configuration_overrides() {
        let config = VoltConfig::default();
        let run = config.test_configuration(Some(12.0), None, Some(60));
        assert_eq!(run.target_voltage, 12.0);
        assert_eq!(run.current_limit, 1.0);
        assert_eq!(run.duration_seconds, 60);
        assert_eq!(run.supply_port, "/dev/ttyUSB0");
        assert_eq!(run.meter_port, "/dev/ttyACM0");
        assert!(run.validate().is_ok());
    }
}
