//! Samples, per-tick readings and the test configuration.

use crate::capabilities::Channel;
use serde::{Deserialize, Serialize};

/// Voltage bounds accepted for a run (volts).
pub const VOLTAGE_RANGE: (f64, f64) = (0.0, 60.0);
/// Current-limit bounds accepted for a run (amperes).
pub const CURRENT_RANGE: (f64, f64) = (0.0, 10.0);
/// Duration bounds accepted for a run (seconds).
pub const DURATION_RANGE: (u32, u32) = (1, 86_400);

/// One live reading published for observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub elapsed_seconds: f64,
    pub voltage: f64,
    pub current: f64,
}

/// Everything fetched from the meter during one tick.
///
/// `None` means the channel did not answer inside its fetch window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReading {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
}

impl TickReading {
    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        match channel {
            Channel::Voltage => self.voltage = value,
            Channel::Current => self.current = value,
            Channel::Power => self.power = value,
            Channel::Energy => self.energy = value,
        }
    }

    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Current => self.current,
            Channel::Power => self.power,
            Channel::Energy => self.energy,
        }
    }

    /// A live sample, only when both voltage and current answered.
    pub fn to_sample(&self, elapsed_seconds: f64) -> Option<Sample> {
        match (self.voltage, self.current) {
            (Some(voltage), Some(current)) => Some(Sample {
                elapsed_seconds,
                voltage,
                current,
            }),
            _ => None,
        }
    }
}

/// Parameters of one acquisition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Supply address: bare port or `ASRL<port>::INSTR`
    pub supply_port: String,
    pub meter_port: String,
    pub target_voltage: f64,
    pub current_limit: f64,
    pub duration_seconds: u32,
}

impl TestConfiguration {
    /// Check the bounds a trigger must enforce before starting a run.
    pub fn validate(&self) -> Result<(), String> {
        if self.supply_port.trim().is_empty() {
            return Err("supply port must not be empty".to_string());
        }
        if self.meter_port.trim().is_empty() {
            return Err("meter port must not be empty".to_string());
        }
        let (v_min, v_max) = VOLTAGE_RANGE;
        if !self.target_voltage.is_finite()
            || self.target_voltage < v_min
            || self.target_voltage > v_max
        {
            return Err(format!(
                "target voltage {} V outside {}..={} V",
                self.target_voltage, v_min, v_max
            ));
        }
        let (i_min, i_max) = CURRENT_RANGE;
        if !self.current_limit.is_finite()
            || self.current_limit < i_min
            || self.current_limit > i_max
        {
            return Err(format!(
                "current limit {} A outside {}..={} A",
                self.current_limit, i_min, i_max
            ));
        }
        let (d_min, d_max) = DURATION_RANGE;
        if self.duration_seconds < d_min || self.duration_seconds > d_max {
            return Err(format!(
                "duration {} s outside {}..={} s",
                self.duration_seconds, d_min, d_max
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TestConfiguration {
        TestConfiguration {
            supply_port: "/dev/ttyUSB0".into(),
            meter_port: "/dev/ttyACM0".into(),
            target_voltage: 5.0,
            current_limit: 1.0,
            duration_seconds: 60,
        }
    }

    #[test]
    fn test_validate_accepts_bounds() {
        assert!(config().validate().is_ok());

        let edge = TestConfiguration {
            target_voltage: 60.0,
            current_limit: 10.0,
            duration_seconds: 86_400,
            ..config()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let too_high = TestConfiguration {
            target_voltage: 60.5,
            ..config()
        };
        assert!(too_high.validate().unwrap_err().contains("target voltage"));

        let zero_duration = TestConfiguration {
            duration_seconds: 0,
            ..config()
        };
        assert!(zero_duration.validate().is_err());

        let nan_current = TestConfiguration {
            current_limit: f64::NAN,
            ..config()
        };
        assert!(nan_current.validate().is_err());
    }

    #[test]
    fn test_sample_requires_voltage_and_current() {
        let mut reading = TickReading::default();
        reading.set(Channel::Voltage, Some(5.0));
        assert_eq!(reading.to_sample(1.0), None);

        reading.set(Channel::Current, Some(0.25));
        let sample = reading.to_sample(1.0).unwrap();
        assert_eq!(sample.voltage, 5.0);
        assert_eq!(sample.current, 0.25);
        assert_eq!(reading.get(Channel::Power), None);
    }
}
