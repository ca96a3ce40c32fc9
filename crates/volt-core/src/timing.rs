//! Protocol timing constants.

use std::time::Duration;

/// Cadence and settle times used while driving the instruments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionTiming {
    /// Target spacing between ticks.
    pub record_interval: Duration,
    /// How often observers re-read the store.
    pub observer_refresh: Duration,
    /// Wait for one meter channel reply.
    pub fetch_window: Duration,
    /// Pause after each meter command.
    pub meter_settle: Duration,
    /// Pause after each supply command.
    pub supply_settle: Duration,
    /// Pause between output enable and the first tick.
    pub output_settle: Duration,
}

impl Default for AcquisitionTiming {
    fn default() -> Self {
        Self {
            record_interval: Duration::from_secs(1),
            observer_refresh: Duration::from_millis(750),
            fetch_window: Duration::from_millis(100),
            meter_settle: Duration::from_millis(100),
            supply_settle: Duration::from_millis(200),
            output_settle: Duration::from_secs(1),
        }
    }
}

impl AcquisitionTiming {
    /// All waits zeroed except the record interval. Used with simulated devices.
    pub fn without_settle(record_interval: Duration) -> Self {
        Self {
            record_interval,
            observer_refresh: Duration::from_millis(750),
            fetch_window: Duration::ZERO,
            meter_settle: Duration::ZERO,
            supply_settle: Duration::ZERO,
            output_settle: Duration::ZERO,
        }
    }
}
