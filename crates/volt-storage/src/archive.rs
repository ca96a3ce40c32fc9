//! Read-only summaries of completed run artifacts.
//!
//! Loads a CSV written by [`CsvArtifact`](crate::CsvArtifact), treats `N/A`
//! and `ERROR` cells as missing, optionally narrows to a minute window
//! measured from the first timestamp, and reports min/max/mean for voltage
//! (V), current (mA) and power (mW). A battery-life estimate divides a
//! capacity by the mean current of the window.

use crate::artifact::HEADER;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact is missing column {0:?}")]
    MissingColumn(&'static str),

    #[error("invalid window: start minute {from} is after end minute {to}")]
    InvalidWindow { from: u32, to: u32 },

    #[error("no data available for the selected window")]
    NoData,

    #[error("battery capacity must be positive, got {0} mAh")]
    InvalidCapacity(f64),

    #[error("average current is zero or negative ({0} mA), cannot estimate battery life")]
    NonPositiveCurrent(f64),
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// One artifact row with non-numeric cells coerced to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedRow {
    pub timestamp: Option<NaiveDateTime>,
    pub elapsed_seconds: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
}

/// Inclusive window in whole minutes from the first timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteWindow {
    pub from_minute: u32,
    pub to_minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl ChannelStats {
    /// Statistics over the present values, `None` when there are none.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Self {
            min,
            max,
            mean: sum / count as f64,
            count,
        })
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl std::fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "max {} min {} mean {}",
            round3(self.max),
            round3(self.min),
            round3(self.mean)
        )
    }
}

/// Statistics for one artifact (or a window of it).
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSummary {
    pub rows: usize,
    pub voltage_v: Option<ChannelStats>,
    pub current_ma: Option<ChannelStats>,
    pub power_mw: Option<ChannelStats>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryEstimate {
    pub capacity_wh: f64,
    pub hours: f64,
    pub days: f64,
}

/// A loaded artifact.
#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
    rows: Vec<ArchivedRow>,
}

fn parse_cell(cell: Option<&str>) -> Option<f64> {
    cell.and_then(|c| c.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn parse_timestamp(cell: Option<&str>) -> Option<NaiveDateTime> {
    cell.and_then(|c| NaiveDateTime::parse_from_str(c.trim(), "%Y-%m-%d %H:%M:%S%.f").ok())
}

impl Archive {
    pub fn load(path: impl AsRef<Path>) -> ArchiveResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or(ArchiveError::MissingColumn(name))
        };
        let [ts, el, v, i, p, e] = [
            column(HEADER[0])?,
            column(HEADER[1])?,
            column(HEADER[2])?,
            column(HEADER[3])?,
            column(HEADER[4])?,
            column(HEADER[5])?,
        ];

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(ArchivedRow {
                timestamp: parse_timestamp(record.get(ts)),
                elapsed_seconds: parse_cell(record.get(el)),
                voltage: parse_cell(record.get(v)),
                current: parse_cell(record.get(i)),
                power: parse_cell(record.get(p)),
                energy: parse_cell(record.get(e)),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[ArchivedRow] {
        &self.rows
    }

    /// Rows whose timestamp falls inside `window`, or every row when `None`.
    pub fn select(&self, window: Option<MinuteWindow>) -> ArchiveResult<Vec<&ArchivedRow>> {
        let Some(window) = window else {
            return Ok(self.rows.iter().collect());
        };
        if window.from_minute > window.to_minute {
            return Err(ArchiveError::InvalidWindow {
                from: window.from_minute,
                to: window.to_minute,
            });
        }
        let Some(first) = self.rows.iter().filter_map(|r| r.timestamp).min() else {
            return Ok(Vec::new());
        };
        let start = first + ChronoDuration::minutes(i64::from(window.from_minute));
        let end = first + ChronoDuration::minutes(i64::from(window.to_minute));
        Ok(self
            .rows
            .iter()
            .filter(|r| r.timestamp.is_some_and(|t| t >= start && t <= end))
            .collect())
    }

    pub fn summarize(&self, window: Option<MinuteWindow>) -> ArchiveResult<ArchiveSummary> {
        let rows = self.select(window)?;
        if rows.is_empty() {
            return Err(ArchiveError::NoData);
        }
        Ok(ArchiveSummary {
            rows: rows.len(),
            voltage_v: ChannelStats::from_values(rows.iter().filter_map(|r| r.voltage)),
            current_ma: ChannelStats::from_values(
                rows.iter().filter_map(|r| r.current).map(|a| a * 1000.0),
            ),
            power_mw: ChannelStats::from_values(
                rows.iter().filter_map(|r| r.power).map(|w| w * 1000.0),
            ),
        })
    }
}

impl ArchiveSummary {
    /// Battery life at this window's mean current.
    pub fn battery_life(
        &self,
        nominal_voltage: f64,
        capacity_mah: f64,
    ) -> ArchiveResult<BatteryEstimate> {
        if capacity_mah.is_nan() || capacity_mah <= 0.0 {
            return Err(ArchiveError::InvalidCapacity(capacity_mah));
        }
        let mean_ma = self.current_ma.map(|s| s.mean).unwrap_or(0.0);
        if mean_ma.is_nan() || mean_ma <= 0.0 {
            return Err(ArchiveError::NonPositiveCurrent(mean_ma));
        }
        let capacity_ah = capacity_mah / 1000.0;
        let hours = capacity_ah / (mean_ma / 1000.0);
        Ok(BatteryEstimate {
            capacity_wh: capacity_ah * nominal_voltage,
            hours,
            days: hours / 24.0,
        })
    }
}

/// CSV artifacts in `dir`, sorted by name.
pub fn list_artifacts(dir: impl AsRef<Path>) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
