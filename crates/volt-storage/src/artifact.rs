//! CSV run artifact.
//!
//! One file per run, named from the wall clock at energize time. Rows carry
//! the raw meter values; `N/A` marks a channel that did not answer and a row
//! of `ERROR` marks a tick that failed as a whole.

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use volt_core::{Channel, TickReading};

/// Column names, in order.
pub const HEADER: [&str; 6] = [
    "Timestamp",
    "Elapsed Time (s)",
    "Voltage (V)",
    "Current (A)",
    "Power (W)",
    "Energy (Wh)",
];

/// Wall-clock format of the `Timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const MISSING_MARKER: &str = "N/A";
pub const ERROR_MARKER: &str = "ERROR";

const FILE_PREFIX: &str = "PSU_Meter_Test_";

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => MISSING_MARKER.to_string(),
    }
}

/// Open `dir/PSU_Meter_Test_<stamp>[_n].csv`, never reusing an existing name.
fn create_unique(dir: &Path, started: &DateTime<Local>) -> io::Result<(PathBuf, File)> {
    let stem = format!("{}{}", FILE_PREFIX, started.format("%Y%m%d_%H%M%S"));
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.csv")
        } else {
            format!("{stem}_{attempt}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 1_000 => {
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Writer for the CSV artifact of one run.
pub struct CsvArtifact {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl std::fmt::Debug for CsvArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvArtifact")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish()
    }
}

impl CsvArtifact {
    /// Create the file in `dir` (created if missing) and write the header.
    pub fn create(dir: &Path, started: DateTime<Local>) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (path, file) = create_unique(dir, &started)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "run artifact created");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one tick and flush. Missing channels become `N/A`.
    pub fn write_reading(
        &mut self,
        at: DateTime<Local>,
        elapsed_seconds: f64,
        reading: &TickReading,
    ) -> io::Result<()> {
        let mut record = vec![
            at.format(TIMESTAMP_FORMAT).to_string(),
            format!("{:.3}", elapsed_seconds),
        ];
        record.extend(
            Channel::ALL
                .iter()
                .map(|&channel| format_value(reading.get(channel))),
        );
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Append a row marking the whole tick as failed.
    pub fn write_error(&mut self, at: DateTime<Local>, elapsed_seconds: f64) -> io::Result<()> {
        let record = [
            at.format(TIMESTAMP_FORMAT).to_string(),
            format!("{:.3}", elapsed_seconds),
            ERROR_MARKER.to_string(),
            ERROR_MARKER.to_string(),
            ERROR_MARKER.to_string(),
            ERROR_MARKER.to_string(),
        ];
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
