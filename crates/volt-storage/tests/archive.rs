//! Archive summaries over artifacts written by `CsvArtifact`.

use chrono::{Duration, Local, TimeZone};
use volt_core::TickReading;
use volt_storage::archive::{list_artifacts, MinuteWindow};
use volt_storage::{Archive, ArchiveError, CsvArtifact};

fn reading(volts: f64, amps: f64) -> TickReading {
    TickReading {
        voltage: Some(volts),
        current: Some(amps),
        power: Some(volts * amps),
        energy: Some(0.0),
    }
}

/// Three minutes of data at one row per minute, plus a failed tick.
fn write_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let start = Local.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    let mut artifact = CsvArtifact::create(dir, start).unwrap();
    artifact.write_reading(start, 0.0, &reading(5.0, 0.010)).unwrap();
    artifact
        .write_reading(start + Duration::minutes(1), 60.0, &reading(4.0, 0.020))
        .unwrap();
    artifact
        .write_error(start + Duration::seconds(90), 90.0)
        .unwrap();
    artifact
        .write_reading(start + Duration::minutes(2), 120.0, &reading(3.0, 0.030))
        .unwrap();
    artifact.flush().unwrap();
    artifact.path().to_path_buf()
}

#[test]
fn summary_skips_error_rows() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::load(write_fixture(dir.path())).unwrap();
    assert_eq!(archive.rows().len(), 4);

    let summary = archive.summarize(None).unwrap();
    assert_eq!(summary.rows, 4);

    let volts = summary.voltage_v.unwrap();
    assert_eq!(volts.count, 3);
    assert_eq!(volts.max, 5.0);
    assert_eq!(volts.min, 3.0);
    assert!((volts.mean - 4.0).abs() < 1e-9);

    let milliamps = summary.current_ma.unwrap();
    assert!((milliamps.mean - 20.0).abs() < 1e-9);
}

#[test]
fn minute_window_is_relative_to_first_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::load(write_fixture(dir.path())).unwrap();

    let window = MinuteWindow {
        from_minute: 1,
        to_minute: 2,
    };
    let summary = archive.summarize(Some(window)).unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.voltage_v.unwrap().max, 4.0);

    let empty = MinuteWindow {
        from_minute: 10,
        to_minute: 20,
    };
    assert!(matches!(
        archive.summarize(Some(empty)),
        Err(ArchiveError::NoData)
    ));

    let inverted = MinuteWindow {
        from_minute: 2,
        to_minute: 1,
    };
    assert!(matches!(
        archive.summarize(Some(inverted)),
        Err(ArchiveError::InvalidWindow { .. })
    ));
}

#[test]
fn battery_life_from_mean_current() {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::load(write_fixture(dir.path())).unwrap();
    let summary = archive.summarize(None).unwrap();

    // 300 mAh at a mean of 20 mA
    let estimate = summary.battery_life(3.7, 300.0).unwrap();
    assert!((estimate.hours - 15.0).abs() < 1e-9);
    assert!((estimate.days - 0.625).abs() < 1e-9);
    assert!((estimate.capacity_wh - 1.11).abs() < 1e-9);

    assert!(matches!(
        summary.battery_life(3.7, 0.0),
        Err(ArchiveError::InvalidCapacity(_))
    ));
}

#[test]
fn list_only_returns_csv_files() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    std::fs::write(dir.path().join("notes.txt"), "not an artifact").unwrap();

    let files = list_artifacts(dir.path()).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].to_string_lossy().ends_with(".csv"));
}

#[test]
fn missing_column_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    std::fs::write(&path, "Timestamp,Voltage (V)\n2025-06-01 09:00:00.000,5\n").unwrap();

    assert!(matches!(
        Archive::load(&path),
        Err(ArchiveError::MissingColumn(_))
    ));
}
