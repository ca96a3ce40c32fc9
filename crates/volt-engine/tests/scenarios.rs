//! End-to-end acquisition runs against the simulated bench on a paused clock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use volt_core::{stop_channel, AcquisitionTiming, Channel, FaultKind, StatusText, TestConfiguration};
use volt_engine::{request_stop_in_store, AcquisitionEngine, EngineSettings, RunOutcome};
use volt_hardware::{FaultPlan, InjectedFault, SimulatedBench, SimulatedConnector};
use volt_storage::{MemoryStatusStore, SqliteStatusStore, StatusStore, StoreKey};

fn settings(dir: &Path) -> EngineSettings {
    EngineSettings {
        artifact_dir: dir.to_path_buf(),
        timing: AcquisitionTiming::without_settle(Duration::from_secs(1)),
        ..EngineSettings::default()
    }
}

fn config(duration_seconds: u32) -> TestConfiguration {
    TestConfiguration {
        supply_port: "SIM-PSU".into(),
        meter_port: "SIM-METER".into(),
        target_voltage: 5.0,
        current_limit: 1.0,
        duration_seconds,
    }
}

struct Rig {
    engine: AcquisitionEngine,
    store: Arc<dyn StatusStore>,
    bench: SimulatedBench,
}

fn rig(plan: FaultPlan, dir: &Path) -> Rig {
    let bench = SimulatedBench::new(50.0).with_faults(plan);
    let store: Arc<dyn StatusStore> = Arc::new(MemoryStatusStore::new());
    let engine = AcquisitionEngine::new(
        store.clone(),
        Arc::new(SimulatedConnector::new(bench.clone())),
        settings(dir),
    );
    Rig {
        engine,
        store,
        bench,
    }
}

/// Data rows of the run artifact, split into cells.
fn csv_rows(outcome: &RunOutcome) -> Vec<Vec<String>> {
    let path = outcome.artifact_path.as_ref().expect("artifact path");
    let contents = std::fs::read_to_string(path).unwrap();
    contents
        .lines()
        .skip(1)
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

fn assert_terminal(store: &dyn StatusStore) {
    assert_eq!(store.get(StoreKey::IsRunning).unwrap(), "0");
    assert_eq!(store.get(StoreKey::RemainingTime).unwrap(), "0");
}

fn assert_cleanup_ran(bench: &SimulatedBench) {
    let log = bench.command_log();
    for expected in [":FUNCtion:ENERgy stop", "close meter", "OUTPut OFF", "close psu", "release"] {
        assert!(log.iter().any(|c| c == expected), "missing {expected:?} in {log:?}");
    }
    assert!(!bench.output_on());
}

#[tokio::test(start_paused = true)]
async fn completed_run_finishes_with_one_row_per_tick() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(FaultPlan::none(), dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(3), signal).await;

    assert_eq!(outcome.status, StatusText::Finished);
    assert_eq!(outcome.rows_written, 3);
    assert_eq!(outcome.samples_published, 3);
    assert!(outcome.error.is_none());

    let rows = csv_rows(&outcome);
    let elapsed: Vec<_> = rows.iter().map(|r| r[1].as_str()).collect();
    assert_eq!(elapsed, vec!["0.000", "1.000", "2.000"]);
    assert_eq!(rows[0][2], "5");
    assert_eq!(rows[0][3], "0.1");

    let samples = rig.store.read_all_samples().unwrap();
    assert_eq!(samples.len(), 3);
    assert!(samples
        .windows(2)
        .all(|w| w[1].elapsed_seconds > w[0].elapsed_seconds));
    assert!(samples[0].elapsed_seconds >= 0.0);

    let status = rig.store.snapshot().unwrap();
    assert_eq!(status.status_text, StatusText::Finished);
    assert!(status.result_ready);
    assert_eq!(status.last_error, "");
    assert_eq!(status.source_identity, "VOLT/RUNNER,SIM-PSU,0,1.0");
    assert_eq!(status.meter_port, "SIM-METER");
    assert_eq!(
        status.artifact_path,
        outcome.artifact_path.unwrap().display().to_string()
    );
    assert_terminal(rig.store.as_ref());
    assert_cleanup_ran(&rig.bench);
}

#[tokio::test(start_paused = true)]
async fn five_second_run_writes_five_or_six_rows() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(FaultPlan::none(), dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(5), signal).await;

    assert_eq!(outcome.status, StatusText::Finished);
    assert!((5..=6).contains(&outcome.rows_written));
}

#[tokio::test(start_paused = true)]
async fn stop_mid_run_ends_stopped_without_result() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(FaultPlan::none(), dir.path());
    let (handle, signal) = stop_channel();

    let engine = rig.engine.clone();
    let run = tokio::spawn(async move { engine.run(config(10), signal).await });

    tokio::time::sleep(Duration::from_millis(1400)).await;
    handle.stop();
    let outcome = run.await.unwrap();

    assert_eq!(outcome.status, StatusText::Stopped);
    assert!((1..=2).contains(&outcome.rows_written));
    assert_eq!(rig.store.get(StoreKey::PlotReady).unwrap(), "0");
    assert_eq!(rig.store.get(StoreKey::StatusText).unwrap(), "Stopped");
    assert_terminal(rig.store.as_ref());
    assert_cleanup_ran(&rig.bench);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_an_error_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let plan = FaultPlan::none().fail_meter_connect(FaultKind::NotFound);
    let rig = rig(plan, dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(3), signal).await;

    assert_eq!(outcome.status, StatusText::Error);
    assert!(outcome.artifact_path.is_none());
    assert_eq!(outcome.rows_written, 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let status = rig.store.snapshot().unwrap();
    assert_eq!(status.status_text, StatusText::Error);
    assert!(status.last_error.starts_with("setup fault (not-found) on meter"));
    assert!(!status.result_ready);
    assert!(rig.store.read_all_samples().unwrap().is_empty());
    assert_terminal(rig.store.as_ref());

    // The supply was opened before the meter failed, so it is shut down too.
    let log = rig.bench.command_log();
    assert!(log.iter().any(|c| c == "close psu"));
    assert_eq!(log.last().map(String::as_str), Some("release"));
}

#[tokio::test(start_paused = true)]
async fn missing_current_reply_is_recorded_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let plan = FaultPlan::none().on_fetch(Channel::Current, 1, InjectedFault::NoResponse);
    let rig = rig(plan, dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(3), signal).await;

    assert_eq!(outcome.status, StatusText::Finished);
    let rows = csv_rows(&outcome);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1][1], "1.000");
    assert_eq!(rows[1][3], "N/A");
    assert_ne!(rows[1][2], "N/A");

    let elapsed: Vec<_> = rig
        .store
        .read_all_samples()
        .unwrap()
        .iter()
        .map(|s| s.elapsed_seconds)
        .collect();
    assert_eq!(elapsed, vec![0.0, 2.0]);
}

#[tokio::test(start_paused = true)]
async fn malformed_reply_marks_tick_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let plan = FaultPlan::none().on_fetch(Channel::Power, 1, InjectedFault::Malformed);
    let rig = rig(plan, dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(3), signal).await;

    assert_eq!(outcome.status, StatusText::Finished);
    let rows = csv_rows(&outcome);
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[1][2..], ["ERROR", "ERROR", "ERROR", "ERROR"]);
    assert_eq!(outcome.samples_published, 2);
    assert_eq!(rig.store.get(StoreKey::PlotReady).unwrap(), "1");
}

#[tokio::test(start_paused = true)]
async fn io_fault_mid_run_writes_error_row_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let plan = FaultPlan::none().on_fetch(Channel::Voltage, 2, InjectedFault::Io);
    let rig = rig(plan, dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(10), signal).await;

    assert_eq!(outcome.status, StatusText::Error);
    let rows = csv_rows(&outcome);
    let last = rows.last().unwrap();
    assert_eq!(last[1], "2.000");
    assert_eq!(&last[2..], ["ERROR", "ERROR", "ERROR", "ERROR"]);
    assert!(rows.iter().all(|r| r[1] != "3.000"));

    let status = rig.store.snapshot().unwrap();
    assert_eq!(status.status_text, StatusText::Error);
    assert!(status.last_error.starts_with("in-run fault (io) on meter"));
    assert!(!status.result_ready);
    assert_terminal(rig.store.as_ref());
    assert_cleanup_ran(&rig.bench);
}

#[tokio::test(start_paused = true)]
async fn failed_identity_query_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let rig = rig(FaultPlan::none().fail_identity(), dir.path());
    let (_handle, signal) = stop_channel();

    let outcome = rig.engine.run(config(1), signal).await;

    assert_eq!(outcome.status, StatusText::Finished);
    assert_eq!(rig.store.get(StoreKey::PsuIdn).unwrap(), "IDN Failed");
}

#[tokio::test(start_paused = true)]
async fn durable_flag_stops_a_run_from_another_connection() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("status.db");
    let worker_store: Arc<dyn StatusStore> = Arc::new(SqliteStatusStore::open(&db).unwrap());
    let other_process = SqliteStatusStore::open(&db).unwrap();

    assert!(worker_store.try_begin_run().unwrap());
    let bench = SimulatedBench::new(50.0);
    let engine = AcquisitionEngine::new(
        worker_store.clone(),
        Arc::new(SimulatedConnector::new(bench)),
        settings(&dir.path().join("csv")),
    );

    // The worker's own handle is never used.
    let (_handle, signal) = stop_channel();
    let run = tokio::spawn(async move { engine.run(config(30), signal).await });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(request_stop_in_store(&other_process).unwrap());
    let outcome = run.await.unwrap();

    assert_eq!(outcome.status, StatusText::Stopped);
    assert_eq!(outcome.rows_written, 3);

    let status = other_process.snapshot().unwrap();
    assert_eq!(status.status_text, StatusText::Stopped);
    assert!(!status.is_running);
    assert!(!status.stop_requested);
}
