//! A full run against the simulated bench, followed through a second store
//! connection the way `volt-runner watch` does.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use volt_runner::config::VoltConfig;
use volt_runner::core::{AcquisitionTiming, StatusText, StopSignal};
use volt_runner::engine::{AcquisitionEngine, RunController};
use volt_runner::hardware::{SimulatedBench, SimulatedConnector};
use volt_runner::observer::Observer;
use volt_runner::storage::{SqliteStatusStore, StatusStore};

fn bench_config(dir: &TempDir) -> VoltConfig {
    let mut config = VoltConfig::default();
    config.storage.db_path = dir.path().join("status.db");
    config.storage.csv_dir = dir.path().join("csv");
    config
}

fn controller(config: &VoltConfig, bench: SimulatedBench) -> RunController {
    let mut settings = config.engine_settings();
    settings.timing = AcquisitionTiming::without_settle(Duration::from_secs(1));
    let store = Arc::new(SqliteStatusStore::open(&config.storage.db_path).unwrap());
    let engine = AcquisitionEngine::new(store, Arc::new(SimulatedConnector::new(bench)), settings);
    RunController::new(engine)
}

#[tokio::test(start_paused = true)]
async fn observer_follows_run_to_finished() {
    let dir = TempDir::new().unwrap();
    let config = bench_config(&dir);
    let controller = controller(&config, SimulatedBench::new(50.0));

    let test = config.test_configuration(Some(5.0), Some(1.0), Some(3));
    controller.start(test).unwrap();

    let watcher_store = Arc::new(SqliteStatusStore::open(&config.storage.db_path).unwrap());
    let mut observer = Observer::new(watcher_store.clone(), Duration::from_millis(750));
    let mut seen = Vec::new();
    let mut statuses = Vec::new();
    let last = observer
        .watch(StopSignal::never(), |update| {
            seen.extend(update.new_samples.iter().copied());
            if update.status_changed {
                statuses.push(update.status.status_text);
            }
        })
        .await
        .unwrap();

    let outcome = controller.wait().await.unwrap().unwrap();
    assert_eq!(outcome.status, StatusText::Finished);
    assert_eq!(last.status_text, StatusText::Finished);
    assert!(last.result_ready);
    assert!(!last.is_running);
    assert_eq!(statuses.last(), Some(&StatusText::Finished));

    assert_eq!(seen, watcher_store.read_all_samples().unwrap());
    assert_eq!(seen.len(), 3);
    assert!((seen[0].current - 0.1).abs() < 1e-9);

    let artifact = outcome.artifact_path.unwrap();
    assert!(artifact.starts_with(&config.storage.csv_dir));
    assert_eq!(last.artifact_path, artifact.display().to_string());
}

#[tokio::test(start_paused = true)]
async fn stop_from_second_connection_ends_run() {
    let dir = TempDir::new().unwrap();
    let config = bench_config(&dir);
    let controller = controller(&config, SimulatedBench::new(50.0));
    controller
        .start(config.test_configuration(Some(5.0), Some(1.0), Some(30)))
        .unwrap();

    let other = SqliteStatusStore::open(&config.storage.db_path).unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(volt_runner::engine::request_stop_in_store(&other).unwrap());

    let outcome = controller.wait().await.unwrap().unwrap();
    assert_eq!(outcome.status, StatusText::Stopped);
    assert!(outcome.rows_written < 30);

    let status = other.snapshot().unwrap();
    assert_eq!(status.status_text, StatusText::Stopped);
    assert!(!status.stop_requested);
    assert!(!status.is_running);
}
