//! Store-polling observer.
//!
//! Observers never talk to the engine. They re-read the shared store every
//! refresh interval and report what changed: the status record and any live
//! samples appended since the previous poll.
//!
//! The sample table is cleared at the start of every run. A poll treats the
//! table as restarted when it shrank, when its first sample changed or when
//! the published artifact path moved to another run.

use std::sync::Arc;
use std::time::Duration;
use volt_core::{RunStatus, Sample, StopSignal};
use volt_storage::{StatusStore, StoreResult};

/// What one poll of the store found.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverUpdate {
    pub status: RunStatus,
    /// `status` differs from the previous poll (always true on the first).
    pub status_changed: bool,
    pub new_samples: Vec<Sample>,
}

pub struct Observer {
    store: Arc<dyn StatusStore>,
    refresh: Duration,
    seen_samples: usize,
    first_sample: Option<Sample>,
    last_status: Option<RunStatus>,
}

impl Observer {
    pub fn new(store: Arc<dyn StatusStore>, refresh: Duration) -> Self {
        Self {
            store,
            refresh,
            seen_samples: 0,
            first_sample: None,
            last_status: None,
        }
    }

    /// Read the store once.
    pub fn poll(&mut self) -> StoreResult<ObserverUpdate> {
        let status = self.store.snapshot()?;
        let samples = self.store.read_all_samples()?;

        let run_changed = self
            .last_status
            .as_ref()
            .is_some_and(|last| last.artifact_path != status.artifact_path);
        if run_changed
            || samples.len() < self.seen_samples
            || samples.first() != self.first_sample.as_ref()
        {
            self.seen_samples = 0;
        }
        let new_samples = samples[self.seen_samples..].to_vec();
        self.seen_samples = samples.len();
        self.first_sample = samples.first().copied();

        let status_changed = self.last_status.as_ref() != Some(&status);
        self.last_status = Some(status.clone());

        Ok(ObserverUpdate {
            status,
            status_changed,
            new_samples,
        })
    }

    /// Poll until the store reports no run in progress or `stop` fires.
    ///
    /// Returns the last status seen.
    pub async fn watch<F>(&mut self, mut stop: StopSignal, mut on_update: F) -> StoreResult<RunStatus>
    where
        F: FnMut(&ObserverUpdate),
    {
        loop {
            let update = self.poll()?;
            on_update(&update);
            if !update.status.is_running || stop.wait_timeout(self.refresh).await {
                return Ok(update.status);
            }
        }
    }
}

/// One-line summary of a status record.
pub fn format_status(status: &RunStatus) -> String {
    let mut line = format!("[{}]", status.status_text);
    if status.is_running {
        line.push_str(&format!(" remaining {:.1} s", status.remaining_seconds));
    }
    line.push_str(&format!(
        " | supply: {} | meter: {}",
        status.source_identity, status.meter_port
    ));
    if !status.artifact_path.is_empty() {
        line.push_str(&format!(" | csv: {}", status.artifact_path));
    }
    if status.stop_requested {
        line.push_str(" | stop requested");
    }
    if !status.last_error.is_empty() {
        line.push_str(&format!(" | error: {}", status.last_error));
    }
    line
}

pub fn format_sample(sample: &Sample) -> String {
    format!(
        "t={:>9.3} s  V={:>8.4}  I={:>8.4}  P={:>9.4}",
        sample.elapsed_seconds,
        sample.voltage,
        sample.current,
        sample.voltage * sample.current
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::{stop_channel, StatusText};
    use volt_storage::{MemoryStatusStore, StoreKey};

    fn sample(t: f64) -> Sample {
        Sample {
            elapsed_seconds: t,
            voltage: 5.0,
            current: 0.1,
        }
    }

    #[test]
    fn test_poll_reports_only_new_samples() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut observer = Observer::new(store.clone(), Duration::from_millis(750));

        store.append_sample(&sample(0.0)).unwrap();
        let first = observer.poll().unwrap();
        assert!(first.status_changed);
        assert_eq!(first.new_samples.len(), 1);

        store.append_sample(&sample(1.0)).unwrap();
        let second = observer.poll().unwrap();
        assert!(!second.status_changed);
        assert_eq!(second.new_samples, vec![sample(1.0)]);

        assert!(observer.poll().unwrap().new_samples.is_empty());
    }

    #[test]
    fn test_poll_restarts_after_clear() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut observer = Observer::new(store.clone(), Duration::from_millis(750));
        store.append_sample(&sample(0.0)).unwrap();
        store.append_sample(&sample(1.0)).unwrap();
        observer.poll().unwrap();

        store.clear_samples().unwrap();
        store.append_sample(&sample(0.0)).unwrap();
        let update = observer.poll().unwrap();
        assert_eq!(update.new_samples, vec![sample(0.0)]);
    }

    #[test]
    fn test_poll_restarts_when_refilled_past_previous_length() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut observer = Observer::new(store.clone(), Duration::from_millis(750));
        store.append_sample(&sample(0.0)).unwrap();
        store.append_sample(&sample(1.0)).unwrap();
        observer.poll().unwrap();

        store.clear_samples().unwrap();
        let refill = [sample(0.5), sample(1.5), sample(2.5)];
        for s in &refill {
            store.append_sample(s).unwrap();
        }
        assert_eq!(observer.poll().unwrap().new_samples, refill.to_vec());
    }

    #[test]
    fn test_poll_restarts_on_new_artifact_with_identical_samples() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut observer = Observer::new(store.clone(), Duration::from_millis(750));
        store.set(StoreKey::CurrentCsvFilename, "csv/first.csv").unwrap();
        store.append_sample(&sample(0.0)).unwrap();
        store.append_sample(&sample(1.0)).unwrap();
        observer.poll().unwrap();

        store.clear_samples().unwrap();
        store.set(StoreKey::CurrentCsvFilename, "csv/second.csv").unwrap();
        for t in [0.0, 1.0, 2.0] {
            store.append_sample(&sample(t)).unwrap();
        }
        let update = observer.poll().unwrap();
        assert_eq!(update.new_samples.len(), 3);
        assert_eq!(update.status.artifact_path, "csv/second.csv");
    }

    #[test]
    fn test_status_change_detected() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut observer = Observer::new(store.clone(), Duration::from_millis(750));
        observer.poll().unwrap();

        store.set_status(StatusText::Running).unwrap();
        let update = observer.poll().unwrap();
        assert!(update.status_changed);
        assert_eq!(update.status.status_text, StatusText::Running);
    }

    #[tokio::test]
    async fn test_watch_returns_immediately_when_idle() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut observer = Observer::new(store, Duration::from_secs(60));
        let mut polls = 0;
        let status = observer
            .watch(StopSignal::never(), |_| polls += 1)
            .await
            .unwrap();
        assert_eq!(polls, 1);
        assert_eq!(status.status_text, StatusText::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_follows_run_to_terminal_status() {
        let store = Arc::new(MemoryStatusStore::new());
        assert!(store.try_begin_run().unwrap());
        let mut observer = Observer::new(store.clone(), Duration::from_millis(750));

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer
                .set_many(&[
                    (StoreKey::StatusText, StatusText::Finished.to_string()),
                    (StoreKey::IsRunning, "0".to_string()),
                ])
                .unwrap();
        });

        let mut polls = 0;
        let status = observer
            .watch(StopSignal::never(), |_| polls += 1)
            .await
            .unwrap();
        assert_eq!(status.status_text, StatusText::Finished);
        assert!(!status.is_running);
        assert!(polls >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_on_signal() {
        let store = Arc::new(MemoryStatusStore::new());
        assert!(store.try_begin_run().unwrap());
        let mut observer = Observer::new(store, Duration::from_millis(750));
        let (handle, signal) = stop_channel();
        handle.stop();

        let status = observer.watch(signal, |_| {}).await.unwrap();
        assert!(status.is_running);
    }

    #[test]
    fn test_format_status_includes_error() {
        let status = RunStatus {
            status_text: StatusText::Error,
            last_error: "setup fault (not found) on meter: no such port".to_string(),
            ..RunStatus::default()
        };
        let line = format_status(&status);
        assert!(line.starts_with("[Error]"));
        assert!(line.contains("no such port"));
        assert!(!line.contains("remaining"));
    }

    #[test]
    fn test_format_sample() {
        let line = format_sample(&sample(2.0));
        assert!(line.contains("2.000"));
        assert!(line.contains("5.0000"));
        assert!(line.contains("0.5000"));
    }
}
