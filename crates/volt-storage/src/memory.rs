//! In-process status store.

use crate::store::{fresh_run_entries, stop_request_entries, StatusStore, StoreKey, StoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use volt_core::Sample;

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<StoreKey, String>,
    samples: Vec<Sample>,
}

/// [`StatusStore`] backed by a mutex-guarded map. Not visible to other processes.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    inner: Mutex<Inner>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn set(&self, key: StoreKey, value: &str) -> StoreResult<()> {
        self.inner.lock().values.insert(key, value.to_string());
        Ok(())
    }

    fn get_raw(&self, key: StoreKey) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().values.get(&key).cloned())
    }

    fn set_many(&self, entries: &[(StoreKey, String)]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for (key, value) in entries {
            inner.values.insert(*key, value.clone());
        }
        Ok(())
    }

    fn append_sample(&self, sample: &Sample) -> StoreResult<()> {
        self.inner.lock().samples.push(*sample);
        Ok(())
    }

    fn clear_samples(&self) -> StoreResult<()> {
        self.inner.lock().samples.clear();
        Ok(())
    }

    fn read_all_samples(&self) -> StoreResult<Vec<Sample>> {
        Ok(self.inner.lock().samples.clone())
    }

    fn try_begin_run(&self) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.values.get(&StoreKey::IsRunning).map(String::as_str) == Some("1") {
            return Ok(false);
        }
        inner.values.extend(fresh_run_entries());
        Ok(true)
    }

    fn try_request_stop(&self) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.values.get(&StoreKey::IsRunning).map(String::as_str) != Some("1") {
            return Ok(false);
        }
        inner.values.extend(stop_request_entries());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_core::StatusText;

    #[test]
    fn test_defaults_for_missing_keys() {
        let store = MemoryStatusStore::new();
        assert_eq!(store.get(StoreKey::PsuIdn).unwrap(), "N/A");
        assert_eq!(store.get(StoreKey::StatusText).unwrap(), "Idle");
        assert_eq!(store.get_raw(StoreKey::LastError).unwrap(), None);
    }

    #[test]
    fn test_try_begin_run_is_exclusive() {
        let store = MemoryStatusStore::new();
        store.set(StoreKey::LastError, "old failure").unwrap();

        assert!(store.try_begin_run().unwrap());
        assert!(!store.try_begin_run().unwrap());

        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.is_running);
        assert_eq!(snapshot.status_text, StatusText::Connecting);
        assert_eq!(snapshot.last_error, "");

        store.set(StoreKey::IsRunning, "0").unwrap();
        assert!(store.try_begin_run().unwrap());
    }

    #[test]
    fn test_stop_request_ignored_after_run_ends() {
        let store = MemoryStatusStore::new();
        store
            .set_many(&[
                (StoreKey::StatusText, StatusText::Finished.to_string()),
                (StoreKey::PlotReady, "1".to_string()),
            ])
            .unwrap();

        assert!(!store.try_request_stop().unwrap());
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.status_text, StatusText::Finished);
        assert!(snapshot.result_ready);
        assert!(!snapshot.stop_requested);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_stop_request_marks_active_run() {
        let store = MemoryStatusStore::new();
        assert!(store.try_begin_run().unwrap());

        assert!(store.try_request_stop().unwrap());
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.status_text, StatusText::Stopping);
        assert!(snapshot.stop_requested);
        assert!(snapshot.is_running);
    }
}
