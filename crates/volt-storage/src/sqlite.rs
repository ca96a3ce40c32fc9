//! SQLite-backed status store.
//!
//! Schema:
//!
//! ```sql
//! CREATE TABLE status (key TEXT PRIMARY KEY, value TEXT);
//! CREATE TABLE live_measurements (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     elapsed_seconds REAL, voltage REAL, current REAL
//! );
//! ```
//!
//! The database file is the rendezvous point between the worker process and
//! any number of observers (`volt-runner watch`, `volt-runner stop`). WAL
//! journaling lets observers read while the worker writes; a busy timeout
//! covers the short write transactions.

use crate::store::{fresh_run_entries, stop_request_entries, StatusStore, StoreKey, StoreResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use volt_core::Sample;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS status (
    key TEXT PRIMARY KEY,
    value TEXT
);
CREATE TABLE IF NOT EXISTS live_measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    elapsed_seconds REAL,
    voltage REAL,
    current REAL
);
";

/// Connection settings for [`SqliteStatusStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 1_000,
        }
    }
}

/// [`StatusStore`] persisted in an SQLite file.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStatusStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStatusStore {
    /// Open (creating if needed) the database at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_config(SqliteStoreConfig::new(path.as_ref()))
    }

    /// Open the database, create the schema and insert any missing defaults.
    pub fn with_config(config: SqliteStoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        for key in StoreKey::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO status (key, value) VALUES (?1, ?2)",
                params![key.as_str(), key.default_value()],
            )?;
        }

        debug!(path = %config.path.display(), journal_mode = %mode, "status store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path: config.path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn upsert(conn: &Connection, key: StoreKey, value: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO status (key, value) VALUES (?1, ?2)",
        params![key.as_str(), value],
    )
}

/// Read `is_running` inside an open transaction.
fn is_running(conn: &Connection) -> rusqlite::Result<bool> {
    let current: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM status WHERE key = ?1",
            params![StoreKey::IsRunning.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(current.flatten().as_deref() == Some("1"))
}

impl StatusStore for SqliteStatusStore {
    fn set(&self, key: StoreKey, value: &str) -> StoreResult<()> {
        upsert(&self.conn.lock(), key, value)?;
        Ok(())
    }

    fn get_raw(&self, key: StoreKey) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM status WHERE key = ?1",
                params![key.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set_many(&self, entries: &[(StoreKey, String)]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (key, value) in entries {
            upsert(&tx, *key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append_sample(&self, sample: &Sample) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO live_measurements (elapsed_seconds, voltage, current) VALUES (?1, ?2, ?3)",
            params![sample.elapsed_seconds, sample.voltage, sample.current],
        )?;
        Ok(())
    }

    fn clear_samples(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM live_measurements", [])?;
        tx.execute(
            "DELETE FROM sqlite_sequence WHERE name = 'live_measurements'",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn read_all_samples(&self) -> StoreResult<Vec<Sample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT elapsed_seconds, voltage, current FROM live_measurements ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Sample {
                elapsed_seconds: row.get(0)?,
                voltage: row.get(1)?,
                current: row.get(2)?,
            })
        })?;
        let samples = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn try_begin_run(&self) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if is_running(&tx)? {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }
        for (key, value) in fresh_run_entries() {
            upsert(&tx, key, &value)?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn try_request_stop(&self) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !is_running(&tx)? {
            return Ok(false);
        }
        for (key, value) in stop_request_entries() {
            upsert(&tx, key, &value)?;
        }
        tx.commit()?;
        Ok(true)
    }
}
