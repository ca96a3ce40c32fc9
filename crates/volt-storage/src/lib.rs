//! Persistence for volt-runner.
//!
//! - [`store`]: the shared run status store contract and its keys
//! - [`sqlite`] / [`memory`]: the two store engines
//! - [`artifact`]: per-run CSV file
//! - [`archive`]: summaries of completed artifacts

pub mod archive;
pub mod artifact;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use archive::{Archive, ArchiveError, ArchiveSummary, BatteryEstimate, ChannelStats, MinuteWindow};
pub use artifact::CsvArtifact;
pub use memory::MemoryStatusStore;
pub use sqlite::{SqliteStatusStore, SqliteStoreConfig};
pub use store::{StatusStore, StoreError, StoreKey, StoreResult};
