//! Online time storage: name directory, time ledger backends, and the
//! accumulating session cache in front of the ledger.

mod cache;
mod error;
mod file;
mod manager;
mod models;
pub mod sql;
mod storage;

pub use cache::AccumulatingTimeStorage;
pub use error::{ConfigError, LoadError, Result, StorageError};
pub use file::{FileNameStorage, FileTimeStorage};
pub use manager::{
  DataStorageManager, SqlConfig, StorageConfig, StorageKind, TOTAL_TIME_STATISTIC,
};
pub use models::{PlayerName, Statistic, TimeEntry, owed_seconds, player_name};
pub use sql::{DialectKind, SqlStorage};
pub use storage::{NameStorage, TimeStorage};
