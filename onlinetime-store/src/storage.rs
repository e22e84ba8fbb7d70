//! The closed set of backends behind the name directory and time ledger.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::file::{FileNameStorage, FileTimeStorage};
use crate::sql::SqlStorage;

/// Maps identifiers to names and back, keeping names unique.
#[derive(Clone)]
pub enum NameStorage {
    File(Arc<FileNameStorage>),
    Sql(SqlStorage),
}

impl NameStorage {
    pub async fn get_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        match self {
            NameStorage::File(s) => s.get_uuid(name).await,
            NameStorage::Sql(s) => s.get_uuid(name).await,
        }
    }

    pub async fn get_name(&self, id: Uuid) -> Result<Option<String>> {
        match self {
            NameStorage::File(s) => s.get_name(id).await,
            NameStorage::Sql(s) => s.get_name(id).await,
        }
    }

    pub async fn set_entry(&self, id: Uuid, name: &str, override_existing: bool) -> Result<()> {
        match self {
            NameStorage::File(s) => s.set_entry(id, name, override_existing).await,
            NameStorage::Sql(s) => s.set_entry(id, name, override_existing).await,
        }
    }

    pub async fn set_entries(&self, entries: &HashMap<Uuid, String>) -> Result<()> {
        match self {
            NameStorage::File(s) => s.set_entries(entries).await,
            NameStorage::Sql(s) => s.set_entries(entries).await,
        }
    }

    pub async fn get_name_entries(&self) -> Result<HashSet<String>> {
        match self {
            NameStorage::File(s) => s.get_name_entries().await,
            NameStorage::Sql(s) => s.get_name_entries().await,
        }
    }

    pub async fn close(&self) {
        match self {
            NameStorage::File(s) => s.close().await,
            NameStorage::Sql(s) => s.close().await,
        }
    }
}

/// Durable cumulative seconds per identifier.
#[derive(Clone)]
pub enum TimeStorage {
    File(Arc<FileTimeStorage>),
    Sql(SqlStorage),
}

impl TimeStorage {
    pub async fn get_time(&self, id: Uuid) -> Result<Option<i64>> {
        match self {
            TimeStorage::File(s) => s.get_time(id).await,
            TimeStorage::Sql(s) => s.get_time(id).await,
        }
    }

    pub async fn add_time(&self, id: Uuid, delta: i64) -> Result<()> {
        match self {
            TimeStorage::File(s) => s.add_time(id, delta).await,
            TimeStorage::Sql(s) => s.add_time(id, delta).await,
        }
    }

    pub async fn add_times(&self, deltas: &HashMap<Uuid, i64>) -> Result<()> {
        match self {
            TimeStorage::File(s) => s.add_times(deltas).await,
            TimeStorage::Sql(s) => s.add_times(deltas).await,
        }
    }

    pub async fn get_all_time_entries(&self) -> Result<HashMap<Uuid, i64>> {
        match self {
            TimeStorage::File(s) => s.get_all_time_entries().await,
            TimeStorage::Sql(s) => s.get_all_time_entries().await,
        }
    }

    pub async fn close(&self) {
        match self {
            TimeStorage::File(s) => s.close().await,
            TimeStorage::Sql(s) => s.close().await,
        }
    }
}
