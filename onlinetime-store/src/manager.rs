//! Storage backend selection and lifecycle.
//!
//! The manager builds a name directory and an accumulating time cache from one
//! backend family, or holds a pair injected by the caller. Injected storages
//! are never reloaded by the manager.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::AccumulatingTimeStorage;
use crate::error::{ConfigError, LoadError, Result, StorageError};
use crate::file::{FileNameStorage, FileTimeStorage};
use crate::models::{Statistic, TimeEntry};
use crate::sql::{DialectKind, SqlStorage};
use crate::storage::{NameStorage, TimeStorage};

/// Statistic name of the cached sum over all players.
pub const TOTAL_TIME_STATISTIC: &str = "total_online_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Sql,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "yaml" | "json" => Ok(StorageKind::File),
            "sql" | "mysql" | "sqlite" => Ok(StorageKind::Sql),
            other => Err(ConfigError::UnknownStorageKind(other.to_string())),
        }
    }
}

/// Relational connection parameters.
#[derive(Debug, Clone)]
pub struct SqlConfig {
    pub dialect: DialectKind,
    pub database_path: PathBuf,
    /// Name of this node in the server table.
    pub server_name: String,
    /// World this node's session intervals are recorded against.
    pub world_name: String,
}

/// Typed storage configuration, supplied by the caller.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Directory holding the file backend's files.
    pub data_dir: PathBuf,
    /// Prefix for file names and table names.
    pub prefix: String,
    pub sql: SqlConfig,
}

struct Storages {
    names: NameStorage,
    times: Arc<AccumulatingTimeStorage>,
}

pub struct DataStorageManager {
    config: Option<StorageConfig>,
    storages: RwLock<Option<Storages>>,
}

impl DataStorageManager {
    /// A manager that builds its storages from `config` on `load_storages`.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config: Some(config),
            storages: RwLock::new(None),
        }
    }

    /// A manager around storages built elsewhere.
    pub fn with_storages(names: NameStorage, times: Arc<AccumulatingTimeStorage>) -> Self {
        Self {
            config: None,
            storages: RwLock::new(Some(Storages { names, times })),
        }
    }

    pub fn is_external(&self) -> bool {
        self.config.is_none()
    }

    pub async fn load_storages(&self) -> std::result::Result<(), LoadError> {
        let Some(config) = &self.config else {
            debug!("storages are provided externally, nothing to load");
            return Ok(());
        };

        let mut slot = self.storages.write().await;
        if slot.is_some() {
            warn!("storages are already loaded");
            return Ok(());
        }
        *slot = Some(open_storages(config).await?);
        info!(kind = ?config.kind, "storages loaded");
        Ok(())
    }

    /// Close and reopen the storages. No-op for injected storages.
    pub async fn reload_storages(&self, now: i64) -> std::result::Result<(), LoadError> {
        if self.is_external() {
            debug!("storages are provided externally, skipping reload");
            return Ok(());
        }
        self.close_storages(now).await;
        self.load_storages().await
    }

    /// Flush open sessions and close both storages. Failures are logged.
    pub async fn close_storages(&self, now: i64) {
        if let Some(storages) = self.storages.write().await.take() {
            close(storages, now).await;
            info!("storages closed");
        }
    }

    /// Periodic flush hook.
    pub async fn flush_online_time_cache(&self, now: i64) -> Result<()> {
        self.time_storage().await?.flush_online_time_cache(now).await
    }

    pub async fn name_storage(&self) -> Result<NameStorage> {
        self.storages
            .read()
            .await
            .as_ref()
            .map(|s| s.names.clone())
            .ok_or(StorageError::Closed)
    }

    pub async fn time_storage(&self) -> Result<Arc<AccumulatingTimeStorage>> {
        self.storages
            .read()
            .await
            .as_ref()
            .map(|s| s.times.clone())
            .ok_or(StorageError::Closed)
    }

    /// Players with the most online time, live sessions included.
    pub async fn top_online_times(&self, limit: usize, now: i64) -> Result<Vec<TimeEntry>> {
        let names = self.name_storage().await?;
        let times = self.time_storage().await?;

        let mut totals: Vec<(Uuid, i64)> =
            times.get_all_time_entries(now).await?.into_iter().collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        totals.truncate(limit);

        let mut entries = Vec::with_capacity(totals.len());
        for (id, seconds) in totals {
            entries.push(TimeEntry {
                id,
                name: names.get_name(id).await?,
                seconds,
            });
        }
        Ok(entries)
    }

    /// Total online time of all players, live sessions included. The
    /// relational backend serves its ledger sum from a cached statistic
    /// younger than `max_age` and refreshes it otherwise.
    pub async fn total_online_time(&self, max_age: Duration, now: i64) -> Result<i64> {
        let times = self.time_storage().await?;
        let stored = match times.ledger() {
            TimeStorage::Sql(sql) => cached_total_time(sql, max_age, now).await?,
            ledger => ledger
                .get_all_time_entries()
                .await?
                .values()
                .fold(0i64, |total, seconds| total.saturating_add(*seconds)),
        };
        Ok(stored.saturating_add(times.unsaved_seconds(now).await))
    }
}

async fn cached_total_time(sql: &SqlStorage, max_age: Duration, now: i64) -> Result<i64> {
    let now_secs = now / 1000;
    let cached = sql.latest_statistic(TOTAL_TIME_STATISTIC).await?;
    if let Some(Statistic {
        calculated_at,
        result,
        ..
    }) = cached
    {
        if now_secs - calculated_at < max_age.as_secs() as i64 {
            return Ok(result);
        }
    }

    let total = sql.get_total_time().await?;
    sql.store_statistic(TOTAL_TIME_STATISTIC, now_secs, total)
        .await?;
    debug!(total, "refreshed total online time statistic");
    Ok(total)
}

async fn open_storages(config: &StorageConfig) -> std::result::Result<Storages, LoadError> {
    let (names, times) = match config.kind {
        StorageKind::File => {
            let names = FileNameStorage::open(&config.data_dir, &config.prefix).await?;
            let times = FileTimeStorage::open(&config.data_dir, &config.prefix).await?;
            (
                NameStorage::File(Arc::new(names)),
                TimeStorage::File(Arc::new(times)),
            )
        }
        StorageKind::Sql => {
            let sql = &config.sql;
            if sql.dialect != DialectKind::Sqlite {
                return Err(ConfigError::DriverUnavailable(sql.dialect.dialect().name()).into());
            }
            let storage = SqlStorage::open(
                &sql.database_path,
                &config.prefix,
                &sql.server_name,
                &sql.world_name,
            )
            .await?;
            (NameStorage::Sql(storage.clone()), TimeStorage::Sql(storage))
        }
    };

    Ok(Storages {
        names,
        times: Arc::new(AccumulatingTimeStorage::new(times)),
    })
}

async fn close(storages: Storages, now: i64) {
    if let Err(e) = storages.times.close(now).await {
        error!(error = %e, "failed to save online time while closing storage");
    }
    storages.names.close().await;
}
