//! Flat key-value file backend.
//!
//! Each concern lives in its own human-editable JSON object (`names.json`,
//! `time.json`). The whole mapping is loaded on open and rewritten on every
//! mutating call. A single reader/writer lock guards each file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::{PlayerName, parse_uuid, player_name};

/// One flat `key -> scalar` file held fully in memory.
struct FlatFile<V> {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, V>>,
    closed: AtomicBool,
}

impl<V> FlatFile<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    async fn open(path: PathBuf) -> Result<Self> {
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), entries = entries.len(), "opened storage file");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    async fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, V>) -> R) -> Result<R> {
        self.ensure_open()?;
        let entries = self.entries.read().await;
        // close() may have won the race for the lock
        self.ensure_open()?;
        Ok(f(&entries))
    }

    /// Apply `f` to a copy of the mapping and persist it. The in-memory
    /// mapping only changes once the file has been written.
    async fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<String, V>) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        let mut entries = self.entries.write().await;
        self.ensure_open()?;

        let mut next = entries.clone();
        let result = f(&mut next)?;
        self.persist(&next).await?;
        *entries = next;
        Ok(result)
    }

    async fn persist(&self, entries: &BTreeMap<String, V>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn close(&self) {
        let _entries = self.entries.write().await;
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path.display(), "closed storage file");
        }
    }
}

/// Name directory stored as `name -> identifier`.
pub struct FileNameStorage {
    file: FlatFile<String>,
}

impl FileNameStorage {
    pub async fn open(dir: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{prefix}names.json"));
        Ok(Self {
            file: FlatFile::open(path).await?,
        })
    }

    pub async fn get_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        let raw = self.file.read(|names| names.get(name).cloned()).await?;
        raw.as_deref().map(parse_uuid).transpose()
    }

    /// Reverse lookup is a linear scan over all names.
    pub async fn get_name(&self, id: Uuid) -> Result<Option<String>> {
        let key = id.to_string();
        self.file
            .read(|names| {
                names
                    .iter()
                    .find(|(_, holder)| **holder == key)
                    .map(|(name, _)| name.clone())
            })
            .await
    }

    pub async fn set_entry(&self, id: Uuid, name: &str, override_existing: bool) -> Result<()> {
        let name = player_name(name)?;
        self.file
            .write(|names| assign_name(names, id, &name, override_existing))
            .await?;
        debug!(%id, %name, "set name entry");
        Ok(())
    }

    pub async fn set_entries(&self, entries: &HashMap<Uuid, String>) -> Result<()> {
        let entries = entries
            .iter()
            .map(|(id, name)| -> Result<(Uuid, PlayerName)> { Ok((*id, player_name(name)?)) })
            .collect::<Result<Vec<_>>>()?;

        self.file
            .write(|names| {
                for (id, name) in &entries {
                    assign_name(names, *id, name, true)?;
                }
                Ok(())
            })
            .await?;
        debug!(count = entries.len(), "set name entries");
        Ok(())
    }

    pub async fn get_name_entries(&self) -> Result<HashSet<String>> {
        self.file.read(|names| names.keys().cloned().collect()).await
    }

    pub async fn close(&self) {
        self.file.close().await;
    }
}

/// Give `name` to `id`, revoking it from any other holder when allowed and
/// dropping the previous name of `id`.
fn assign_name(
    names: &mut BTreeMap<String, String>,
    id: Uuid,
    name: &str,
    override_existing: bool,
) -> Result<()> {
    let key = id.to_string();
    match names.get(name) {
        Some(holder) if *holder == key => return Ok(()),
        Some(_) if !override_existing => return Err(StorageError::NameTaken),
        _ => {}
    }

    names.retain(|_, holder| *holder != key);
    names.insert(name.to_string(), key);
    Ok(())
}

/// Time ledger stored as `identifier -> seconds`.
pub struct FileTimeStorage {
    file: FlatFile<i64>,
}

impl FileTimeStorage {
    pub async fn open(dir: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{prefix}time.json"));
        Ok(Self {
            file: FlatFile::open(path).await?,
        })
    }

    pub async fn get_time(&self, id: Uuid) -> Result<Option<i64>> {
        let key = id.to_string();
        self.file.read(|times| times.get(&key).copied()).await
    }

    pub async fn add_time(&self, id: Uuid, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        self.file
            .write(|times| credit(times, id, delta))
            .await
    }

    pub async fn add_times(&self, deltas: &HashMap<Uuid, i64>) -> Result<()> {
        if deltas.values().all(|delta| *delta == 0) {
            return Ok(());
        }
        self.file
            .write(|times| -> Result<()> {
                for (id, delta) in deltas {
                    credit(times, *id, *delta)?;
                }
                Ok(())
            })
            .await
    }

    pub async fn get_all_time_entries(&self) -> Result<HashMap<Uuid, i64>> {
        let raw: Vec<(String, i64)> = self
            .file
            .read(|times| times.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .await?;
        raw.into_iter()
            .map(|(key, seconds)| -> Result<(Uuid, i64)> { Ok((parse_uuid(&key)?, seconds)) })
            .collect()
    }

    pub async fn close(&self) {
        self.file.close().await;
    }
}

/// An overflowing sum rejects the whole write, leaving the file as it was.
fn credit(times: &mut BTreeMap<String, i64>, id: Uuid, delta: i64) -> Result<()> {
    let seconds = times.entry(id.to_string()).or_insert(0);
    *seconds = seconds
        .checked_add(delta)
        .ok_or(StorageError::OutOfRange { id, delta })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_name_lookup_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let names = FileNameStorage::open(dir.path(), "").await.unwrap();
        let steve = Uuid::from_u128(1);

        names.set_entry(steve, "Steve", false).await.unwrap();
        assert_eq!(names.get_uuid("Steve").await.unwrap(), Some(steve));
        assert_eq!(names.get_name(steve).await.unwrap().as_deref(), Some("Steve"));
        assert_eq!(names.get_uuid("Alex").await.unwrap(), None);
        assert_eq!(names.get_name(Uuid::from_u128(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_name_override_revokes_previous_holder() {
        let dir = tempfile::tempdir().unwrap();
        let names = FileNameStorage::open(dir.path(), "").await.unwrap();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        names.set_entry(a, "X", false).await.unwrap();
        assert!(matches!(
            names.set_entry(b, "X", false).await,
            Err(StorageError::NameTaken)
        ));
        assert_eq!(names.get_name(a).await.unwrap().as_deref(), Some("X"));

        names.set_entry(b, "X", true).await.unwrap();
        assert_eq!(names.get_name(a).await.unwrap(), None);
        assert_eq!(names.get_name(b).await.unwrap().as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn test_rename_drops_old_name() {
        let dir = tempfile::tempdir().unwrap();
        let names = FileNameStorage::open(dir.path(), "").await.unwrap();
        let a = Uuid::from_u128(1);

        names.set_entry(a, "Old", false).await.unwrap();
        names.set_entry(a, "New", false).await.unwrap();
        assert_eq!(names.get_uuid("Old").await.unwrap(), None);
        let entries = names.get_name_entries().await.unwrap();
        assert_eq!(entries, HashSet::from(["New".to_string()]));
    }

    #[tokio::test]
    async fn test_times_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        let times = FileTimeStorage::open(dir.path(), "test_").await.unwrap();
        times.add_time(a, 30).await.unwrap();
        times
            .add_times(&HashMap::from([(a, 10), (b, 5)]))
            .await
            .unwrap();
        times.close().await;

        let times = FileTimeStorage::open(dir.path(), "test_").await.unwrap();
        assert_eq!(times.get_time(a).await.unwrap(), Some(40));
        assert_eq!(times.get_time(b).await.unwrap(), Some(5));
        assert_eq!(times.get_time(Uuid::from_u128(3)).await.unwrap(), None);

        let all = times.get_all_time_entries().await.unwrap();
        assert_eq!(all, HashMap::from([(a, 40), (b, 5)]));
        assert!(dir.path().join("test_time.json").exists());
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let times = FileTimeStorage::open(dir.path(), "").await.unwrap();
        times.add_time(Uuid::from_u128(1), 10).await.unwrap();

        times.close().await;
        times.close().await;

        assert!(matches!(
            times.get_time(Uuid::from_u128(1)).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(
            times.add_time(Uuid::from_u128(1), 10).await,
            Err(StorageError::Closed)
        ));

        let times = FileTimeStorage::open(dir.path(), "").await.unwrap();
        assert_eq!(times.get_time(Uuid::from_u128(1)).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_overflowing_add_leaves_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let times = FileTimeStorage::open(dir.path(), "").await.unwrap();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        times.add_time(a, i64::MAX).await.unwrap();
        assert!(matches!(
            times.add_time(a, 1).await,
            Err(StorageError::OutOfRange { delta: 1, .. })
        ));
        // one bad delta rejects the whole batch
        assert!(times
            .add_times(&HashMap::from([(a, i64::MAX), (b, 5)]))
            .await
            .is_err());

        assert_eq!(times.get_time(a).await.unwrap(), Some(i64::MAX));
        assert_eq!(times.get_time(b).await.unwrap(), None);

        let reopened = FileTimeStorage::open(dir.path(), "").await.unwrap();
        assert_eq!(reopened.get_time(b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("time.json"), "{ not json").unwrap();
        assert!(matches!(
            FileTimeStorage::open(dir.path(), "").await,
            Err(StorageError::Json(_))
        ));
    }
}
