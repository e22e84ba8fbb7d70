mod dialect;

pub use dialect::{DialectKind, MySqlDialect, SqlDialect, SqliteDialect, Tables};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::{PlayerName, Statistic, player_name, uuid_from_bytes};

type SqlResult<T> = tokio_rusqlite::rusqlite::Result<T>;

/// Statements rendered once from the dialect when the storage opens.
struct Statements {
  create_tables: Vec<String>,
  ensure_server: String,
  select_server: String,
  ensure_world: String,
  select_world: String,
  select_uuid_by_name: String,
  select_name_by_uuid: String,
  clear_name: String,
  upsert_player: String,
  select_names: String,
  ensure_player: String,
  insert_interval: String,
  select_time: String,
  select_all_times: String,
  select_total_time: String,
  upsert_statistic: String,
  select_latest_statistic: String,
}

impl Statements {
  fn render(dialect: &dyn SqlDialect, t: &Tables) -> Self {
    let duration = dialect.duration_seconds("t.join_time", "t.leave_time");
    let ignore = dialect.insert_ignore();
    let player = &t.player;
    let time = &t.time;

    Self {
      create_tables: dialect.create_tables(t),
      ensure_server: format!("{ignore} INTO {} (name) VALUES (?)", t.server),
      select_server: format!("SELECT id FROM {} WHERE name = ?", t.server),
      ensure_world: format!("{ignore} INTO {} (server_id, name) VALUES (?, ?)", t.world),
      select_world: format!(
        "SELECT id FROM {} WHERE server_id = ? AND name = ?",
        t.world
      ),
      select_uuid_by_name: format!("SELECT identifier FROM {player} WHERE name = ?"),
      select_name_by_uuid: format!("SELECT name FROM {player} WHERE identifier = ?"),
      clear_name: format!("UPDATE {player} SET name = NULL WHERE name = ?"),
      upsert_player: dialect.upsert_player(t),
      select_names: format!("SELECT name FROM {player} WHERE name IS NOT NULL"),
      ensure_player: format!("{ignore} INTO {player} (identifier) VALUES (?)"),
      insert_interval: format!(
        "INSERT INTO {time} (player_id, world_id, join_time, leave_time) \
         SELECT id, ?, {}, {} FROM {player} WHERE identifier = ?",
        dialect.from_unix_seconds("?"),
        dialect.from_unix_seconds("?"),
      ),
      select_time: format!(
        "SELECT SUM({duration}) FROM {time} t \
         JOIN {player} p ON p.id = t.player_id WHERE p.identifier = ?"
      ),
      select_all_times: format!(
        "SELECT p.identifier, SUM({duration}) FROM {time} t \
         JOIN {player} p ON p.id = t.player_id GROUP BY p.id, p.identifier"
      ),
      select_total_time: format!("SELECT COALESCE(SUM({duration}), 0) FROM {time} t"),
      upsert_statistic: dialect.upsert_statistic(t),
      select_latest_statistic: format!(
        "SELECT statistic_name, {}, result FROM {} WHERE statistic_name = ? \
         ORDER BY calculation_time DESC LIMIT 1",
        dialect.to_unix_seconds("calculation_time"),
        t.statistic
      ),
    }
  }
}

/// Relational storage implementing both the name directory and the time
/// ledger over one connection. Clones share the connection.
#[derive(Clone)]
pub struct SqlStorage {
  conn: Connection,
  statements: Arc<Statements>,
  world_id: i64,
  closed: Arc<AtomicBool>,
}

impl SqlStorage {
  /// Open or create a SQLite database at the given path.
  pub async fn open(
    path: impl AsRef<Path>,
    prefix: &str,
    server_name: &str,
    world_name: &str,
  ) -> Result<Self> {
    let conn = Connection::open(path).await?;
    Self::initialize(conn, &SqliteDialect, prefix, server_name, world_name).await
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory(prefix: &str) -> Result<Self> {
    let conn = Connection::open_in_memory().await?;
    Self::initialize(conn, &SqliteDialect, prefix, "default", "world").await
  }

  /// Create the schema and register this node's server and world.
  async fn initialize(
    conn: Connection,
    dialect: &dyn SqlDialect,
    prefix: &str,
    server_name: &str,
    world_name: &str,
  ) -> Result<Self> {
    let statements = Arc::new(Statements::render(dialect, &Tables::new(prefix)));
    let sql = statements.clone();
    let server_name = server_name.to_string();
    let world_name = world_name.to_string();

    let world_id = conn
      .call(move |conn| -> SqlResult<i64> {
        // Enable WAL mode for better concurrent read/write performance
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // Enable foreign key constraints (must be set per-connection)
        conn.pragma_update(None, "foreign_keys", "ON")?;

        for ddl in &sql.create_tables {
          conn.execute_batch(ddl)?;
        }

        let tx = conn.transaction()?;
        tx.prepare_cached(&sql.ensure_server)?
          .execute(params![&server_name])?;
        let server_id: i64 = tx
          .prepare_cached(&sql.select_server)?
          .query_row(params![&server_name], |row| row.get(0))?;
        tx.prepare_cached(&sql.ensure_world)?
          .execute(params![server_id, &world_name])?;
        let world_id: i64 = tx
          .prepare_cached(&sql.select_world)?
          .query_row(params![server_id, &world_name], |row| row.get(0))?;
        tx.commit()?;
        Ok(world_id)
      })
      .await?;

    info!(dialect = dialect.name(), prefix, world_id, "database initialized");
    Ok(Self {
      conn,
      statements,
      world_id,
      closed: Arc::new(AtomicBool::new(false)),
    })
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(StorageError::Closed);
    }
    Ok(())
  }

  // ========================================================================
  // Names
  // ========================================================================

  pub async fn get_uuid(&self, name: &str) -> Result<Option<Uuid>> {
    self.ensure_open()?;
    let sql = self.statements.clone();
    let name = name.to_string();

    let raw = self
      .conn
      .call(move |conn| -> SqlResult<Option<Vec<u8>>> {
        conn
          .prepare_cached(&sql.select_uuid_by_name)?
          .query_row(params![&name], |row| row.get(0))
          .optional()
      })
      .await?;

    raw.as_deref().map(uuid_from_bytes).transpose()
  }

  pub async fn get_name(&self, id: Uuid) -> Result<Option<String>> {
    self.ensure_open()?;
    let sql = self.statements.clone();

    let name = self
      .conn
      .call(move |conn| -> SqlResult<Option<Option<String>>> {
        conn
          .prepare_cached(&sql.select_name_by_uuid)?
          .query_row(params![id.as_bytes().as_slice()], |row| row.get(0))
          .optional()
      })
      .await?;

    Ok(name.flatten())
  }

  /// Give `name` to `id`. Any other holder loses the name first, inside the
  /// same transaction, when `override_existing` is set.
  pub async fn set_entry(&self, id: Uuid, name: &str, override_existing: bool) -> Result<()> {
    self.ensure_open()?;
    let name = player_name(name)?;
    let sql = self.statements.clone();

    self
      .conn
      .call(move |conn| -> SqlResult<Result<()>> {
        let tx = conn.transaction()?;
        if let Err(e) = assign_name(&tx, &sql, id, &name, override_existing)? {
          return Ok(Err(e));
        }
        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    debug!(%id, %name, "set name entry");
    Ok(())
  }

  pub async fn set_entries(&self, entries: &HashMap<Uuid, String>) -> Result<()> {
    self.ensure_open()?;
    let entries = entries
      .iter()
      .map(|(id, name)| -> Result<(Uuid, PlayerName)> { Ok((*id, player_name(name)?)) })
      .collect::<Result<Vec<_>>>()?;
    let count = entries.len();
    let sql = self.statements.clone();

    self
      .conn
      .call(move |conn| -> SqlResult<Result<()>> {
        let tx = conn.transaction()?;
        for (id, name) in &entries {
          if let Err(e) = assign_name(&tx, &sql, *id, name, true)? {
            return Ok(Err(e));
          }
        }
        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    debug!(count, "set name entries");
    Ok(())
  }

  pub async fn get_name_entries(&self) -> Result<HashSet<String>> {
    self.ensure_open()?;
    let sql = self.statements.clone();

    let names = self
      .conn
      .call(move |conn| -> SqlResult<HashSet<String>> {
        conn
          .prepare_cached(&sql.select_names)?
          .query_map([], |row| row.get(0))?
          .collect()
      })
      .await?;

    Ok(names)
  }

  // ========================================================================
  // Time
  // ========================================================================

  pub async fn get_time(&self, id: Uuid) -> Result<Option<i64>> {
    self.ensure_open()?;
    let sql = self.statements.clone();

    let seconds = self
      .conn
      .call(move |conn| -> SqlResult<Option<i64>> {
        conn
          .prepare_cached(&sql.select_time)?
          .query_row(params![id.as_bytes().as_slice()], |row| row.get(0))
      })
      .await?;

    Ok(seconds)
  }

  /// Record `delta` seconds as a session interval ending now.
  pub async fn add_time(&self, id: Uuid, delta: i64) -> Result<()> {
    self.add_times(&HashMap::from([(id, delta)])).await
  }

  pub async fn add_times(&self, deltas: &HashMap<Uuid, i64>) -> Result<()> {
    self.ensure_open()?;
    let now = unix_seconds();
    let intervals = deltas
      .iter()
      .filter(|(_, delta)| **delta != 0)
      .map(|(id, delta)| -> Result<(Uuid, i64)> { Ok((*id, join_time(*id, *delta, now)?)) })
      .collect::<Result<Vec<_>>>()?;
    if intervals.is_empty() {
      return Ok(());
    }

    let count = intervals.len();
    let sql = self.statements.clone();
    let world_id = self.world_id;

    self
      .conn
      .call(move |conn| -> SqlResult<()> {
        let tx = conn.transaction()?;
        {
          let mut ensure_player = tx.prepare_cached(&sql.ensure_player)?;
          let mut insert_interval = tx.prepare_cached(&sql.insert_interval)?;
          for (id, joined) in &intervals {
            let id = id.as_bytes().as_slice();
            ensure_player.execute(params![id])?;
            insert_interval.execute(params![world_id, joined, now, id])?;
          }
        }
        tx.commit()
      })
      .await?;

    debug!(count, "added time");
    Ok(())
  }

  pub async fn get_all_time_entries(&self) -> Result<HashMap<Uuid, i64>> {
    self.ensure_open()?;
    let sql = self.statements.clone();

    let rows = self
      .conn
      .call(move |conn| -> SqlResult<Vec<(Vec<u8>, i64)>> {
        conn
          .prepare_cached(&sql.select_all_times)?
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect()
      })
      .await?;

    rows
      .into_iter()
      .map(|(raw, seconds)| -> Result<(Uuid, i64)> { Ok((uuid_from_bytes(&raw)?, seconds)) })
      .collect()
  }

  /// Sum of every recorded interval across all players.
  pub async fn get_total_time(&self) -> Result<i64> {
    self.ensure_open()?;
    let sql = self.statements.clone();

    let total = self
      .conn
      .call(move |conn| -> SqlResult<i64> {
        conn
          .prepare_cached(&sql.select_total_time)?
          .query_row([], |row| row.get(0))
      })
      .await?;

    Ok(total)
  }

  // ========================================================================
  // Statistics
  // ========================================================================

  pub async fn store_statistic(&self, name: &str, calculated_at: i64, result: i64) -> Result<()> {
    self.ensure_open()?;
    let sql = self.statements.clone();
    let name = name.to_string();

    self
      .conn
      .call(move |conn| -> SqlResult<usize> {
        conn
          .prepare_cached(&sql.upsert_statistic)?
          .execute(params![&name, calculated_at, result])
      })
      .await?;

    Ok(())
  }

  pub async fn latest_statistic(&self, name: &str) -> Result<Option<Statistic>> {
    self.ensure_open()?;
    let sql = self.statements.clone();
    let name = name.to_string();

    let statistic = self
      .conn
      .call(move |conn| -> SqlResult<Option<Statistic>> {
        conn
          .prepare_cached(&sql.select_latest_statistic)?
          .query_row(params![&name], |row| {
            Ok(Statistic {
              name: row.get(0)?,
              calculated_at: row.get(1)?,
              result: row.get(2)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(statistic)
  }

  /// Close the shared connection. Later calls are no-ops.
  pub async fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    match self.conn.clone().close().await {
      Ok(()) => debug!("database closed"),
      Err(e) => warn!(error = ?e, "failed to close database"),
    }
  }
}

/// Name assignment inside an open transaction. The outer error aborts the
/// transaction; the inner one is a rejected write.
fn assign_name(
  tx: &tokio_rusqlite::rusqlite::Transaction<'_>,
  sql: &Statements,
  id: Uuid,
  name: &str,
  override_existing: bool,
) -> SqlResult<Result<()>> {
  let id = id.as_bytes().as_slice();
  let holder: Option<Vec<u8>> = tx
    .prepare_cached(&sql.select_uuid_by_name)?
    .query_row(params![name], |row| row.get(0))
    .optional()?;

  match holder {
    Some(holder) if holder == id => {}
    Some(_) if !override_existing => return Ok(Err(StorageError::NameTaken)),
    Some(_) => {
      tx.prepare_cached(&sql.clear_name)?.execute(params![name])?;
    }
    None => {}
  }

  tx.prepare_cached(&sql.upsert_player)?
    .execute(params![id, name])?;
  Ok(Ok(()))
}

/// Timestamps SQLite's date functions accept: 0000-01-01 to 9999-12-31.
const MIN_UNIX_SECONDS: i64 = -62_167_219_200;
const MAX_UNIX_SECONDS: i64 = 253_402_300_799;

/// Start of the interval that records `delta` seconds ending at `now`.
fn join_time(id: Uuid, delta: i64, now: i64) -> Result<i64> {
  now
    .checked_sub(delta)
    .filter(|joined| (MIN_UNIX_SECONDS..=MAX_UNIX_SECONDS).contains(joined))
    .ok_or(StorageError::OutOfRange { id, delta })
}

fn unix_seconds() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}
