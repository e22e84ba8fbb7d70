//! Dialect-specific SQL text.
//!
//! A dialect only produces strings: table DDL, the duration expression used
//! to sum session intervals, and the handful of statements whose syntax
//! differs between engines. It is selected once when the storage opens.

use std::str::FromStr;

use crate::error::ConfigError;

/// Table names after applying the configured prefix.
#[derive(Debug, Clone)]
pub struct Tables {
  pub player: String,
  pub server: String,
  pub world: String,
  pub time: String,
  pub statistic: String,
}

impl Tables {
  pub fn new(prefix: &str) -> Self {
    Self {
      player: format!("{prefix}player"),
      server: format!("{prefix}server"),
      world: format!("{prefix}world"),
      time: format!("{prefix}time"),
      statistic: format!("{prefix}statistic"),
    }
  }
}

pub trait SqlDialect: Send + Sync {
  fn name(&self) -> &'static str;

  fn create_player_table(&self, t: &Tables) -> String;
  fn create_server_table(&self, t: &Tables) -> String;
  fn create_world_table(&self, t: &Tables) -> String;
  fn create_time_table(&self, t: &Tables) -> String;
  fn create_statistic_table(&self, t: &Tables) -> String;

  /// Expression yielding whole seconds between two timestamp columns.
  fn duration_seconds(&self, from: &str, to: &str) -> String;

  /// Expression converting a unix-seconds parameter into a timestamp.
  fn from_unix_seconds(&self, param: &str) -> String;

  /// Expression converting a timestamp column into unix seconds.
  fn to_unix_seconds(&self, column: &str) -> String;

  /// `INSERT` keyword form that silently skips unique violations.
  fn insert_ignore(&self) -> &'static str;

  /// Insert a player row or refresh `name`/`last_seen` on an existing one.
  /// Parameters: identifier, name.
  fn upsert_player(&self, t: &Tables) -> String;

  /// Insert a statistic or replace the result of the same calculation.
  /// Parameters: name, calculation time (unix seconds), result.
  fn upsert_statistic(&self, t: &Tables) -> String;

  /// All table DDL in dependency order.
  fn create_tables(&self, t: &Tables) -> Vec<String> {
    vec![
      self.create_player_table(t),
      self.create_server_table(t),
      self.create_world_table(t),
      self.create_time_table(t),
      self.create_statistic_table(t),
    ]
  }
}

/// The relational engines this crate can emit SQL for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
  Sqlite,
  MySql,
}

impl DialectKind {
  pub fn dialect(self) -> &'static dyn SqlDialect {
    match self {
      DialectKind::Sqlite => &SqliteDialect,
      DialectKind::MySql => &MySqlDialect,
    }
  }
}

impl FromStr for DialectKind {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "sqlite" => Ok(DialectKind::Sqlite),
      "mysql" | "mariadb" => Ok(DialectKind::MySql),
      other => Err(ConfigError::UnknownDialect(other.to_string())),
    }
  }
}

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  fn create_player_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {player} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier BLOB NOT NULL UNIQUE,
    name VARCHAR(16) UNIQUE,
    last_seen TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#,
      player = t.player
    )
  }

  fn create_server_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {server} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(255) NOT NULL UNIQUE
)"#,
      server = t.server
    )
  }

  fn create_world_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {world} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER NOT NULL REFERENCES {server}(id) ON DELETE CASCADE,
    name VARCHAR(255) NOT NULL,
    UNIQUE(server_id, name)
)"#,
      world = t.world,
      server = t.server
    )
  }

  fn create_time_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {time} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL REFERENCES {player}(id) ON DELETE CASCADE,
    world_id INTEGER NOT NULL REFERENCES {world}(id) ON DELETE CASCADE,
    join_time TIMESTAMP NOT NULL,
    leave_time TIMESTAMP NOT NULL
)"#,
      time = t.time,
      player = t.player,
      world = t.world
    )
  }

  fn create_statistic_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {statistic} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    statistic_name VARCHAR(255) NOT NULL,
    calculation_time TIMESTAMP NOT NULL,
    result BIGINT NOT NULL,
    UNIQUE(statistic_name, calculation_time)
)"#,
      statistic = t.statistic
    )
  }

  fn duration_seconds(&self, from: &str, to: &str) -> String {
    format!(
      "(CAST(strftime('%s', {to}) AS INTEGER) - CAST(strftime('%s', {from}) AS INTEGER))"
    )
  }

  fn from_unix_seconds(&self, param: &str) -> String {
    format!("datetime({param}, 'unixepoch')")
  }

  fn to_unix_seconds(&self, column: &str) -> String {
    format!("CAST(strftime('%s', {column}) AS INTEGER)")
  }

  fn insert_ignore(&self) -> &'static str {
    "INSERT OR IGNORE"
  }

  fn upsert_player(&self, t: &Tables) -> String {
    format!(
      "INSERT INTO {player} (identifier, name, last_seen) VALUES (?, ?, CURRENT_TIMESTAMP) \
       ON CONFLICT(identifier) DO UPDATE SET name = excluded.name, last_seen = CURRENT_TIMESTAMP",
      player = t.player
    )
  }

  fn upsert_statistic(&self, t: &Tables) -> String {
    format!(
      "INSERT INTO {statistic} (statistic_name, calculation_time, result) VALUES (?, {time}, ?) \
       ON CONFLICT(statistic_name, calculation_time) DO UPDATE SET result = excluded.result",
      statistic = t.statistic,
      time = self.from_unix_seconds("?")
    )
  }
}

pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
  fn name(&self) -> &'static str {
    "mysql"
  }

  fn create_player_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {player} (
    id INT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    identifier BINARY(16) NOT NULL UNIQUE,
    name VARCHAR(16) UNIQUE,
    last_seen TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#,
      player = t.player
    )
  }

  fn create_server_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {server} (
    id INT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE
)"#,
      server = t.server
    )
  }

  fn create_world_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {world} (
    id INT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    server_id INT NOT NULL,
    name VARCHAR(255) NOT NULL,
    UNIQUE(server_id, name),
    FOREIGN KEY (server_id) REFERENCES {server}(id) ON DELETE CASCADE
)"#,
      world = t.world,
      server = t.server
    )
  }

  fn create_time_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {time} (
    id INT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    player_id INT NOT NULL,
    world_id INT NOT NULL,
    join_time TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    leave_time TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (player_id) REFERENCES {player}(id) ON DELETE CASCADE,
    FOREIGN KEY (world_id) REFERENCES {world}(id) ON DELETE CASCADE
)"#,
      time = t.time,
      player = t.player,
      world = t.world
    )
  }

  fn create_statistic_table(&self, t: &Tables) -> String {
    format!(
      r#"CREATE TABLE IF NOT EXISTS {statistic} (
    id INT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    statistic_name VARCHAR(255) NOT NULL,
    calculation_time TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    result BIGINT NOT NULL,
    UNIQUE(statistic_name, calculation_time)
)"#,
      statistic = t.statistic
    )
  }

  fn duration_seconds(&self, from: &str, to: &str) -> String {
    format!("TIMESTAMPDIFF(SECOND, {from}, {to})")
  }

  fn from_unix_seconds(&self, param: &str) -> String {
    format!("FROM_UNIXTIME({param})")
  }

  fn to_unix_seconds(&self, column: &str) -> String {
    format!("UNIX_TIMESTAMP({column})")
  }

  fn insert_ignore(&self) -> &'static str {
    "INSERT IGNORE"
  }

  fn upsert_player(&self, t: &Tables) -> String {
    format!(
      "INSERT INTO {player} (identifier, name, last_seen) VALUES (?, ?, CURRENT_TIMESTAMP) \
       ON DUPLICATE KEY UPDATE name = VALUES(name), last_seen = CURRENT_TIMESTAMP",
      player = t.player
    )
  }

  fn upsert_statistic(&self, t: &Tables) -> String {
    format!(
      "INSERT INTO {statistic} (statistic_name, calculation_time, result) VALUES (?, {time}, ?) \
       ON DUPLICATE KEY UPDATE result = VALUES(result)",
      statistic = t.statistic,
      time = self.from_unix_seconds("?")
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dialect_kind_parsing() {
    assert_eq!("sqlite".parse::<DialectKind>(), Ok(DialectKind::Sqlite));
    assert_eq!(" MySQL ".parse::<DialectKind>(), Ok(DialectKind::MySql));
    assert_eq!(
      "postgres".parse::<DialectKind>(),
      Err(ConfigError::UnknownDialect("postgres".to_string()))
    );
  }

  #[test]
  fn test_tables_use_prefix() {
    let tables = Tables::new("ot_");
    for ddl in SqliteDialect.create_tables(&tables) {
      assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS ot_"), "{ddl}");
    }
    for ddl in MySqlDialect.create_tables(&tables) {
      assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS ot_"), "{ddl}");
    }
  }

  #[test]
  fn test_player_table_keys_on_identifier() {
    let tables = Tables::new("");
    for ddl in [
      SqliteDialect.create_player_table(&tables),
      MySqlDialect.create_player_table(&tables),
    ] {
      assert!(ddl.contains("identifier "), "{ddl}");
      assert!(ddl.contains("name "), "{ddl}");
      assert!(ddl.contains("last_seen "), "{ddl}");
    }
    assert!(SqliteDialect.upsert_player(&tables).contains("ON CONFLICT(identifier)"));
  }

  #[test]
  fn test_dialects_differ_where_engines_differ() {
    let tables = Tables::new("");
    let sqlite = SqliteDialect.create_player_table(&tables);
    let mysql = MySqlDialect.create_player_table(&tables);
    assert!(sqlite.contains("AUTOINCREMENT") && sqlite.contains("BLOB"));
    assert!(mysql.contains("AUTO_INCREMENT") && mysql.contains("BINARY(16)"));

    assert_eq!(
      MySqlDialect.duration_seconds("join_time", "leave_time"),
      "TIMESTAMPDIFF(SECOND, join_time, leave_time)"
    );
    assert!(
      SqliteDialect
        .duration_seconds("join_time", "leave_time")
        .contains("strftime('%s', leave_time)")
    );
  }

  #[test]
  fn test_statistic_upsert_embeds_time_conversion() {
    let tables = Tables::new("");
    assert!(
      SqliteDialect
        .upsert_statistic(&tables)
        .contains("datetime(?, 'unixepoch')")
    );
    assert!(MySqlDialect.upsert_statistic(&tables).contains("FROM_UNIXTIME(?)"));
  }
}
