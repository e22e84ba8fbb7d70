use std::env::var;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use onlinetime_store::{ConfigError, DialectKind, SqlConfig, StorageConfig, StorageKind};

use crate::error::UnknownRole;

/// Whether this node owns the ledger or mirrors an upstream one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Slave,
}

impl FromStr for NodeRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "slave" => Ok(NodeRole::Slave),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Node configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Node role
    /// Env: NODE_ROLE (default: "master")
    pub role: String,

    /// Storage backend, "file" or "sql"
    /// Env: STORAGE_KIND (default: "file")
    pub storage_kind: String,

    /// Directory for the file backend
    /// Env: DATA_DIR (default: "data")
    pub data_dir: PathBuf,

    /// Prefix for storage file names and table names
    /// Env: TABLE_PREFIX (default: "onlinetime_")
    pub table_prefix: String,

    /// SQL dialect, "sqlite" or "mysql"
    /// Env: SQL_DIALECT (default: "sqlite")
    pub sql_dialect: String,

    /// Database file path
    /// Env: SQL_DATABASE_PATH (default: "onlinetime.db")
    pub sql_database_path: PathBuf,

    /// Name of this node in the server table
    /// Env: SERVER_NAME (default: "default")
    pub server_name: String,

    /// World session intervals are recorded against
    /// Env: WORLD_NAME (default: "world")
    pub world_name: String,

    /// How often open sessions are flushed to storage
    /// Env: FLUSH_INTERVAL_SECS (default: 300)
    pub flush_interval: Duration,

    /// How often a dependent node re-requests tracked totals. The daemon
    /// only runs the master role; this is read by embedders that pass it to
    /// `Node::start_slave`.
    /// Env: SYNC_POLL_INTERVAL_SECS (default: 30)
    pub sync_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            role: env_or_default_string("NODE_ROLE", &defaults.role),
            storage_kind: env_or_default_string("STORAGE_KIND", &defaults.storage_kind),
            data_dir: env_or_default("DATA_DIR", defaults.data_dir),
            table_prefix: env_or_default_string("TABLE_PREFIX", &defaults.table_prefix),
            sql_dialect: env_or_default_string("SQL_DIALECT", &defaults.sql_dialect),
            sql_database_path: env_or_default("SQL_DATABASE_PATH", defaults.sql_database_path),
            server_name: env_or_default_string("SERVER_NAME", &defaults.server_name),
            world_name: env_or_default_string("WORLD_NAME", &defaults.world_name),
            flush_interval: Duration::from_secs(env_or_default("FLUSH_INTERVAL_SECS", 300)),
            sync_poll_interval: Duration::from_secs(env_or_default("SYNC_POLL_INTERVAL_SECS", 30)),
        }
    }

    pub fn role(&self) -> Result<NodeRole, UnknownRole> {
        self.role.parse()
    }

    /// Typed storage configuration for the store crate.
    pub fn storage_config(&self) -> Result<StorageConfig, ConfigError> {
        Ok(StorageConfig {
            kind: self.storage_kind.parse::<StorageKind>()?,
            data_dir: self.data_dir.clone(),
            prefix: self.table_prefix.clone(),
            sql: SqlConfig {
                dialect: self.sql_dialect.parse::<DialectKind>()?,
                database_path: self.sql_database_path.clone(),
                server_name: self.server_name.clone(),
                world_name: self.world_name.clone(),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: "master".to_string(),
            storage_kind: "file".to_string(),
            data_dir: PathBuf::from("data"),
            table_prefix: "onlinetime_".to_string(),
            sql_dialect: "sqlite".to_string(),
            sql_database_path: PathBuf::from("onlinetime.db"),
            server_name: "default".to_string(),
            world_name: "world".to_string(),
            flush_interval: Duration::from_secs(300),
            sync_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
