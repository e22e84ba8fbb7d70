use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("storage file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed storage file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed stored identifier: {0}")]
    Malformed(String),

    #[error("time delta {delta}s for {id} is out of range")]
    OutOfRange { id: Uuid, delta: i64 },

    #[error("storage has been closed")]
    Closed,

    #[error("name is already held by another player")]
    NameTaken,

    #[error("invalid player name: {0}")]
    InvalidName(String),
}

/// Startup configuration that cannot be turned into a storage backend.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown storage kind '{0}' (expected 'file' or 'sql')")]
    UnknownStorageKind(String),

    #[error("unknown sql dialect '{0}' (expected 'sqlite' or 'mysql')")]
    UnknownDialect(String),

    #[error("no driver available for the {0} dialect")]
    DriverUnavailable(&'static str),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
