use onlinetime_store::StorageError;
use thiserror::Error;

/// A replication frame that could not be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
  #[error("frame truncated while reading {0}")]
  Truncated(&'static str),

  #[error("command tag is not valid utf-8")]
  InvalidTag,

  #[error("unknown command '{0}'")]
  UnknownCommand(String),

  #[error("{0} unexpected bytes after payload")]
  TrailingBytes(usize),
}

/// Failure while applying a frame on the authoritative node.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Protocol(#[from] ProtocolError),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown node role '{0}' (expected 'master' or 'slave')")]
pub struct UnknownRole(pub String);
