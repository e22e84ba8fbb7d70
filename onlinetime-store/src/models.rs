use arrayvec::ArrayString;
use uuid::Uuid;

use crate::error::StorageError;

/// Minecraft player name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// Parse and validate a player name.
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters (Minecraft username limit)
/// - Only alphanumeric characters and underscores
pub fn player_name(name: &str) -> Result<PlayerName, StorageError> {
  if name.is_empty() {
    return Err(StorageError::InvalidName("name cannot be empty".to_string()));
  }

  if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return Err(StorageError::InvalidName(format!(
      "'{name}' contains characters other than letters, digits and underscore"
    )));
  }

  PlayerName::from(name).map_err(|_| {
    StorageError::InvalidName(format!("'{name}' is longer than 16 characters"))
  })
}

/// Parse an identifier persisted in its hyphenated string form.
pub fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
  Uuid::parse_str(raw).map_err(|e| StorageError::Malformed(format!("{raw}: {e}")))
}

/// Parse an identifier persisted as 16 raw bytes.
pub fn uuid_from_bytes(raw: &[u8]) -> Result<Uuid, StorageError> {
  Uuid::from_slice(raw).map_err(|e| StorageError::Malformed(e.to_string()))
}

/// Whole seconds owed to a session started at `started_at` (unix millis).
/// Negative when an administrative debit pushed the start past `now`.
pub fn owed_seconds(started_at: i64, now: i64) -> i64 {
  now.saturating_sub(started_at) / 1000
}

/// An entry of the online time leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry {
  pub id: Uuid,
  /// Current name, absent if never resolved or revoked.
  pub name: Option<String>,
  /// Total online seconds including live sessions.
  pub seconds: i64,
}

/// A cached rollup from the statistic table.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistic {
  pub name: String,
  /// Unix seconds when the rollup was computed.
  pub calculated_at: i64,
  pub result: i64,
}
