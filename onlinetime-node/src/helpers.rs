use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in unix milliseconds.
pub fn now_millis() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or_default()
}
