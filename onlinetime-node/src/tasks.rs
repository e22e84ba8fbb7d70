//! Periodic drivers. Each stops when its token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use onlinetime_store::DataStorageManager;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::helpers::now_millis;
use crate::slave::SlaveTimeCache;

/// Flush open sessions every `period`, and once more after cancellation.
pub fn spawn_flush_task(
    manager: Arc<DataStorageManager>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => flush(&manager).await,
            }
        }

        debug!("flush task cancelled, flushing one last time");
        flush(&manager).await;
    })
}

async fn flush(manager: &DataStorageManager) {
    if let Err(e) = manager.flush_online_time_cache(now_millis()).await {
        error!(error = %e, "failed to flush online time cache");
    }
}

/// Re-request every tracked player's total every `period`.
pub fn spawn_poll_task(
    cache: Arc<SlaveTimeCache>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => cache.poll().await,
            }
        }
        debug!("poll task cancelled");
    })
}
