pub mod config;
mod error;
pub mod helpers;
mod master;
mod protocol;
mod slave;
mod tasks;

pub use error::{ProtocolError, SyncError, UnknownRole};
pub use master::MasterSync;
pub use protocol::{AFK_CHANNEL, Command, Inbound, Outbound, STORAGE_CHANNEL, SyncMessage};
pub use slave::{SlaveTimeCache, SyncState};
pub use tasks::{spawn_flush_task, spawn_poll_task};

use onlinetime_store::{AccumulatingTimeStorage, DataStorageManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background tasks of one node, stopped together.
pub struct Node {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Flush the manager's open sessions every `interval`.
    pub fn start_flushing(&mut self, manager: Arc<DataStorageManager>, interval: Duration) {
        self.tasks
            .push(spawn_flush_task(manager, interval, self.token.child_token()));
    }

    /// Answer one dependent node's storage channel from `storage`.
    pub fn serve_dependent(
        &mut self,
        storage: Arc<AccumulatingTimeStorage>,
        inbound: Inbound,
        downstream: Outbound,
    ) {
        let master = MasterSync::new(storage, downstream);
        let token = self.token.child_token();
        self.tasks
            .push(tokio::spawn(async move { master.run(inbound, token).await }));
    }

    /// Run as a dependent node: receive totals from upstream and poll every
    /// `poll_interval`.
    pub fn start_slave(
        &mut self,
        poll_interval: Duration,
        inbound: Inbound,
        upstream: Outbound,
    ) -> Arc<SlaveTimeCache> {
        let cache = Arc::new(SlaveTimeCache::new(upstream));

        let receiver = cache.clone();
        let token = self.token.child_token();
        self.tasks
            .push(tokio::spawn(async move { receiver.run(inbound, token).await }));
        self.tasks.push(spawn_poll_task(
            cache.clone(),
            poll_interval,
            self.token.child_token(),
        ));
        cache
    }

    /// Cancel every task and wait for them to drain.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "node task failed");
            }
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}
