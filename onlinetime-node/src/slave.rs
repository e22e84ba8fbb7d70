//! Read cache of a dependent node.
//!
//! A dependent node has no ledger of its own. Joining players are tracked
//! locally and their totals are pulled from upstream; credits are forwarded
//! and reconciled by the next pull.

use scc::hash_map::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::protocol::{Command, Inbound, Outbound, SyncMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Asked upstream, no answer yet.
    Pending,
    /// Holding upstream's last answer.
    Known,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    seconds: i64,
    state: SyncState,
}

pub struct SlaveTimeCache {
    entries: scc::HashMap<Uuid, CacheEntry>,
    upstream: Outbound,
}

impl SlaveTimeCache {
    pub fn new(upstream: Outbound) -> Self {
        Self {
            entries: scc::HashMap::new(),
            upstream,
        }
    }

    /// Start tracking `id`, seeded with zero until upstream answers.
    pub async fn on_join(&self, id: Uuid) {
        if let Entry::Vacant(entry) = self.entries.entry_async(id).await {
            entry.insert_entry(CacheEntry {
                seconds: 0,
                state: SyncState::Pending,
            });
        }
        self.forward(SyncMessage::get(id));
    }

    /// Stop tracking `id`. Upstream is not told.
    pub async fn on_leave(&self, id: Uuid) {
        self.entries.remove_async(&id).await;
    }

    /// Forward a credit upstream. The local value is left alone until the
    /// next pull.
    pub fn add_time(&self, id: Uuid, delta: i64) {
        self.forward(SyncMessage::add(id, delta));
    }

    pub async fn get_time(&self, id: Uuid) -> Option<i64> {
        self.entries.read_async(&id, |_, entry| entry.seconds).await
    }

    pub async fn state(&self, id: Uuid) -> Option<SyncState> {
        self.entries.read_async(&id, |_, entry| entry.state).await
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Ask upstream for the current total of every tracked player.
    pub async fn poll(&self) {
        let mut ids = Vec::with_capacity(self.entries.len());
        self.entries
            .retain_async(|id, _| {
                ids.push(*id);
                true
            })
            .await;

        debug!(count = ids.len(), "polling upstream");
        for id in ids {
            self.forward(SyncMessage::get(id));
        }
    }

    /// Apply one frame from upstream.
    pub async fn handle_message(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let message = SyncMessage::decode(frame)?;
        match message.command {
            Command::Send(seconds) => {
                let updated = self
                    .entries
                    .update_async(&message.id, |_, entry| {
                        entry.seconds = seconds;
                        entry.state = SyncState::Known;
                    })
                    .await;
                if updated.is_none() {
                    debug!(id = %message.id, "dropping total for untracked player");
                }
            }
            other => {
                warn!(id = %message.id, command = other.tag(), "unexpected command from upstream");
            }
        }
        Ok(())
    }

    /// Receive frames until cancelled or the channel closes. Malformed
    /// frames are logged and dropped.
    pub async fn run(&self, mut inbound: Inbound, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        debug!("upstream channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_message(&frame).await {
                        warn!(error = %e, len = frame.len(), "dropping malformed frame");
                    }
                }
            }
        }
    }

    fn forward(&self, message: SyncMessage) {
        if self.upstream.send(message.encode()).is_err() {
            warn!(id = %message.id, command = message.command.tag(), "upstream channel closed");
        }
    }
}
