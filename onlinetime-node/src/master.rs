//! Authoritative side of the storage sync channel.

use std::sync::Arc;

use onlinetime_store::AccumulatingTimeStorage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::helpers::now_millis;
use crate::protocol::{Command, Inbound, Outbound, SyncMessage};

/// Answers one dependent node from the local accumulating cache.
pub struct MasterSync {
    storage: Arc<AccumulatingTimeStorage>,
    downstream: Outbound,
}

impl MasterSync {
    pub fn new(storage: Arc<AccumulatingTimeStorage>, downstream: Outbound) -> Self {
        Self {
            storage,
            downstream,
        }
    }

    pub async fn handle_message(&self, frame: &[u8], now: i64) -> Result<(), SyncError> {
        let message = SyncMessage::decode(frame)?;
        match message.command {
            Command::Get => {
                let seconds = self.storage.get_time(message.id, now).await?;
                let reply = SyncMessage::send(message.id, seconds);
                if self.downstream.send(reply.encode()).is_err() {
                    warn!(id = %message.id, "dependent channel closed");
                }
            }
            Command::Add(delta) => {
                debug!(id = %message.id, delta, "crediting time from dependent node");
                self.storage.add_time(message.id, delta).await?;
            }
            Command::Send(_) => {
                warn!(id = %message.id, "unexpected send from dependent node");
            }
        }
        Ok(())
    }

    /// Serve frames until cancelled or the channel closes.
    pub async fn run(&self, mut inbound: Inbound, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        debug!("dependent channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_message(&frame, now_millis()).await {
                        warn!(error = %e, len = frame.len(), "failed to handle sync frame");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onlinetime_store::{FileTimeStorage, SqlStorage, StorageError, TimeStorage};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    const T0: i64 = 1_700_000_000_000;

    async fn storage() -> Arc<AccumulatingTimeStorage> {
        let sql = SqlStorage::open_in_memory("").await.unwrap();
        Arc::new(AccumulatingTimeStorage::new(TimeStorage::Sql(sql)))
    }

    #[tokio::test]
    async fn test_get_replies_with_live_total() {
        let storage = storage().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let master = MasterSync::new(storage.clone(), tx);
        let id = Uuid::from_u128(1);

        storage.add_time(id, 100).await.unwrap();
        storage.start_accumulating(id, T0).await.unwrap();

        master
            .handle_message(&SyncMessage::get(id).encode(), T0 + 20_000)
            .await
            .unwrap();

        let reply = SyncMessage::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply, SyncMessage::send(id, 120));
    }

    #[tokio::test]
    async fn test_add_credits_storage() {
        let storage = storage().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let master = MasterSync::new(storage.clone(), tx);
        let id = Uuid::from_u128(1);

        master
            .handle_message(&SyncMessage::add(id, 45).encode(), T0)
            .await
            .unwrap();

        assert_eq!(storage.get_time(id, T0).await.unwrap(), 45);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_a_protocol_error() {
        let storage = storage().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let master = MasterSync::new(storage, tx);

        assert!(matches!(
            master.handle_message(&[0u8; 4], T0).await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_add_keeps_connection_alive() {
        let storage = storage().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let master = MasterSync::new(storage.clone(), tx);
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        storage.add_time(b, 20).await.unwrap();

        assert!(matches!(
            master
                .handle_message(&SyncMessage::add(a, i64::MIN).encode(), T0)
                .await,
            Err(SyncError::Storage(StorageError::OutOfRange { .. }))
        ));

        master
            .handle_message(&SyncMessage::get(b).encode(), T0)
            .await
            .unwrap();
        let reply = SyncMessage::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply, SyncMessage::send(b, 20));
    }

    #[tokio::test]
    async fn test_overflowing_add_is_rejected_by_file_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileTimeStorage::open(dir.path(), "").await.unwrap();
        let storage = Arc::new(AccumulatingTimeStorage::new(TimeStorage::File(Arc::new(
            ledger,
        ))));
        let (tx, _rx) = mpsc::unbounded_channel();
        let master = MasterSync::new(storage.clone(), tx);
        let id = Uuid::from_u128(1);
        let frame = SyncMessage::add(id, i64::MAX).encode();

        master.handle_message(&frame, T0).await.unwrap();
        assert!(master.handle_message(&frame, T0).await.is_err());
        assert_eq!(storage.get_time(id, T0).await.unwrap(), i64::MAX);
    }
}
