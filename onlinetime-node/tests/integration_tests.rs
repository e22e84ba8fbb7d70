use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use onlinetime_node::helpers::now_millis;
use onlinetime_node::{Node, SlaveTimeCache, SyncMessage, SyncState};
use onlinetime_store::{
    AccumulatingTimeStorage, DataStorageManager, DialectKind, SqlConfig, StorageConfig,
    StorageKind,
};
use tokio::sync::mpsc;
use uuid::Uuid;

const POLL: Duration = Duration::from_millis(50);

/// Helper to build a file-backed manager under `dir`
async fn setup_manager(dir: &Path) -> Arc<DataStorageManager> {
    let config = StorageConfig {
        kind: StorageKind::File,
        data_dir: dir.to_path_buf(),
        prefix: "onlinetime_".to_string(),
        sql: SqlConfig {
            dialect: DialectKind::Sqlite,
            database_path: dir.join("onlinetime.db"),
            server_name: "default".to_string(),
            world_name: "world".to_string(),
        },
    };
    let manager = Arc::new(DataStorageManager::new(config));
    manager
        .load_storages()
        .await
        .expect("Failed to load storages");
    manager
}

/// Helper to wire a master and a dependent node over in-process channels
fn connect(node: &mut Node, storage: Arc<AccumulatingTimeStorage>) -> Arc<SlaveTimeCache> {
    let (to_master, master_inbound) = mpsc::unbounded_channel();
    let (to_slave, slave_inbound) = mpsc::unbounded_channel();
    node.serve_dependent(storage, master_inbound, to_slave);
    node.start_slave(POLL, slave_inbound, to_master)
}

/// Helper to wait until the dependent node holds `predicate`
async fn wait_for(cache: &SlaveTimeCache, id: Uuid, predicate: impl Fn(Option<i64>) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let known = cache.state(id).await == Some(SyncState::Known);
            if known && predicate(cache.get_time(id).await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dependent node never converged");
}

#[tokio::test]
async fn test_join_pulls_authoritative_total() {
    // GIVEN: A master with 3600 stored seconds for a player
    let dir = tempfile::tempdir().unwrap();
    let manager = setup_manager(dir.path()).await;
    let storage = manager.time_storage().await.unwrap();
    let id = Uuid::new_v4();
    storage.add_time(id, 3600).await.unwrap();

    let mut node = Node::new();
    let slave = connect(&mut node, storage);

    // WHEN: The player joins the dependent node
    slave.on_join(id).await;

    // THEN: The dependent node learns the stored total
    wait_for(&slave, id, |seconds| seconds == Some(3600)).await;

    node.shutdown().await;
    manager.close_storages(now_millis()).await;
}

#[tokio::test]
async fn test_forwarded_credit_is_reconciled_by_poll() {
    // GIVEN: A dependent node that already knows a player's total
    let dir = tempfile::tempdir().unwrap();
    let manager = setup_manager(dir.path()).await;
    let storage = manager.time_storage().await.unwrap();
    let id = Uuid::new_v4();
    storage.add_time(id, 100).await.unwrap();

    let mut node = Node::new();
    let slave = connect(&mut node, storage.clone());
    slave.on_join(id).await;
    wait_for(&slave, id, |seconds| seconds == Some(100)).await;

    // WHEN: The dependent node credits 60 seconds
    slave.add_time(id, 60);

    // THEN: The master applies it and the next poll brings it back
    wait_for(&slave, id, |seconds| seconds == Some(160)).await;
    assert_eq!(storage.get_time(id, now_millis()).await.unwrap(), 160);

    node.shutdown().await;
    manager.close_storages(now_millis()).await;
}

#[tokio::test]
async fn test_open_session_is_visible_to_dependent_node() {
    // GIVEN: A player who has been online on the master for 30 seconds
    let dir = tempfile::tempdir().unwrap();
    let manager = setup_manager(dir.path()).await;
    let storage = manager.time_storage().await.unwrap();
    let id = Uuid::new_v4();
    storage
        .start_accumulating(id, now_millis() - 30_000)
        .await
        .unwrap();

    let mut node = Node::new();
    let slave = connect(&mut node, storage);

    // WHEN: The dependent node asks for the total
    slave.on_join(id).await;

    // THEN: The live session is included
    wait_for(&slave, id, |seconds| seconds.is_some_and(|s| s >= 30)).await;

    node.shutdown().await;
    manager.close_storages(now_millis()).await;
}

#[tokio::test]
async fn test_shutdown_flushes_open_sessions() {
    // GIVEN: An open 10 second session and a flush interval that never fires
    let dir = tempfile::tempdir().unwrap();
    let manager = setup_manager(dir.path()).await;
    let storage = manager.time_storage().await.unwrap();
    let id = Uuid::new_v4();
    storage
        .start_accumulating(id, now_millis() - 10_000)
        .await
        .unwrap();

    let mut node = Node::new();
    node.start_flushing(manager.clone(), Duration::from_secs(3600));

    // WHEN: The node shuts down
    node.shutdown().await;

    // THEN: The final flush wrote the session to the ledger and kept it open
    let stored = storage.ledger().get_time(id).await.unwrap();
    assert!(stored.is_some_and(|s| s >= 10), "stored: {stored:?}");
    assert!(storage.is_accumulating(id).await);

    manager.close_storages(now_millis()).await;
}

#[tokio::test]
async fn test_malformed_frames_are_tolerated() {
    // GIVEN: A master and a dependent node wired by hand
    let dir = tempfile::tempdir().unwrap();
    let manager = setup_manager(dir.path()).await;
    let storage = manager.time_storage().await.unwrap();
    let id = Uuid::new_v4();
    storage.add_time(id, 42).await.unwrap();

    let (to_master, master_inbound) = mpsc::unbounded_channel();
    let (to_slave, slave_inbound) = mpsc::unbounded_channel();
    let mut node = Node::new();
    node.serve_dependent(storage, master_inbound, to_slave.clone());
    let slave = node.start_slave(POLL, slave_inbound, to_master.clone());

    // WHEN: Garbage arrives on both sides before a valid exchange
    to_master.send(vec![0xFF; 3]).unwrap();
    let mut truncated = SyncMessage::get(id).encode();
    truncated.truncate(17);
    to_master.send(truncated).unwrap();
    to_slave.send(Vec::new()).unwrap();
    slave.on_join(id).await;

    // THEN: Both loops keep running and the exchange completes
    wait_for(&slave, id, |seconds| seconds == Some(42)).await;

    node.shutdown().await;
    manager.close_storages(now_millis()).await;
}
