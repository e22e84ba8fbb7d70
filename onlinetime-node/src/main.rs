use std::sync::Arc;

use anyhow::{Context, bail};
use onlinetime_node::Node;
use onlinetime_node::config::{Config, NodeRole};
use onlinetime_node::helpers::now_millis;
use onlinetime_store::DataStorageManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting online time node...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: role={}, storage={}, data_dir={}, prefix={}, flush={}s",
        config.role,
        config.storage_kind,
        config.data_dir.display(),
        config.table_prefix,
        config.flush_interval.as_secs()
    );

    if config.role()? == NodeRole::Slave {
        bail!("dependent nodes have no ledger to serve; embed one with Node::start_slave");
    }

    let storage_config = config
        .storage_config()
        .context("invalid storage configuration")?;
    let manager = Arc::new(DataStorageManager::new(storage_config));
    manager
        .load_storages()
        .await
        .context("failed to load storages")?;

    match manager
        .total_online_time(config.flush_interval, now_millis())
        .await
    {
        Ok(total) => tracing::info!("Total recorded online time: {}s", total),
        Err(e) => tracing::warn!("Could not compute total online time: {}", e),
    }

    let mut node = Node::new();
    node.start_flushing(manager.clone(), config.flush_interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down...");

    node.shutdown().await;
    manager.close_storages(now_millis()).await;
    Ok(())
}
