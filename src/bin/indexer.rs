use anyhow::{Context, Result};
use nft_indexer::bootstrap::{load_abi, load_addresses, register_contracts, seed_tasks};
use nft_indexer::collector::CollectorRegistry;
use nft_indexer::config::Config;
use nft_indexer::logging::init_tracing;
use nft_indexer::pool::WorkerPool;
use nft_indexer::queue::TaskQueue;
use nft_indexer::repository::Database;
use nft_indexer::rpc::RpcClient;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

const RPC_MAX_RETRIES: usize = 3;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting NFT indexer");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");

    let client = Arc::new(RpcClient::new(&config.json_rpc_urls, RPC_MAX_RETRIES)?);
    info!("RPC client connected");

    let registry = CollectorRegistry::standard(client, db.clone(), config.scan.clone());
    if !registry.contains(&config.collector) {
        warn!(collector = %config.collector, "Configured collector is not registered");
    }

    if config.addresses_path.exists() {
        let abi = load_abi(&config.abi_path)?;
        let addresses = load_addresses(&config.addresses_path)?;
        let db = db.clone();
        tokio::task::spawn_blocking(move || register_contracts(&db, &addresses, &abi)).await??;
    } else {
        info!(
            "No address list at {}, using registered contracts only",
            config.addresses_path.display()
        );
    }

    let queue = Arc::new(TaskQueue::new());
    let pool = WorkerPool::new(queue, registry, config.pool.clone());
    let seeded = {
        let (db, pool) = (db.clone(), pool.clone());
        let (collector, default_block) = (config.collector.clone(), config.default_start_block);
        tokio::task::spawn_blocking(move || seed_tasks(&db, &pool, &collector, default_block))
            .await?
            .context("Failed to seed tasks")?
    };
    if seeded == 0 {
        warn!("No tasks seeded; register contracts with an address list first");
    }

    let handle = pool.spawn();

    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received; stopping workers");

    handle.stop();
    handle.join().await;

    let stats = pool.stats();
    info!(
        scans = stats.scans,
        persisted = stats.persisted,
        retried = stats.retried,
        dropped = stats.dropped,
        unknown = stats.unknown,
        "Indexer stopped"
    );

    Ok(())
}
