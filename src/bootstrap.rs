//! Startup helpers: register scan targets and seed the pool with one Task per
//! (contract, event) at its checkpoint.

use crate::collector::decode_strategy;
use crate::pool::WorkerPool;
use crate::repository::{ContractRepository, Database, EventRepository};
use crate::task::Task;
use alloy::json_abi::JsonAbi;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Read a newline-separated list of contract addresses. Blank lines and
/// `#` comments are ignored.
pub fn load_addresses(path: &Path) -> Result<Vec<Address>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read addresses from {}", path.display()))?;
    parse_addresses(&contents)
}

fn parse_addresses(contents: &str) -> Result<Vec<Address>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| Address::from_str(line).with_context(|| format!("Invalid address: {}", line)))
        .collect()
}

pub fn load_abi(path: &Path) -> Result<JsonAbi> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ABI from {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid ABI in {}", path.display()))
}

/// Store `abi` as the scan source of every address not registered yet.
/// Returns how many were added.
pub fn register_contracts(db: &Database, addresses: &[Address], abi: &JsonAbi) -> Result<usize> {
    let conn = db.conn();
    let repo = ContractRepository::new(&conn);

    let mut added = 0;
    for address in addresses {
        if repo.insert_source_if_missing(address, abi)? {
            added += 1;
        }
    }

    info!(
        "Registered {} new contracts ({} already known)",
        added,
        addresses.len() - added
    );
    Ok(added)
}

/// Submit one Task per ABI event of every registered source, starting at the
/// key's checkpoint. Events the collector cannot decode are left out. Returns
/// how many Tasks were admitted.
pub fn seed_tasks(db: &Database, pool: &WorkerPool, collector: &str, default_block: u64) -> Result<usize> {
    let strategy = decode_strategy(collector);
    let mut tasks = Vec::new();
    {
        let conn = db.conn();
        let sources = ContractRepository::new(&conn)
            .list_sources()
            .context("Failed to list contract sources")?;
        let events = EventRepository::new(&conn);

        for source in sources {
            for event in source.abi.events() {
                if event.anonymous {
                    warn!(contract = ?source.address, event = %event.name, "Skipping anonymous event");
                    continue;
                }
                if strategy.is_some_and(|strategy| !strategy.can_decode(&event.selector())) {
                    debug!(collector, event = %event.name, "Skipping event the collector cannot decode");
                    continue;
                }

                let from_block = events
                    .get_checkpoint(&source.address, &event.name, default_block)
                    .with_context(|| format!("Failed to read checkpoint for {:?}", source.address))?;
                tasks.push(Task::new(collector, source.address, event.clone(), from_block));
            }
        }
    }

    let total = tasks.len();
    let admitted = tasks
        .into_iter()
        .map(|task| pool.submit(task))
        .filter(|&admitted| admitted)
        .count();
    info!("Seeded {} tasks ({} duplicates skipped)", admitted, total - admitted);
    Ok(admitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorRegistry, GENERIC_EVENT_COLLECTOR, NFT_TRANSFER_COLLECTOR};
    use crate::config::PoolConfig;
    use crate::queue::{QueueItem, TaskQueue};
    use crate::repository::RawEvent;
    use alloy_primitives::{B256, address};
    use std::sync::Arc;

    const ABI: &str = r#"[
        {"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"tokenId","type":"uint256","indexed":true}]},
        {"type":"event","name":"Approval","anonymous":false,"inputs":[
            {"name":"owner","type":"address","indexed":true},
            {"name":"approved","type":"address","indexed":true},
            {"name":"tokenId","type":"uint256","indexed":true}]},
        {"type":"function","name":"name","inputs":[],"outputs":[{"name":"","type":"string"}],"stateMutability":"view"}
    ]"#;

    #[test]
    fn parses_address_list() {
        let addresses = parse_addresses(
            "0x06012c8cf97BEaD5deAe237070F9587f8E7A266d\n\n# kitties above\n",
        )
        .unwrap();
        assert_eq!(addresses, vec![address!("06012c8cf97BEaD5deAe237070F9587f8E7A266d")]);
        assert!(parse_addresses("not-an-address").is_err());
    }

    #[tokio::test]
    async fn seeds_one_task_per_event_at_checkpoint() {
        let db = Database::in_memory().unwrap();
        let abi: JsonAbi = serde_json::from_str(ABI).unwrap();
        let contract = address!("00000000000000000000000000000000000000aa");

        assert_eq!(register_contracts(&db, &[contract], &abi).unwrap(), 1);
        assert_eq!(register_contracts(&db, &[contract], &abi).unwrap(), 0);

        {
            let conn = db.conn();
            EventRepository::new(&conn)
                .insert(&RawEvent {
                    transaction_hash: B256::repeat_byte(1),
                    log_index: 0,
                    contract_address: contract,
                    event_name: "Transfer".to_string(),
                    block_number: 12_345,
                    args: serde_json::json!({}),
                })
                .unwrap();
        }

        let queue = Arc::new(TaskQueue::new());
        let pool = WorkerPool::new(queue.clone(), CollectorRegistry::new(), PoolConfig::default());
        assert_eq!(seed_tasks(&db, &pool, GENERIC_EVENT_COLLECTOR, 9_000_000).unwrap(), 2);
        // A second seeding finds both keys resident.
        assert_eq!(seed_tasks(&db, &pool, GENERIC_EVENT_COLLECTOR, 9_000_000).unwrap(), 0);

        let mut starts = Vec::new();
        for _ in 0..2 {
            match queue.get().await {
                QueueItem::Work(task) => starts.push((task.event_name, task.from_block)),
                QueueItem::Stop => panic!("unexpected stop"),
            }
        }
        starts.sort();
        assert_eq!(
            starts,
            vec![("Approval".to_string(), 9_000_000), ("Transfer".to_string(), 12_345)]
        );
    }

    #[tokio::test]
    async fn transfer_collector_is_seeded_with_transfer_events_only() {
        let db = Database::in_memory().unwrap();
        let abi: JsonAbi = serde_json::from_str(ABI).unwrap();
        register_contracts(&db, &[address!("00000000000000000000000000000000000000aa")], &abi).unwrap();

        let queue = Arc::new(TaskQueue::new());
        let pool = WorkerPool::new(queue.clone(), CollectorRegistry::new(), PoolConfig::default());
        assert_eq!(seed_tasks(&db, &pool, NFT_TRANSFER_COLLECTOR, 1).unwrap(), 1);
        assert_eq!(queue.len(), 1);
    }
}
