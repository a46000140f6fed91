#![allow(dead_code)]

use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, FixedBytes, LogData, U256, address};
use nft_indexer::error::RpcError;
use nft_indexer::rpc::ChainClient;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub const CONTRACT: Address = address!("0x06012c8cf97bead5deae237070f9587f8e7a266d");
pub const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
pub const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

/// In-process chain with a scripted head, a fixed set of logs and optional
/// head failures.
pub struct MockChain {
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    failing_heads: AtomicU32,
    log_queries: Mutex<Vec<(u64, u64)>>,
    timestamp_queries: Mutex<Vec<u64>>,
    metadata: bool,
}

pub const GENESIS_TIME: u64 = 1_600_000_000;

/// Block time of the mock chain: one block every twelve seconds.
pub fn block_time(block_number: u64) -> u64 {
    GENESIS_TIME + block_number * 12
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            failing_heads: AtomicU32::new(0),
            log_queries: Mutex::new(Vec::new()),
            timestamp_queries: Mutex::new(Vec::new()),
            metadata: true,
        }
    }

    pub fn without_metadata(mut self) -> Self {
        self.metadata = false;
        self
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// The next `count` head queries time out.
    pub fn fail_heads(&self, count: u32) {
        self.failing_heads.store(count, Ordering::SeqCst);
    }

    pub fn push_log(&self, contract: Address, data: LogData, block_number: u64, log_index: u64) {
        self.logs
            .lock()
            .unwrap()
            .push(log_at(contract, data, block_number, log_index));
    }

    pub fn push_raw(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.log_queries.lock().unwrap().clone()
    }

    pub fn timestamp_queries(&self) -> Vec<u64> {
        self.timestamp_queries.lock().unwrap().clone()
    }
}

pub fn log_at(contract: Address, data: LogData, block_number: u64, log_index: u64) -> Log {
    let mut tx = [0u8; 32];
    tx[..8].copy_from_slice(&block_number.to_be_bytes());
    tx[8..16].copy_from_slice(&log_index.to_be_bytes());

    Log {
        inner: alloy_primitives::Log {
            address: contract,
            data,
        },
        block_number: Some(block_number),
        transaction_hash: Some(B256::from(tx)),
        log_index: Some(log_index),
        ..Default::default()
    }
}

impl ChainClient for MockChain {
    async fn get_chain_head(&self) -> Result<u64, RpcError> {
        let failing = self.failing_heads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_heads.store(failing - 1, Ordering::SeqCst);
            return Err(RpcError::Timeout(Duration::from_secs(1)));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(
        &self,
        contract: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        self.log_queries.lock().unwrap().push((from_block, to_block));

        let mut logs: Vec<Log> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.address() == contract)
            .filter(|log| log.topics().first() == Some(&topic0))
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| block >= from_block && block <= to_block)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, RpcError> {
        self.timestamp_queries.lock().unwrap().push(block_number);
        Ok(block_time(block_number))
    }

    async fn supports_interface(&self, _contract: Address, _interface_id: FixedBytes<4>) -> bool {
        self.metadata
    }

    async fn name(&self, _contract: Address) -> Option<String> {
        self.metadata.then(|| "CryptoKitties".to_string())
    }

    async fn symbol(&self, _contract: Address) -> Option<String> {
        self.metadata.then(|| "CK".to_string())
    }

    async fn token_uri(&self, _contract: Address, token_id: U256) -> Option<String> {
        self.metadata
            .then(|| format!("https://api.example.org/kitties/{token_id}"))
    }

    async fn uri(&self, _contract: Address, _token_id: U256) -> Option<String> {
        self.metadata
            .then(|| "https://api.example.org/items/{id}.json".to_string())
    }
}
