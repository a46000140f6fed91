use super::{Collector, ScanFuture, ScanOutcome};
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::events::{DecodeStrategy, LogPosition, TokenMovement, TransferBatch, TransferSingle, erc721, token_movements};
use crate::metadata::{fetch_contract_metadata, fetch_token_metadata};
use crate::repository::{
    ContractRepository, Database, EventRepository, Leg, OwnershipDelta, OwnershipRepository,
    RawEvent, TokenRepository, Transfer, TransferRepository, nft_id,
};
use crate::rpc::ChainClient;
use crate::task::Task;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{B256, I256};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, error, info, warn};

/// Scans one (contract, event) key page by page and materializes what it
/// finds. The decoding strategy is the only difference between the
/// registered collectors.
pub struct EventCollector<C> {
    client: Arc<C>,
    db: Database,
    strategy: DecodeStrategy,
    config: ScanConfig,
}

impl<C: ChainClient> EventCollector<C> {
    pub fn new(client: Arc<C>, db: Database, strategy: DecodeStrategy, config: ScanConfig) -> Self {
        Self {
            client,
            db,
            strategy,
            config,
        }
    }

    fn topic0(&self, task: &Task) -> Result<B256, ScanError> {
        let topic0 = match &task.event_abi {
            Some(event) if event.anonymous => {
                return Err(ScanError::InvalidTask(format!(
                    "anonymous event {} has no signature topic",
                    event.name
                )));
            }
            Some(event) => event.selector(),
            None if self.strategy.requires_abi() => {
                return Err(ScanError::InvalidTask(format!(
                    "no ABI fragment for event {}",
                    task.event_name
                )));
            }
            None => match task.event_name.as_str() {
                "Transfer" => erc721::Transfer::SIGNATURE_HASH,
                "TransferSingle" => TransferSingle::SIGNATURE_HASH,
                "TransferBatch" => TransferBatch::SIGNATURE_HASH,
                other => {
                    return Err(ScanError::InvalidTask(format!(
                        "no compiled decoder for event {other}"
                    )));
                }
            },
        };

        if !self.strategy.can_decode(&topic0) {
            return Err(ScanError::InvalidTask(format!(
                "event {} cannot be decoded by this collector",
                task.event_name
            )));
        }
        Ok(topic0)
    }

    pub async fn scan_range(&self, task: &Task) -> Result<ScanOutcome, ScanError> {
        let topic0 = self.topic0(task)?;
        let chain_head = self.client.get_chain_head().await?;

        if task.from_block > chain_head {
            debug!(
                key = %task.key(),
                from_block = task.from_block,
                chain_head,
                "Nothing new to scan"
            );
            return Ok(ScanOutcome {
                persisted: 0,
                next: task.advance(task.from_block),
                caught_up: true,
            });
        }

        let page_size = self.config.page_size.max(1);
        let to_block = task
            .from_block
            .saturating_add(page_size - 1)
            .min(chain_head);

        let logs = self
            .client
            .get_logs(task.contract, topic0, task.from_block, to_block)
            .await?;

        debug!(
            key = %task.key(),
            "Received {} logs for blocks {} to {}",
            logs.len(),
            task.from_block,
            to_block
        );

        let mut timestamps = HashMap::new();
        let mut persisted = 0;
        for log in &logs {
            if self.process_log(task, log, &mut timestamps).await {
                persisted += 1;
            }
        }

        let (contract, event_name) = (task.contract, task.event_name.clone());
        self.write(move |conn| {
            EventRepository::new(conn).record_progress(&contract, &event_name, to_block)
        })
        .await
        .map_err(ScanError::Store)?;

        if persisted > 0 {
            info!(
                key = %task.key(),
                "Persisted {} events from blocks {} to {}",
                persisted,
                task.from_block,
                to_block
            );
        }

        // At the head the same window is scanned again on the next poll.
        let caught_up = to_block >= chain_head;
        let next = if caught_up {
            task.advance(task.from_block)
        } else {
            task.advance(to_block + 1)
        };

        Ok(ScanOutcome {
            persisted,
            next,
            caught_up,
        })
    }

    /// Decode and store one log. Returns `true` only when its raw event was
    /// not stored before.
    async fn process_log(
        &self,
        task: &Task,
        log: &Log,
        timestamps: &mut HashMap<u64, Option<u64>>,
    ) -> bool {
        let position = match LogPosition::of(log) {
            Ok(position) => position,
            Err(e) => {
                warn!(key = %task.key(), "Skipping log without position: {}", e);
                return false;
            }
        };

        let decoded = self
            .strategy
            .decode(task.event_abi.as_deref(), log)
            .and_then(|decoded| token_movements(log).map(|movements| (decoded, movements)));
        let (decoded, movements) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    key = %task.key(),
                    block = position.block_number,
                    log_index = position.log_index,
                    "Failed to decode event: {}",
                    e
                );
                return false;
            }
        };

        let raw = RawEvent {
            transaction_hash: position.transaction_hash,
            log_index: position.log_index,
            contract_address: task.contract,
            event_name: decoded.name,
            block_number: position.block_number,
            args: decoded.args,
        };
        let inserted = match self
            .write(move |conn| EventRepository::new(conn).insert(&raw))
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(
                    key = %task.key(),
                    tx = ?position.transaction_hash,
                    log_index = position.log_index,
                    "Dropping event after repeated store failures: {:#}",
                    e
                );
                return false;
            }
        };

        // Replays still walk the movements; every write below is idempotent.
        if !movements.is_empty() {
            let timestamp = self.block_timestamp(log, position.block_number, timestamps).await;
            for movement in &movements {
                self.apply_movement(task, &position, timestamp, movement).await;
            }
        }

        inserted
    }

    /// Block time of `log`. `eth_getLogs` rarely carries it, so it is fetched
    /// at most once per block per scan.
    async fn block_timestamp(
        &self,
        log: &Log,
        block_number: u64,
        cache: &mut HashMap<u64, Option<u64>>,
    ) -> Option<u64> {
        if log.block_timestamp.is_some() {
            return log.block_timestamp;
        }
        if let Some(timestamp) = cache.get(&block_number) {
            return *timestamp;
        }

        let timestamp = match self.client.get_block_timestamp(block_number).await {
            Ok(timestamp) => Some(timestamp),
            Err(e) => {
                warn!(block = block_number, "Failed to fetch block timestamp: {}", e);
                None
            }
        };
        cache.insert(block_number, timestamp);
        timestamp
    }

    async fn apply_movement(
        &self,
        task: &Task,
        position: &LogPosition,
        timestamp: Option<u64>,
        movement: &TokenMovement,
    ) {
        let contract = task.contract;
        let token_id = nft_id(&contract, &movement.token_id);

        if let Err(e) = self.ensure_contract(task, movement).await {
            warn!(contract = ?contract, "Failed to store contract: {:#}", e);
        }
        if let Err(e) = self.ensure_token(task, movement).await {
            warn!(nft = %token_id, "Failed to store token: {:#}", e);
        }

        let transfer = Transfer {
            transaction_hash: position.transaction_hash,
            log_index: position.log_index,
            item_index: movement.item_index,
            nft_id: token_id.clone(),
            from_address: movement.from,
            to_address: movement.to,
            quantity: movement.quantity,
            block_number: position.block_number,
            timestamp,
        };
        if let Err(e) = self
            .write(move |conn| TransferRepository::new(conn).upsert(&transfer))
            .await
        {
            error!(
                nft = %token_id,
                tx = ?position.transaction_hash,
                "Dropping transfer after repeated store failures: {:#}",
                e
            );
        }

        let Ok(amount) = I256::try_from(movement.quantity) else {
            warn!(nft = %token_id, "Transfer quantity {} does not fit a balance", movement.quantity);
            return;
        };

        let legs = [
            (movement.from, -amount, Leg::Debit),
            (movement.to, amount, Leg::Credit),
        ];
        for (owner, delta, leg) in legs {
            let delta = OwnershipDelta {
                nft_id: token_id.clone(),
                owner,
                delta,
                transaction_hash: position.transaction_hash,
                log_index: position.log_index,
                item_index: movement.item_index,
                leg,
            };
            match self
                .write(move |conn| OwnershipRepository::new(conn).apply_delta(&delta))
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(nft = %token_id, owner = ?owner, "Ownership delta already applied"),
                Err(e) => error!(
                    nft = %token_id,
                    owner = ?owner,
                    "Dropping ownership delta after repeated store failures: {:#}",
                    e
                ),
            }
        }
    }

    async fn ensure_contract(&self, task: &Task, movement: &TokenMovement) -> Result<()> {
        let address = task.contract;
        if self
            .write(move |conn| ContractRepository::new(conn).get(&address))
            .await?
            .is_some()
        {
            return Ok(());
        }

        let contract = fetch_contract_metadata(&*self.client, address, movement.contract_type).await;
        self.write(move |conn| ContractRepository::new(conn).upsert(&contract))
            .await
    }

    async fn ensure_token(&self, task: &Task, movement: &TokenMovement) -> Result<()> {
        let id = nft_id(&task.contract, &movement.token_id);
        if self
            .write(move |conn| TokenRepository::new(conn).get(&id))
            .await?
            .is_some()
        {
            return Ok(());
        }

        let nft = fetch_token_metadata(
            &*self.client,
            task.contract,
            movement.token_id,
            movement.contract_type,
        )
        .await;
        self.write(move |conn| TokenRepository::new(conn).upsert(&nft))
            .await
    }

    /// Run a store operation on the blocking pool, retrying a bounded number
    /// of times.
    async fn write<T, F>(&self, op: F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let retries = self.config.store_write_attempts.saturating_sub(1);
        let strategy = FixedInterval::new(self.config.store_retry_delay).take(retries);
        let db = self.db.clone();
        let op = Arc::new(op);
        Retry::spawn(strategy, move || {
            let db = db.clone();
            let op = op.clone();
            async move {
                // Use spawn_blocking since database operations are blocking
                tokio::task::spawn_blocking(move || op(&db.conn()))
                    .await
                    .context("Store task failed")
                    .and_then(|result| result)
            }
        })
        .await
    }
}

impl<C: ChainClient> Collector for EventCollector<C> {
    fn scan<'a>(&'a self, task: &'a Task) -> ScanFuture<'a> {
        Box::pin(self.scan_range(task))
    }
}
