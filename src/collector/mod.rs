//! Collectors turn a [`Task`] into one bounded, persisted scan.

mod event;

pub use event::EventCollector;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::events::DecodeStrategy;
use crate::repository::Database;
use crate::rpc::ChainClient;
use crate::task::Task;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

pub const GENERIC_EVENT_COLLECTOR: &str = "GenericEventCollector";
pub const NFT_TRANSFER_COLLECTOR: &str = "NftTransferCollector";

/// Decoding strategy behind a registered collector name.
pub fn decode_strategy(collector: &str) -> Option<DecodeStrategy> {
    match collector {
        GENERIC_EVENT_COLLECTOR => Some(DecodeStrategy::Abi),
        NFT_TRANSFER_COLLECTOR => Some(DecodeStrategy::NftTransfer),
        _ => None,
    }
}

/// Result of a successful scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Logs stored during this scan.
    pub persisted: usize,
    /// Continuation for the same key.
    pub next: Task,
    /// The scanned range reached the chain head; poll again later.
    pub caught_up: bool,
}

pub type ScanFuture<'a> = BoxFuture<'a, Result<ScanOutcome, ScanError>>;

pub trait Collector: Send + Sync {
    fn scan<'a>(&'a self, task: &'a Task) -> ScanFuture<'a>;
}

/// Name → collector map, built once at startup and shared with the pool.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: HashMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collector(mut self, name: impl Into<String>, collector: Arc<dyn Collector>) -> Self {
        self.collectors.insert(name.into(), collector);
        self
    }

    /// The two event collectors backed by `client` and `db`.
    pub fn standard<C: ChainClient>(client: Arc<C>, db: Database, config: ScanConfig) -> Self {
        let generic = EventCollector::new(client.clone(), db.clone(), DecodeStrategy::Abi, config.clone());
        let transfers = EventCollector::new(client, db, DecodeStrategy::NftTransfer, config);

        Self::new()
            .with_collector(GENERIC_EVENT_COLLECTOR, Arc::new(generic))
            .with_collector(NFT_TRANSFER_COLLECTOR, Arc::new(transfers))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collectors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
