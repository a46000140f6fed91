use crate::error::RpcError;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy::sol;
use alloy_primitives::{Address, B256, FixedBytes, U256};
use regex::Regex;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

sol! {
    #[sol(rpc)]
    interface IERC165 {
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
    }

    #[sol(rpc)]
    interface IERC721Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function tokenURI(uint256 tokenId) external view returns (string);
    }

    #[sol(rpc)]
    interface IERC1155MetadataURI {
        function uri(uint256 id) external view returns (string);
    }
}

/// What the collectors need from a chain node.
///
/// Log and head queries report failures so the scan can be retried; metadata
/// reads are best effort and collapse failures into `None`/`false`.
pub trait ChainClient: Send + Sync + 'static {
    fn get_chain_head(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// Logs of `contract` with first topic `topic0` in `[from_block, to_block]`,
    /// in chain order.
    fn get_logs(
        &self,
        contract: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>, RpcError>> + Send;

    /// Unix time of block `block_number`.
    fn get_block_timestamp(
        &self,
        block_number: u64,
    ) -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn supports_interface(
        &self,
        contract: Address,
        interface_id: FixedBytes<4>,
    ) -> impl Future<Output = bool> + Send;

    fn name(&self, contract: Address) -> impl Future<Output = Option<String>> + Send;

    fn symbol(&self, contract: Address) -> impl Future<Output = Option<String>> + Send;

    /// ERC721 `tokenURI`.
    fn token_uri(
        &self,
        contract: Address,
        token_id: U256,
    ) -> impl Future<Output = Option<String>> + Send;

    /// ERC1155 `uri`.
    fn uri(&self, contract: Address, token_id: U256) -> impl Future<Output = Option<String>> + Send;
}

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], max_retries: usize) -> anyhow::Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) -> RpcError {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
        RpcError::from_message(error_str)
    }

    fn handle_timeout(&self) -> RpcError {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            current_url
        );
        self.rotate_provider();
        RpcError::Timeout(REQUEST_TIMEOUT)
    }

    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>, RpcError> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let filter = Filter::new()
                    .address(contract_address)
                    .event_signature(topic0)
                    .from_block(from_block)
                    .to_block(to_block);

                match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();

                        if error_str.contains("exceeds max results") {
                            debug!(
                                "Max results exceeded for blocks {}-{}, will split range",
                                from_block, to_block
                            );
                            // hack since we don't want to retry on this specific error
                            Ok(Err(RpcError::Node(error_str)))
                        } else {
                            Err(client.handle_error(&error_str))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    async fn call_with_timeout<T, E, F>(&self, what: &str, contract: Address, call: F) -> Option<T>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                debug!(contract = ?contract, "{} call failed: {}", what, e);
                None
            }
            Err(_) => {
                debug!(contract = ?contract, "{} call timed out", what);
                None
            }
        }
    }
}

impl ChainClient for RpcClient {
    async fn get_chain_head(&self) -> Result<u64, RpcError> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => Err(client.handle_error(&e.to_string())),
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    async fn get_logs(
        &self,
        contract_address: Address,
        topic0: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self
                .get_logs_internal(current_from, to_block, contract_address, topic0)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) => {
                    let error_str = e.to_string();

                    let Some((suggested_from, suggested_to)) = error_str
                        .contains("exceeds max results")
                        .then(|| Self::parse_max_results_error(&error_str))
                        .flatten()
                    else {
                        return Err(e);
                    };

                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, to_block, suggested_to
                    );

                    let logs = self
                        .get_logs_internal(suggested_from, suggested_to, contract_address, topic0)
                        .await?;

                    all_logs.extend(logs);
                    current_from = suggested_to + 1;
                }
            }
        }

        // Providers return chain order already; sorting keeps ownership deltas
        // in block order even when a split range came back out of order.
        all_logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(all_logs)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, RpcError> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(
                    REQUEST_TIMEOUT,
                    provider.get_block_by_number(BlockNumberOrTag::Number(block_number)),
                )
                .await
                {
                    Ok(Ok(Some(block))) => Ok(block.header.timestamp),
                    Ok(Ok(None)) => Err(RpcError::Node(format!("block {block_number} not found"))),
                    Ok(Err(e)) => Err(client.handle_error(&e.to_string())),
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    async fn supports_interface(&self, contract: Address, interface_id: FixedBytes<4>) -> bool {
        let instance = IERC165::new(contract, self.get_provider().clone());
        self.call_with_timeout(
            "supportsInterface",
            contract,
            instance.supportsInterface(interface_id).call(),
        )
        .await
        .unwrap_or(false)
    }

    async fn name(&self, contract: Address) -> Option<String> {
        let instance = IERC721Metadata::new(contract, self.get_provider().clone());
        self.call_with_timeout("name", contract, instance.name().call())
            .await
    }

    async fn symbol(&self, contract: Address) -> Option<String> {
        let instance = IERC721Metadata::new(contract, self.get_provider().clone());
        self.call_with_timeout("symbol", contract, instance.symbol().call())
            .await
    }

    async fn token_uri(&self, contract: Address, token_id: U256) -> Option<String> {
        let instance = IERC721Metadata::new(contract, self.get_provider().clone());
        self.call_with_timeout("tokenURI", contract, instance.tokenURI(token_id).call())
            .await
    }

    async fn uri(&self, contract: Address, token_id: U256) -> Option<String> {
        let instance = IERC1155MetadataURI::new(contract, self.get_provider().clone());
        self.call_with_timeout("uri", contract, instance.uri(token_id).call())
            .await
    }
}
