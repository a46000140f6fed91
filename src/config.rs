use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::collector::GENERIC_EVENT_COLLECTOR;

/// Per-scan settings shared by every collector.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub page_size: u64,
    pub store_write_attempts: usize,
    pub store_retry_delay: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            store_write_attempts: 3,
            store_retry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_collectors: usize,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_collectors: 100,
            poll_interval: Duration::from_secs(12),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub database_url: String,
    pub default_start_block: u64,
    pub collector: String,
    pub abi_path: PathBuf,
    pub addresses_path: PathBuf,
    pub scan: ScanConfig,
    pub pool: PoolConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let json_rpc_urls: Vec<String> = std::env::var("JSON_RPC_URLS")
            .or_else(|_| std::env::var("JSON_RPC_URL"))
            .context("JSON_RPC_URLS or JSON_RPC_URL must be set in .env")?
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS contains no endpoints");
        }

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:./indexer.db".to_string());

        let scan = ScanConfig {
            page_size: env_or("PAGE_SIZE", 1000)?,
            store_write_attempts: env_or("STORE_WRITE_ATTEMPTS", 3)?,
            ..ScanConfig::default()
        };
        if scan.page_size == 0 {
            anyhow::bail!("PAGE_SIZE must be at least 1");
        }

        let pool = PoolConfig {
            max_collectors: env_or("MAX_COLLECTORS", 100)?,
            poll_interval: Duration::from_secs(env_or("POLL_INTERVAL_SECS", 12)?),
            max_attempts: env_or("MAX_ATTEMPTS", 5)?,
            initial_backoff: Duration::from_millis(env_or("RETRY_INITIAL_MS", 500)?),
            max_backoff: Duration::from_millis(env_or("RETRY_MAX_MS", 60_000)?),
        };

        Ok(Config {
            json_rpc_urls,
            database_url,
            default_start_block: env_or("DEFAULT_START_BLOCK", 9_000_000)?,
            collector: std::env::var("COLLECTOR")
                .unwrap_or_else(|_| GENERIC_EVENT_COLLECTOR.to_string()),
            abi_path: std::env::var("ABI_PATH")
                .unwrap_or_else(|_| "abi/ERC721.json".to_string())
                .into(),
            addresses_path: std::env::var("ADDRESSES_PATH")
                .unwrap_or_else(|_| "addresses".to_string())
                .into(),
            scan,
            pool,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_falls_back_to_default() {
        let value: u64 = env_or("NFT_INDEXER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn defaults_match_documented_values() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_collectors, 100);
        assert_eq!(pool.max_attempts, 5);
        assert_eq!(ScanConfig::default().page_size, 1000);
    }
}
