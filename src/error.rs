//! Error types shared by the RPC client, the decoders and the collectors.

use std::time::Duration;
use thiserror::Error;

/// Failures talking to the chain RPC endpoint. All of them are transient from
/// the point of view of a scan: the task is retried with backoff.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by endpoint: {0}")]
    RateLimited(String),

    #[error("node error: {0}")]
    Node(String),
}

impl RpcError {
    /// Classify a provider error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
        {
            RpcError::RateLimited(message)
        } else {
            RpcError::Node(message)
        }
    }
}

/// A single log did not match the shape its decoder expects.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopics,

    #[error("unexpected event signature {0}")]
    UnknownSignature(String),

    #[error("log is missing {0}")]
    MissingField(&'static str),

    #[error("abi decoding failed: {0}")]
    Abi(String),

    #[error("batch transfer has {ids} ids but {values} values")]
    BatchLengthMismatch { ids: usize, values: usize },
}

/// Outcome of a failed scan, as seen by the worker pool.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    #[error("invalid task: {0}")]
    InvalidTask(String),
}

impl ScanError {
    /// Transient failures are retried with backoff; anything else drops the task.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::Rpc(_) | ScanError::Store(_))
    }
}
