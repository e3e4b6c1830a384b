//! Error taxonomy
//!
//! Faults are typed enums. Expected outcomes (rate limited, unprofitable
//! simulation, absent price) are tagged results elsewhere and never appear
//! here.

use ethers::providers::ProviderError;
use ethers::types::TxHash;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to a chain endpoint
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("provider error on {url}: {source}")]
    Provider {
        url: String,
        #[source]
        source: ProviderError,
    },

    #[error("{url} did not answer within {}ms", .after.as_millis())]
    Timeout { url: String, after: Duration },

    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("no endpoints configured for {chain}")]
    NoEndpoints { chain: String },

    #[error("all {endpoints} endpoints for {chain} exhausted, last error: {last}")]
    Exhausted {
        chain: String,
        endpoints: usize,
        last: Box<RpcError>,
    },
}

impl RpcError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Result of a call routed through a circuit breaker
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation
    #[error("circuit breaker `{name}` is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    /// The operation ran and failed
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

/// Failure on the trade path
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("simulation failed: {0}")]
    Simulation(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("confirmation failed for {hash:?}: {reason}")]
    Confirmation { hash: TxHash, reason: String },
}

/// Invalid or missing configuration, fatal at startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required config: {0}")]
    Missing(String),

    #[error("invalid pool address for {chain}: {address}")]
    InvalidPoolAddress { chain: String, address: String },

    #[error("{field} must be positive")]
    NotPositive { field: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
