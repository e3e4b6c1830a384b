//! Provider failover
//!
//! Presents a primary endpoint plus ordered backups as one client. Every
//! call starts at the primary, is retried on the same endpoint under the
//! backoff schedule, and only then moves to the next endpoint with a fresh
//! retry budget. The first endpoint to answer wins; answers are not
//! cross-checked between endpoints.

use ethers::types::{Address, Bytes, TxHash, U256};
use ethers::utils::format_units;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::transport::{HttpTransport, RpcTransport};
use crate::common::{retry_with_backoff, RetryConfig};
use crate::error::RpcError;

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Convert a configured gwei amount to wei, exactly.
///
/// Sub-wei fractions are dropped; negative amounts map to zero.
pub fn gwei_to_wei(gwei: Decimal) -> U256 {
    gwei.checked_mul(Decimal::from(WEI_PER_GWEI))
        .and_then(|wei| wei.trunc().to_u128())
        .map(U256::from)
        .unwrap_or_default()
}

/// Convert wei to gwei for display and gauges
pub fn wei_to_gwei(wei: U256) -> f64 {
    format_units(wei, "gwei")
        .ok()
        .and_then(|gwei| gwei.parse().ok())
        .unwrap_or(f64::NAN)
}

/// Gas price observed on a chain against that chain's cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasCheck {
    pub price: U256,
    pub max: U256,
}

impl GasCheck {
    /// `price <= max`; a chain sitting exactly at its cap is acceptable
    pub fn is_acceptable(&self) -> bool {
        self.price <= self.max
    }
}

/// One chain's endpoints behind first-healthy-wins routing
pub struct ProviderFailover {
    chain: String,
    endpoints: Vec<Arc<dyn RpcTransport>>,
    retry: RetryConfig,
}

impl std::fmt::Debug for ProviderFailover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFailover")
            .field("chain", &self.chain)
            .field(
                "endpoints",
                &self.endpoints.iter().map(|e| e.url()).collect::<Vec<_>>(),
            )
            .field("retry", &self.retry)
            .finish()
    }
}

impl ProviderFailover {
    /// Build from explicit transports; the first one is the primary
    pub fn new(
        chain: impl Into<String>,
        endpoints: Vec<Arc<dyn RpcTransport>>,
        retry: RetryConfig,
    ) -> Result<Self, RpcError> {
        let chain = chain.into();
        if endpoints.is_empty() {
            return Err(RpcError::NoEndpoints { chain });
        }
        Ok(Self {
            chain,
            endpoints,
            retry,
        })
    }

    /// Build HTTP transports for a primary url and its backups
    pub fn from_urls(
        chain: impl Into<String>,
        primary: &str,
        backups: &[String],
        retry: RetryConfig,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let endpoints = std::iter::once(primary)
            .chain(backups.iter().map(String::as_str))
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                HttpTransport::new(url.trim(), timeout)
                    .map(|t| Arc::new(t) as Arc<dyn RpcTransport>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(chain, endpoints, retry)
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn primary_url(&self) -> &str {
        self.endpoints[0].url()
    }

    /// Read-only contract call (quorum of one)
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.route("eth_call", |endpoint| {
            let data = data.clone();
            async move { endpoint.call(to, data).await }
        })
        .await
    }

    /// Broadcast a signed raw transaction, returning its hash.
    ///
    /// Rebroadcasting the same signed payload to another endpoint is
    /// idempotent, so writes use the same routing as reads.
    pub async fn submit(&self, signed_tx: Bytes) -> Result<TxHash, RpcError> {
        self.route("eth_sendRawTransaction", |endpoint| {
            let raw = signed_tx.clone();
            async move { endpoint.send_raw_transaction(raw).await }
        })
        .await
    }

    /// Current gas price in wei
    pub async fn gas_price(&self) -> Result<U256, RpcError> {
        self.route("eth_gasPrice", |endpoint| async move {
            endpoint.gas_price().await
        })
        .await
    }

    /// Pre-submission gate: fetch the gas price and hold it against the cap
    pub async fn check_gas_price(&self, max_gas_price: U256) -> Result<GasCheck, RpcError> {
        Ok(GasCheck {
            price: self.gas_price().await?,
            max: max_gas_price,
        })
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let id = self
            .route("eth_chainId", |endpoint| async move {
                endpoint.chain_id().await
            })
            .await?;
        if id > U256::from(u64::MAX) {
            return Err(RpcError::malformed(format!("chain id out of range: {}", id)));
        }
        Ok(id.as_u64())
    }

    async fn route<T, F, Fut>(&self, method: &str, request: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut last_error = None;

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let label = format!("{} {} via {}", self.chain, method, endpoint.url());
            let result =
                retry_with_backoff(&self.retry, &label, |_| request(Arc::clone(endpoint))).await;

            match result {
                Ok(value) => {
                    if index > 0 {
                        debug!(
                            chain = %self.chain,
                            endpoint = endpoint.url(),
                            "Served by backup endpoint"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        chain = %self.chain,
                        endpoint = endpoint.url(),
                        "Endpoint exhausted its retry budget: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(RpcError::Exhausted {
            chain: self.chain.clone(),
            endpoints: self.endpoints.len(),
            last: Box::new(
                last_error.unwrap_or_else(|| RpcError::NoEndpoints {
                    chain: self.chain.clone(),
                }),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers::providers::ProviderError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers every method
    struct FlakyTransport {
        url: String,
        failures: u32,
        gas_wei: U256,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(url: &str, failures: u32, gas_wei: u64) -> Arc<Self> {
            Arc::new(Self {
                url: url.to_string(),
                failures,
                gas_wei: U256::from(gas_wei),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn attempt(&self) -> Result<(), RpcError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(RpcError::Provider {
                    url: self.url.clone(),
                    source: ProviderError::CustomError("503 Service Unavailable".to_string()),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RpcTransport for FlakyTransport {
        fn url(&self) -> &str {
            &self.url
        }

        async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, RpcError> {
            self.attempt()?;
            Ok(data)
        }

        async fn gas_price(&self) -> Result<U256, RpcError> {
            self.attempt()?;
            Ok(self.gas_wei)
        }

        async fn chain_id(&self) -> Result<U256, RpcError> {
            self.attempt()?;
            Ok(U256::one())
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, RpcError> {
            self.attempt()?;
            Ok(TxHash::from(ethers::utils::keccak256(&raw)))
        }
    }

    fn endpoints(transports: &[&Arc<FlakyTransport>]) -> Vec<Arc<dyn RpcTransport>> {
        transports
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn RpcTransport>)
            .collect()
    }

    fn retry(attempts: u32) -> RetryConfig {
        RetryConfig::default()
            .with_attempts(attempts)
            .with_backoff(Duration::from_millis(100), Duration::from_millis(1_000), 2.0)
    }

    #[test]
    fn test_construction_requires_endpoints() {
        let err = ProviderFailover::new("ethereum", vec![], RetryConfig::default()).unwrap_err();
        assert!(matches!(err, RpcError::NoEndpoints { .. }));

        let err = ProviderFailover::from_urls(
            "ethereum",
            "",
            &[],
            RetryConfig::default(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::NoEndpoints { .. }));
    }

    #[test]
    fn test_from_urls_orders_primary_first() {
        let failover = ProviderFailover::from_urls(
            "blast",
            "http://primary",
            &["http://backup-1".to_string(), " ".to_string()],
            RetryConfig::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(failover.endpoint_count(), 2);
        assert_eq!(failover.primary_url(), "http://primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_retried_before_failover() {
        let primary = FlakyTransport::new("http://primary", 2, 1);
        let backup = FlakyTransport::new("http://backup", 0, 2);
        let failover = ProviderFailover::new(
            "ethereum",
            endpoints(&[&primary, &backup]),
            retry(3),
        )
        .unwrap();

        assert_eq!(failover.gas_price().await.unwrap(), U256::from(1));
        assert_eq!(primary.calls(), 3);
        assert_eq!(backup.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advances_to_backup_after_budget() {
        let primary = FlakyTransport::new("http://primary", u32::MAX, 1);
        let backup = FlakyTransport::new("http://backup", 1, 2);
        let failover = ProviderFailover::new(
            "ethereum",
            endpoints(&[&primary, &backup]),
            retry(3),
        )
        .unwrap();

        assert_eq!(failover.gas_price().await.unwrap(), U256::from(2));
        assert_eq!(primary.calls(), 3);
        assert_eq!(backup.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_endpoints_exhausted() {
        let primary = FlakyTransport::new("http://primary", u32::MAX, 1);
        let backup = FlakyTransport::new("http://backup", u32::MAX, 1);
        let failover =
            ProviderFailover::new("blast", endpoints(&[&primary, &backup]), retry(2))
                .unwrap();

        let err = failover
            .call(Address::zero(), Bytes::from(vec![0x09, 0x02, 0xf1, 0xac]))
            .await
            .unwrap_err();
        match err {
            RpcError::Exhausted {
                chain,
                endpoints,
                last,
            } => {
                assert_eq!(chain, "blast");
                assert_eq!(endpoints, 2);
                assert!(matches!(*last, RpcError::Provider { ref url, .. } if url == "http://backup"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(primary.calls(), 2);
        assert_eq!(backup.calls(), 2);
    }

    #[tokio::test]
    async fn test_gas_price_gate() {
        let transport = FlakyTransport::new("http://primary", 0, 30_000_000_000);
        let failover =
            ProviderFailover::new("ethereum", endpoints(&[&transport]), retry(1)).unwrap();

        let check = failover.check_gas_price(gwei_to_wei(dec!(30))).await.unwrap();
        assert_eq!(check.price, U256::from(30_000_000_000u64));
        assert!(check.is_acceptable());

        let check = failover.check_gas_price(gwei_to_wei(dec!(29.9))).await.unwrap();
        assert!(!check.is_acceptable());
    }

    #[tokio::test]
    async fn test_gas_price_at_fractional_cap_is_acceptable() {
        // 33.3 gwei reported, 33.3 gwei configured
        let transport = FlakyTransport::new("http://primary", 0, 33_300_000_000);
        let failover =
            ProviderFailover::new("ethereum", endpoints(&[&transport]), retry(1)).unwrap();

        let check = failover.check_gas_price(gwei_to_wei(dec!(33.3))).await.unwrap();
        assert_eq!(check.max, check.price);
        assert!(check.is_acceptable());
    }

    #[tokio::test]
    async fn test_submit_returns_hash() {
        let transport = FlakyTransport::new("http://primary", 0, 1);
        let failover =
            ProviderFailover::new("ethereum", endpoints(&[&transport]), retry(1)).unwrap();

        let raw = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let hash = failover.submit(raw.clone()).await.unwrap();
        assert_eq!(hash, TxHash::from(ethers::utils::keccak256(&raw)));
        assert_eq!(failover.chain_id().await.unwrap(), 1);
    }

    #[test]
    fn test_gwei_conversion() {
        assert_eq!(gwei_to_wei(dec!(100)), U256::from(100_000_000_000u64));
        assert_eq!(gwei_to_wei(dec!(33.3)), U256::from(33_300_000_000u64));
        assert_eq!(gwei_to_wei(dec!(0.0000000015)), U256::from(1));
        assert_eq!(gwei_to_wei(dec!(-1)), U256::zero());
        approx::assert_relative_eq!(wei_to_gwei(U256::from(1_500_000_000u64)), 1.5);
    }
}
