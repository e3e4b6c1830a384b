//! Liveness monitoring
//!
//! Periodically checks every chain's RPC and pool, keeping the last few
//! results. Healthy means the last N checks found no issues.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::arbitrage::ChainLeg;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    pub issues: Vec<String>,
}

#[derive(Debug)]
pub struct HealthMonitor {
    legs: Vec<ChainLeg>,
    window: usize,
    started_at: DateTime<Utc>,
    history: RwLock<VecDeque<HealthStatus>>,
}

impl HealthMonitor {
    /// `window` is the number of recent checks considered, at least 1
    pub fn new(legs: Vec<ChainLeg>, window: usize) -> Self {
        let window = window.max(1);
        Self {
            legs,
            window,
            started_at: Utc::now(),
            history: RwLock::new(VecDeque::with_capacity(window)),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Run one check across all chains and record it
    pub async fn check(&self) -> HealthStatus {
        let mut issues = Vec::new();

        for leg in &self.legs {
            if let Err(e) = leg.provider.chain_id().await {
                issues.push(format!("{}: Health check failed: {}", leg.name(), e));
            }
            if leg.feed.refresh().await.is_none() {
                issues.push(format!("{}: pool reserves unavailable", leg.name()));
            }
        }

        let status = HealthStatus {
            healthy: issues.is_empty(),
            last_check: Utc::now(),
            issues,
        };

        if status.healthy {
            debug!("Health check passed");
        } else {
            warn!(issues = ?status.issues, "Health check found issues");
        }

        let mut history = self.history.write().await;
        if history.len() == self.window {
            history.pop_front();
        }
        history.push_back(status.clone());

        status
    }

    /// True when none of the last N checks had issues (or none ran yet)
    pub async fn is_healthy(&self) -> bool {
        self.history.read().await.iter().all(|s| s.healthy)
    }

    /// Latest status, or a clean one stamped at startup before the first check
    pub async fn status(&self) -> HealthStatus {
        match self.history.read().await.back() {
            Some(status) => status.clone(),
            None => HealthStatus {
                healthy: true,
                last_check: self.started_at,
                issues: Vec::new(),
            },
        }
    }

    pub async fn history(&self) -> Vec<HealthStatus> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Check every `interval` until the task is aborted
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CircuitBreakerConfig, RetryConfig};
    use crate::error::RpcError;
    use crate::pool::{PriceFeed, ReserveSource, Reserves};
    use crate::rpc::{ProviderFailover, RpcTransport};
    use async_trait::async_trait;
    use ethers::providers::ProviderError;
    use ethers::types::{Address, Bytes, TxHash, U256};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Answers `eth_chainId` while `up` is set
    struct Switchable {
        up: AtomicBool,
    }

    impl Switchable {
        fn outage(&self) -> RpcError {
            RpcError::Provider {
                url: self.url().to_string(),
                source: ProviderError::CustomError("502 Bad Gateway".to_string()),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for Switchable {
        fn url(&self) -> &str {
            "mock://switchable"
        }

        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, RpcError> {
            Err(self.outage())
        }

        async fn gas_price(&self) -> Result<U256, RpcError> {
            Err(self.outage())
        }

        async fn chain_id(&self) -> Result<U256, RpcError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(U256::one())
            } else {
                Err(self.outage())
            }
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<TxHash, RpcError> {
            Err(self.outage())
        }
    }

    struct Pool;

    #[async_trait]
    impl ReserveSource for Pool {
        async fn get_reserves(&self) -> Result<Reserves, RpcError> {
            Ok(Reserves {
                reserve_base: U256::from(10),
                reserve_quote: U256::from(11),
                block_timestamp_last: 0,
            })
        }
    }

    fn monitor(rpc: Arc<Switchable>, window: usize) -> HealthMonitor {
        let provider = ProviderFailover::new(
            "ethereum",
            vec![rpc as Arc<dyn RpcTransport>],
            RetryConfig::default().with_attempts(1),
        )
        .unwrap();
        let feed = PriceFeed::new("ethereum", Arc::new(Pool), CircuitBreakerConfig::default());
        let leg = ChainLeg {
            feed: Arc::new(feed),
            provider: Arc::new(provider),
            max_gas_price_wei: U256::zero(),
        };
        HealthMonitor::new(vec![leg], window)
    }

    #[tokio::test]
    async fn test_healthy_before_first_check() {
        let monitor = monitor(Arc::new(Switchable { up: AtomicBool::new(true) }), 3);
        assert!(monitor.is_healthy().await);
        assert!(monitor.status().await.issues.is_empty());
    }

    #[tokio::test]
    async fn test_issue_stays_until_window_passes() {
        let rpc = Arc::new(Switchable {
            up: AtomicBool::new(false),
        });
        let monitor = monitor(rpc.clone(), 2);

        let status = monitor.check().await;
        assert!(!status.healthy);
        assert!(status.issues[0].contains("Health check failed"));
        assert!(!monitor.is_healthy().await);

        rpc.up.store(true, Ordering::SeqCst);
        assert!(monitor.check().await.healthy);
        // Failed check is still inside the window
        assert!(!monitor.is_healthy().await);

        monitor.check().await;
        assert!(monitor.is_healthy().await);
        assert_eq!(monitor.history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_checks_periodically() {
        let monitor = Arc::new(monitor(
            Arc::new(Switchable {
                up: AtomicBool::new(true),
            }),
            3,
        ));
        let handle = monitor.spawn(Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.abort();

        assert_eq!(monitor.history().await.len(), 3);
        assert!(monitor.is_healthy().await);
    }

    #[test]
    fn test_status_serializes() {
        let status = HealthStatus {
            healthy: false,
            last_check: Utc::now(),
            issues: vec!["blast: pool reserves unavailable".to_string()],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["healthy"], false);
        assert_eq!(json["issues"][0], "blast: pool reserves unavailable");
    }
}
