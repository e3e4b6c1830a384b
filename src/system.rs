//! Wiring: builds chain clients, feeds, the coordinator and the health
//! monitor from a [`Config`], and owns their background tasks.

use anyhow::{Context, Result};
use ethers::types::Address;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::arbitrage::{ChainLeg, ExecutionCoordinator, TradeExecutor};
use crate::common::RateLimiter;
use crate::config::{ChainConfig, Config};
use crate::health::HealthMonitor;
use crate::metrics::Metrics;
use crate::pool::{ws_url_from_rpc, PairContract, PriceFeed, SubscriptionConfig, SubscriptionHandle};
use crate::rpc::ProviderFailover;

pub struct ArbitrageSystem {
    config: Config,
    coordinator: Arc<ExecutionCoordinator>,
    health: Arc<HealthMonitor>,
    metrics: Arc<Metrics>,
    pools: [Address; 2],
    subscriptions: Vec<SubscriptionHandle>,
    health_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ArbitrageSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArbitrageSystem")
            .field("chain_a", &self.config.chain_a.name)
            .field("chain_b", &self.config.chain_b.name)
            .field("pending", &self.coordinator.pending())
            .field("subscriptions", &self.subscriptions.len())
            .field("health_task", &self.health_task.is_some())
            .finish()
    }
}

impl ArbitrageSystem {
    /// Build everything; no network traffic happens until the first call.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(config: Config, executor: Arc<dyn TradeExecutor>) -> Result<Self> {
        let pools = [config.chain_a.pool()?, config.chain_b.pool()?];
        let chain_a = build_leg(&config, &config.chain_a, pools[0])?;
        let chain_b = build_leg(&config, &config.chain_b, pools[1])?;

        let metrics = Arc::new(Metrics::new());
        let health = Arc::new(HealthMonitor::new(
            vec![chain_a.clone(), chain_b.clone()],
            config.health.window,
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            config.coordinator(),
            chain_a,
            chain_b,
            RateLimiter::new(config.limiter()),
            executor,
            config.breaker(),
            Arc::clone(&metrics),
        ));

        Ok(Self {
            config,
            coordinator,
            health,
            metrics,
            pools,
            subscriptions: Vec::new(),
            health_task: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Start swap subscriptions (if enabled) and the periodic health check
    pub fn start_background(&mut self) {
        if self.config.websocket.enabled {
            let legs = [
                (self.coordinator.chain_a(), &self.config.chain_a, self.pools[0]),
                (self.coordinator.chain_b(), &self.config.chain_b, self.pools[1]),
            ];
            for (leg, chain, pool_address) in legs {
                let subscription = SubscriptionConfig {
                    ws_url: chain
                        .ws_url
                        .clone()
                        .unwrap_or_else(|| ws_url_from_rpc(&chain.rpc_url)),
                    pool_address,
                    reconnect_delay: self.config.reconnect_delay(),
                    request_timeout: self.config.rpc_timeout(),
                    keepalive_interval: self.config.keepalive_interval(),
                };
                self.subscriptions
                    .push(leg.feed.start_subscription(subscription));
            }
        }

        let interval = Duration::from_millis(self.config.health.interval_ms);
        self.health_task = Some(self.health.spawn(interval));
        info!(
            subscriptions = self.subscriptions.len(),
            health_interval_ms = self.config.health.interval_ms,
            "Background tasks started"
        );
    }

    /// Stop background tasks and drain the execution queue
    pub async fn shutdown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.abort();
        }
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
        self.coordinator.shutdown().await;
    }
}

fn build_leg(config: &Config, chain: &ChainConfig, pool: Address) -> Result<ChainLeg> {
    let provider = Arc::new(
        ProviderFailover::from_urls(
            chain.name.as_str(),
            &chain.rpc_url,
            &chain.backup_rpcs,
            config.retry_policy(),
            config.rpc_timeout(),
        )
        .with_context(|| format!("Failed to create {} providers", chain.name))?,
    );
    let pair = PairContract::new(pool, Arc::clone(&provider));
    let feed = PriceFeed::new(chain.name.as_str(), Arc::new(pair), config.breaker());

    info!(
        chain = provider.chain(),
        primary = provider.primary_url(),
        endpoints = provider.endpoint_count(),
        pool = ?pool,
        "Chain configured"
    );

    Ok(ChainLeg {
        feed: Arc::new(feed),
        provider,
        max_gas_price_wei: chain.max_gas_price_wei(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{PaperExecutor, TradeSettings};
    use crate::error::{ConfigError, RpcError};
    use ethers::types::U256;

    const POOL: &str = "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc";

    fn config() -> Config {
        let mut config = Config::default();
        config.chain_a.rpc_url = "http://127.0.0.1:1".to_string();
        config.chain_a.backup_rpcs = vec!["http://127.0.0.1:2".to_string()];
        config.chain_a.pool_address = POOL.to_string();
        config.chain_b.rpc_url = "http://127.0.0.1:3".to_string();
        config.chain_b.pool_address = POOL.to_string();
        config.websocket.enabled = false;
        config
    }

    fn paper() -> Arc<PaperExecutor> {
        Arc::new(PaperExecutor::new(TradeSettings::default()))
    }

    #[tokio::test]
    async fn test_build_wires_both_chains() {
        let system = ArbitrageSystem::build(config(), paper()).unwrap();
        let coordinator = system.coordinator();

        assert_eq!(coordinator.chain_a().name(), "ethereum");
        assert_eq!(coordinator.chain_b().name(), "blast");
        assert_eq!(coordinator.chain_a().provider.endpoint_count(), 2);
        assert_eq!(
            coordinator.chain_b().max_gas_price_wei,
            U256::from(50_000_000_000u64)
        );
        assert!(system.health().is_healthy().await);
    }

    #[tokio::test]
    async fn test_build_without_endpoint_fails() {
        let mut config = config();
        config.chain_b.rpc_url.clear();
        let err = ArbitrageSystem::build(config, paper()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RpcError>(),
            Some(RpcError::NoEndpoints { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_with_bad_pool_address_fails() {
        let mut config = config();
        config.chain_a.pool_address = "0x1234".to_string();
        let err = ArbitrageSystem::build(config, paper()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidPoolAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_debug_names_chains() {
        let system = ArbitrageSystem::build(config(), paper()).unwrap();
        let rendered = format!("{:?}", system);
        assert!(rendered.contains("ArbitrageSystem"));
        assert!(rendered.contains("\"ethereum\""));
        assert!(rendered.contains("subscriptions: 0"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_background_tasks() {
        let mut system =
            ArbitrageSystem::build(config(), paper()).unwrap();
        system.start_background();
        system.shutdown().await;
        assert_eq!(system.coordinator().pending(), 0);
    }
}
