//! Configuration management
//!
//! Loads a JSON configuration file, then applies environment overrides
//! (a `.env` file is honoured) for endpoints, pool addresses and limits.
//! The file is merged key by key over the defaults, so it only needs the
//! values that differ. Only endpoints and pool addresses are mandatory.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::arbitrage::{CoordinatorConfig, TradeSettings};
use crate::common::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::error::ConfigError;
use crate::rpc::gwei_to_wei;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    pub arbitrage: ArbitrageConfig,
    pub circuit_breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub websocket: WebSocketSettings,
    pub health: HealthSettings,
    pub rpc: RpcSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chain_a: ChainConfig::named("ethereum", dec!(100)),
            chain_b: ChainConfig::named("blast", dec!(50)),
            arbitrage: ArbitrageConfig::default(),
            circuit_breaker: BreakerSettings::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            websocket: WebSocketSettings::default(),
            health: HealthSettings::default(),
            rpc: RpcSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Config::from_json(&contents)?;

        dotenv::dotenv().ok();
        config
            .apply_env_overrides(|key| std::env::var(key).ok())
            .context("Invalid environment override")?;

        Ok(config)
    }

    /// Parse JSON merged over the defaults
    pub fn from_json(contents: &str) -> Result<Self> {
        let overlay: Value =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;
        let mut merged =
            serde_json::to_value(Config::default()).context("Failed to serialize defaults")?;
        merge_json(&mut merged, overlay);
        serde_json::from_value(merged).context("Invalid config structure")
    }

    /// Apply overrides from any key lookup (the process environment in
    /// production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.chain_a.apply_env_overrides("ETH", &lookup)?;
        self.chain_b.apply_env_overrides("BLAST", &lookup)?;

        if let Some(v) = parse_env(&lookup, "MIN_PROFIT_THRESHOLD")? {
            self.arbitrage.min_profit_threshold = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_POSITION_SIZE")? {
            self.arbitrage.max_position_size = v;
        }
        if let Some(v) = parse_env(&lookup, "MIN_EXECUTION_INTERVAL")? {
            self.arbitrage.min_execution_interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "RATE_LIMIT_MAX")? {
            self.rate_limit.max_points = v;
        }
        if let Some(v) = parse_env(&lookup, "RATE_LIMIT_WINDOW")? {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_FAILURES")? {
            self.circuit_breaker.max_failures = v;
        }
        if let Some(v) = parse_env(&lookup, "RESET_TIMEOUT")? {
            self.circuit_breaker.reset_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "RETRY_ATTEMPTS")? {
            self.retry.attempts = v;
        }
        if let Some(v) = parse_env(&lookup, "WS_RECONNECT_INTERVAL")? {
            self.websocket.reconnect_interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "WS_KEEPALIVE_INTERVAL")? {
            self.websocket.keepalive_interval_ms = v;
        }
        Ok(())
    }

    /// Startup validation; any error here is fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chain_a.validate("chain_a")?;
        self.chain_b.validate("chain_b")?;

        if !(self.arbitrage.min_profit_threshold > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "arbitrage.min_profit_threshold".to_string(),
            });
        }
        if !(self.arbitrage.max_position_size > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "arbitrage.max_position_size".to_string(),
            });
        }
        if self.arbitrage.min_position_size > self.arbitrage.max_position_size {
            return Err(ConfigError::Invalid {
                field: "arbitrage.min_position_size".to_string(),
                reason: "exceeds max_position_size".to_string(),
            });
        }
        if self.arbitrage.gas_limit == 0 {
            return Err(ConfigError::NotPositive {
                field: "arbitrage.gas_limit".to_string(),
            });
        }
        if self.arbitrage.slippage_tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "arbitrage.slippage_tolerance".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        if self.websocket.keepalive_interval_ms == 0 {
            return Err(ConfigError::NotPositive {
                field: "websocket.keepalive_interval_ms".to_string(),
            });
        }
        if self.circuit_breaker.max_failures == 0 {
            return Err(ConfigError::NotPositive {
                field: "circuit_breaker.max_failures".to_string(),
            });
        }
        if self.rate_limit.max_points == 0 {
            return Err(ConfigError::NotPositive {
                field: "rate_limit.max_points".to_string(),
            });
        }
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::NotPositive {
                field: "rate_limit.window_ms".to_string(),
            });
        }
        if !(self.retry.backoff_factor >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_factor".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.backoff_min_ms > self.retry.backoff_max_ms {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_min_ms".to_string(),
                reason: "exceeds backoff_max_ms".to_string(),
            });
        }
        Ok(())
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            min_profit_threshold_pct: self.arbitrage.min_profit_threshold,
            min_execution_interval: Duration::from_millis(self.arbitrage.min_execution_interval_ms),
            confirmations: self.chain_a.confirmations.max(self.chain_b.confirmations),
        }
    }

    /// Sizing and slippage handed to the trade executor
    pub fn trade_settings(&self) -> TradeSettings {
        TradeSettings {
            position_size: self.arbitrage.max_position_size,
            min_position_size: self.arbitrage.min_position_size,
            gas_limit: self.arbitrage.gas_limit,
            slippage_tolerance_pct: self.arbitrage.slippage_tolerance,
        }
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_max_failures(self.circuit_breaker.max_failures)
            .with_reset_timeout(Duration::from_millis(self.circuit_breaker.reset_timeout_ms))
    }

    pub fn limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig::default()
            .with_max_points(self.rate_limit.max_points)
            .with_window(Duration::from_millis(self.rate_limit.window_ms))
    }

    pub fn retry_policy(&self) -> RetryConfig {
        RetryConfig::default()
            .with_attempts(self.retry.attempts)
            .with_backoff(
                Duration::from_millis(self.retry.backoff_min_ms),
                Duration::from_millis(self.retry.backoff_max_ms),
                self.retry.backoff_factor,
            )
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.websocket.reconnect_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.websocket.keepalive_interval_ms)
    }
}

/// One chain: endpoints, pool and gas cap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url: String,
    pub backup_rpcs: Vec<String>,
    /// Derived from `rpc_url` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    pub pool_address: String,
    /// Exact decimal gwei; converted to wei without rounding through floats
    pub max_gas_price_gwei: Decimal,
    pub confirmations: u32,
}

impl ChainConfig {
    fn named(name: &str, max_gas_price_gwei: Decimal) -> Self {
        ChainConfig {
            name: name.to_string(),
            rpc_url: String::new(),
            backup_rpcs: Vec::new(),
            ws_url: None,
            pool_address: String::new(),
            max_gas_price_gwei,
            confirmations: 2,
        }
    }

    pub fn max_gas_price_wei(&self) -> U256 {
        gwei_to_wei(self.max_gas_price_gwei)
    }

    pub fn pool(&self) -> Result<Address, ConfigError> {
        parse_address(&self.pool_address).ok_or_else(|| ConfigError::InvalidPoolAddress {
            chain: self.name.clone(),
            address: self.pool_address.clone(),
        })
    }

    fn apply_env_overrides<F>(&mut self, prefix: &str, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(&format!("{}_RPC_URL", prefix)) {
            self.rpc_url = url;
        }
        if let Some(list) = lookup(&format!("{}_BACKUP_RPCS", prefix)) {
            self.backup_rpcs = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(url) = lookup(&format!("{}_WS_URL", prefix)) {
            self.ws_url = Some(url);
        }
        if let Some(address) = lookup(&format!("{}_POOL_ADDRESS", prefix)) {
            self.pool_address = address;
        }
        if let Some(gwei) = parse_env(lookup, &format!("{}_MAX_GAS_PRICE", prefix))? {
            self.max_gas_price_gwei = gwei;
        }
        Ok(())
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing(format!("{}.rpc_url", section)));
        }
        if self.pool_address.trim().is_empty() {
            return Err(ConfigError::Missing(format!("{}.pool_address", section)));
        }
        self.pool()?;
        if self.max_gas_price_gwei <= Decimal::ZERO {
            return Err(ConfigError::NotPositive {
                field: format!("{}.max_gas_price_gwei", section),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrageConfig {
    /// Percent
    pub min_profit_threshold: f64,
    pub max_position_size: f64,
    pub min_position_size: f64,
    pub gas_limit: u64,
    /// Percent
    pub slippage_tolerance: f64,
    pub min_execution_interval_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        ArbitrageConfig {
            min_profit_threshold: 0.5,
            max_position_size: 1.0,
            min_position_size: 0.01,
            gas_limit: 300_000,
            slippage_tolerance: 1.0,
            min_execution_interval_ms: 5_000,
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub max_failures: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            max_failures: 3,
            reset_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_points: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            max_points: 100,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total tries per endpoint
    pub attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            attempts: 3,
            backoff_min_ms: 1_000,
            backoff_max_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    pub enabled: bool,
    pub reconnect_interval_ms: u64,
    /// Period of the `eth_blockNumber` liveness request on an open socket
    pub keepalive_interval_ms: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        WebSocketSettings {
            enabled: true,
            reconnect_interval_ms: 5_000,
            keepalive_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_ms: u64,
    /// Number of recent checks that must all be clean
    pub window: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        HealthSettings {
            interval_ms: 30_000,
            window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub timeout_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        RpcSettings { timeout_ms: 10_000 }
    }
}

/// Recursively overlay `overlay` onto `base`; non-object values replace
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// `0x` followed by 40 hex digits
fn parse_address(s: &str) -> Option<Address> {
    let digits = s.trim().strip_prefix("0x")?;
    if digits.len() != 40 {
        return None;
    }
    digits.parse().ok()
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                field: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const POOL: &str = "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc";

    fn valid() -> Config {
        let mut config = Config::default();
        config.chain_a.rpc_url = "https://eth.example".to_string();
        config.chain_a.pool_address = POOL.to_string();
        config.chain_b.rpc_url = "https://blast.example".to_string();
        config.chain_b.pool_address = POOL.to_string();
        config
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chain_a.name, "ethereum");
        assert_eq!(config.chain_b.name, "blast");
        assert_eq!(config.chain_a.max_gas_price_gwei, dec!(100));
        assert_eq!(config.chain_b.max_gas_price_gwei, dec!(50));
        assert_eq!(config.arbitrage.min_profit_threshold, 0.5);
        assert_eq!(config.rate_limit.max_points, 100);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 300_000);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.websocket.reconnect_interval_ms, 5_000);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_partial_json() {
        let json = r#"{
            "chain_a": { "rpc_url": "https://eth.example", "pool_address": "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc" },
            "arbitrage": { "min_profit_threshold": 0.8 }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.chain_a.name, "ethereum");
        assert_eq!(config.chain_a.max_gas_price_gwei, dec!(100));
        assert_eq!(config.chain_a.rpc_url, "https://eth.example");
        assert_eq!(config.arbitrage.min_profit_threshold, 0.8);
        assert_eq!(config.arbitrage.max_position_size, 1.0);
        assert_eq!(config.chain_b.name, "blast");
        assert_eq!(config.chain_b.max_gas_price_gwei, dec!(50));
        assert!(config.chain_b.ws_url.is_none());
    }

    #[test]
    fn test_fractional_gas_cap_from_json_is_exact() {
        let config = Config::from_json(r#"{ "chain_a": { "max_gas_price_gwei": 33.3 } }"#).unwrap();
        assert_eq!(config.chain_a.max_gas_price_gwei, dec!(33.3));
        assert_eq!(
            config.chain_a.max_gas_price_wei(),
            U256::from(33_300_000_000u64)
        );
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        assert!(Config::from_json(r#"{ "rate_limit": { "max_points": "many" } }"#).is_err());
        assert!(Config::from_json("not json").is_err());
    }

    #[test]
    fn test_validate() {
        assert_eq!(valid().validate(), Ok(()));

        let mut missing = valid();
        missing.chain_b.rpc_url.clear();
        assert_eq!(
            missing.validate(),
            Err(ConfigError::Missing("chain_b.rpc_url".to_string()))
        );

        let mut bad_pool = valid();
        bad_pool.chain_a.pool_address = "0x1234".to_string();
        assert!(matches!(
            bad_pool.validate(),
            Err(ConfigError::InvalidPoolAddress { .. })
        ));

        let mut zero_profit = valid();
        zero_profit.arbitrage.min_profit_threshold = 0.0;
        assert!(matches!(
            zero_profit.validate(),
            Err(ConfigError::NotPositive { .. })
        ));

        let mut no_points = valid();
        no_points.rate_limit.max_points = 0;
        assert!(no_points.validate().is_err());

        let mut shrinking = valid();
        shrinking.retry.backoff_factor = 0.5;
        assert!(shrinking.validate().is_err());

        let mut free_gas = valid();
        free_gas.chain_b.max_gas_price_gwei = Decimal::ZERO;
        assert_eq!(
            free_gas.validate(),
            Err(ConfigError::NotPositive {
                field: "chain_b.max_gas_price_gwei".to_string()
            })
        );

        let mut no_keepalive = valid();
        no_keepalive.websocket.keepalive_interval_ms = 0;
        assert!(no_keepalive.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("ETH_RPC_URL", "https://primary"),
                ("ETH_BACKUP_RPCS", "https://b1, https://b2,,"),
                ("BLAST_POOL_ADDRESS", POOL),
                ("BLAST_MAX_GAS_PRICE", "12.5"),
                ("MIN_PROFIT_THRESHOLD", "1.25"),
                ("RATE_LIMIT_MAX", "10"),
                ("RESET_TIMEOUT", "1000"),
            ]))
            .unwrap();

        assert_eq!(config.chain_a.rpc_url, "https://primary");
        assert_eq!(config.chain_a.backup_rpcs, vec!["https://b1", "https://b2"]);
        assert_eq!(config.chain_b.pool_address, POOL);
        assert_eq!(config.chain_b.max_gas_price_gwei, dec!(12.5));
        assert_eq!(config.arbitrage.min_profit_threshold, 1.25);
        assert_eq!(config.limiter().max_points, 10);
        assert_eq!(config.breaker().reset_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_gas_cap_override_is_exact() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[("ETH_MAX_GAS_PRICE", "33.3")]))
            .unwrap();
        assert_eq!(
            config.chain_a.max_gas_price_wei(),
            U256::from(33_300_000_000u64)
        );
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[("MAX_FAILURES", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "MAX_FAILURES"));
    }

    #[test]
    fn test_conversions() {
        let config = valid();
        let coordinator = config.coordinator();
        assert_eq!(coordinator.min_execution_interval, Duration::from_millis(5_000));
        assert_eq!(coordinator.confirmations, 2);
        assert_eq!(config.retry_policy().max_tries(), 3);
        assert_eq!(config.chain_b.max_gas_price_wei(), U256::from(50_000_000_000u64));
        assert_eq!(config.rpc_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));

        let settings = config.trade_settings();
        assert_eq!(settings.position_size, 1.0);
        assert_eq!(settings.min_position_size, 0.01);
        assert_eq!(settings.gas_limit, 300_000);
        assert_eq!(settings.slippage_tolerance_pct, 1.0);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address(POOL),
            Some(Address::from_slice(&[
                0xb4, 0xe1, 0x6d, 0x01, 0x68, 0xe5, 0x2d, 0x35, 0xca, 0xcd, 0x2c, 0x61, 0x85, 0xb4,
                0x42, 0x81, 0xec, 0x28, 0xc9, 0xdc
            ]))
        );
        assert!(parse_address("B4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc").is_none());
        assert!(parse_address("0xZZe16d0168e52d35CaCD2c6185b44281Ec28C9Dc").is_none());
        assert!(parse_address("0x1234").is_none());
    }
}
