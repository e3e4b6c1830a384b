//! Cross-chain pool arbitrage
//!
//! Watches the same asset pair on two constant-product pools on different
//! chains and trades the divergence when it beats the profit threshold net
//! of gas. The crate is mostly the resilience layer around that loop:
//! endpoint failover with retry, circuit breakers per chain and for the
//! trade path, a fixed-window rate limiter, and a coordinator that runs at
//! most one trade at a time with a minimum spacing between successes.

pub mod arbitrage;
pub mod common;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod rpc;
pub mod system;

pub use config::Config;
pub use error::{BreakerError, ConfigError, RpcError, TradeError};
pub use system::ArbitrageSystem;
