//! Live Swap event subscription over a websocket
//!
//! Best-effort cache warmer: reconnects after a fixed delay, forever, and
//! forwards decoded swaps into a channel. Delivery is at most once per chain
//! event; nothing is replayed across reconnects.
//!
//! A quiet pool and a dead peer look the same from the log stream, so the
//! connection sends `eth_blockNumber` on a fixed keepalive interval. Every
//! request, connect included, is bounded by `request_timeout`; a missed
//! deadline drops the connection and goes through the reconnect path.

use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter};
use futures_util::StreamExt;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::pair::{decode_swap_log, swap_topic, SwapEvent};
use crate::error::RpcError;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub ws_url: String,
    pub pool_address: Address,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
}

/// Derive a websocket url from an HTTP RPC url (`http` -> `ws`, `https` -> `wss`)
pub fn ws_url_from_rpc(rpc_url: &str) -> String {
    match rpc_url.strip_prefix("http") {
        Some(rest) => format!("ws{}", rest),
        None => rpc_url.to_string(),
    }
}

/// Keep a Swap subscription alive until the receiving side is dropped
pub async fn run_swap_subscription(
    chain: String,
    config: SubscriptionConfig,
    events: mpsc::UnboundedSender<SwapEvent>,
) {
    loop {
        match stream_swaps(&chain, &config, &events).await {
            Ok(()) => warn!(chain = %chain, "WebSocket disconnected"),
            Err(e) => warn!(chain = %chain, "WebSocket disconnected: {}", e),
        }

        if events.is_closed() {
            debug!(chain = %chain, "Swap receiver dropped, stopping subscription");
            return;
        }

        sleep(config.reconnect_delay).await;
    }
}

async fn stream_swaps(
    chain: &str,
    config: &SubscriptionConfig,
    events: &mpsc::UnboundedSender<SwapEvent>,
) -> Result<(), RpcError> {
    let provider = within(
        config,
        "connect",
        Provider::<Ws>::connect(config.ws_url.as_str()),
    )
    .await?;
    info!(chain = %chain, "WebSocket connected");

    let filter = Filter::new()
        .address(config.pool_address)
        .topic0(swap_topic());
    let mut logs = within(config, "eth_subscribe", provider.subscribe_logs(&filter)).await?;
    debug!(chain = %chain, pool = ?config.pool_address, "Subscribed to Swap logs");

    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            log = logs.next() => {
                let Some(log) = log else {
                    return Ok(());
                };
                if log.removed == Some(true) {
                    continue;
                }
                match decode_swap_log(&log) {
                    Ok(event) => {
                        if events.send(event).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => debug!(chain = %chain, "Ignoring log: {}", e),
                }
            }
            _ = keepalive.tick() => {
                if events.is_closed() {
                    return Ok(());
                }
                let block = within(config, "keepalive", provider.get_block_number()).await?;
                debug!(chain = %chain, block = %block, "WebSocket alive");
            }
        }
    }
}

async fn within<T, E, F>(config: &SubscriptionConfig, step: &str, request: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match timeout(config.request_timeout, request).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RpcError::WebSocket(format!("{} failed: {}", step, e))),
        Err(_) => Err(RpcError::Timeout {
            url: config.ws_url.clone(),
            after: config.request_timeout,
        }),
    }
}
