//! Per-chain price feed
//!
//! Reserves are fetched on demand through the feed's own circuit breaker.
//! The swap subscription only refreshes the observation timestamp; it never
//! touches reserves. A feed that cannot produce a price reports `None` and
//! the rest of the system carries on.

use chrono::{DateTime, Utc};
use ethers::types::U256;
use ethers::utils::format_ether;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::pair::{u256_to_f64, ReserveSource, SwapEvent};
use super::subscription::{run_swap_subscription, SubscriptionConfig};
use crate::common::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::BreakerError;

/// Last known reserves of a pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolState {
    pub reserve_base: U256,
    pub reserve_quote: U256,
    pub observed_at: DateTime<Utc>,
}

impl PoolState {
    /// `reserve_quote / reserve_base`, absent for an empty base side or a
    /// non-finite ratio
    pub fn price(&self) -> Option<f64> {
        if self.reserve_base.is_zero() {
            return None;
        }
        let price = u256_to_f64(self.reserve_quote) / u256_to_f64(self.reserve_base);
        price.is_finite().then_some(price)
    }
}

/// Background tasks feeding swap events into a [`PriceFeed`]
#[derive(Debug)]
pub struct SubscriptionHandle {
    listener: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn abort(&self) {
        self.listener.abort();
        self.consumer.abort();
    }
}

pub struct PriceFeed {
    chain: String,
    source: Arc<dyn ReserveSource>,
    breaker: Mutex<CircuitBreaker>,
    state: RwLock<Option<PoolState>>,
    last_swap_at: RwLock<Option<DateTime<Utc>>>,
    swaps_seen: AtomicU64,
}

impl std::fmt::Debug for PriceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceFeed")
            .field("chain", &self.chain)
            .field("swaps_seen", &self.swaps_seen.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PriceFeed {
    pub fn new(
        chain: impl Into<String>,
        source: Arc<dyn ReserveSource>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let chain = chain.into();
        let breaker = CircuitBreaker::new(format!("{}-reserves", chain), breaker_config);
        Self {
            chain,
            source,
            breaker: Mutex::new(breaker),
            state: RwLock::new(None),
            last_swap_at: RwLock::new(None),
            swaps_seen: AtomicU64::new(0),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Fetch reserves through the breaker and store them.
    ///
    /// Returns `None` when the breaker is open or the fetch failed; the
    /// previous state is kept in that case.
    pub async fn refresh(&self) -> Option<PoolState> {
        let result = {
            let mut breaker = self.breaker.lock().await;
            breaker.execute(|| self.source.get_reserves()).await
        };

        match result {
            Ok(reserves) => {
                let state = PoolState {
                    reserve_base: reserves.reserve_base,
                    reserve_quote: reserves.reserve_quote,
                    observed_at: Utc::now(),
                };
                *self.state.write().await = Some(state);
                Some(state)
            }
            Err(BreakerError::Open { retry_in, .. }) => {
                warn!(
                    chain = %self.chain,
                    "Reserve fetch skipped, circuit open (retry in {}ms)",
                    retry_in.as_millis()
                );
                None
            }
            Err(BreakerError::Inner(e)) => {
                error!(chain = %self.chain, "Error fetching reserves: {}", e);
                None
            }
        }
    }

    /// Fresh price for this pool, or `None` if unavailable or invalid
    pub async fn current_price(&self) -> Option<f64> {
        let state = self.refresh().await?;
        match state.price() {
            Some(price) => Some(price),
            None => {
                error!(
                    chain = %self.chain,
                    reserve_base = %state.reserve_base,
                    reserve_quote = %state.reserve_quote,
                    "Invalid price calculated"
                );
                None
            }
        }
    }

    /// Last stored state without touching the network
    pub async fn last_state(&self) -> Option<PoolState> {
        *self.state.read().await
    }

    pub async fn last_swap_at(&self) -> Option<DateTime<Utc>> {
        *self.last_swap_at.read().await
    }

    pub fn swaps_seen(&self) -> u64 {
        self.swaps_seen.load(Ordering::Relaxed)
    }

    pub async fn breaker_state(&self) -> CircuitState {
        self.breaker.lock().await.state()
    }

    /// Note a swap: bumps the observation time, leaves reserves untouched
    pub async fn record_swap(&self, event: &SwapEvent) {
        debug!(
            chain = %self.chain,
            sender = ?event.sender,
            amount_base_in = %format_ether(event.amount_base_in),
            amount_quote_in = %format_ether(event.amount_quote_in),
            amount_base_out = %format_ether(event.amount_base_out),
            amount_quote_out = %format_ether(event.amount_quote_out),
            to = ?event.recipient,
            "Swap event detected"
        );

        let now = Utc::now();
        *self.last_swap_at.write().await = Some(now);
        if let Some(state) = self.state.write().await.as_mut() {
            state.observed_at = now;
        }
        self.swaps_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain swap events from a channel into this feed
    pub fn spawn_swap_consumer(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<SwapEvent>,
    ) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                feed.record_swap(&event).await;
            }
        })
    }

    /// Start the websocket listener and its consumer
    pub fn start_subscription(self: &Arc<Self>, config: SubscriptionConfig) -> SubscriptionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(run_swap_subscription(self.chain.clone(), config, tx));
        let consumer = self.spawn_swap_consumer(rx);
        SubscriptionHandle { listener, consumer }
    }
}
