//! Execution coordinator
//!
//! Detection runs on the caller's task: rate limit, prices from both feeds,
//! profitability, then gas on both chains. Execution runs on a single
//! worker task fed by an unbounded FIFO queue, so at most one trade is ever
//! in flight. The worker owns the trade-path circuit breaker.
//!
//! The minimum-interval gate is checked when an opportunity is offered and
//! again by the worker right before it runs. Two opportunities offered back
//! to back can both be queued; if the first succeeds the second is skipped
//! by the worker instead of trading inside the interval. No slot is
//! reserved at enqueue time, so a failed first trade does not block the
//! second.

use ethers::types::U256;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::executor::{TradeExecutor, TradeReceipt};
use super::opportunity::Opportunity;
use crate::common::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter};
use crate::error::{BreakerError, TradeError};
use crate::metrics::Metrics;
use crate::pool::PriceFeed;
use crate::rpc::{wei_to_gwei, ProviderFailover};

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Diff percent an opportunity must strictly exceed
    pub min_profit_threshold_pct: f64,
    pub min_execution_interval: Duration,
    pub confirmations: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold_pct: 0.5,
            min_execution_interval: Duration::from_millis(5_000),
            confirmations: 2,
        }
    }
}

/// One side of the arbitrage
#[derive(Debug, Clone)]
pub struct ChainLeg {
    pub feed: Arc<PriceFeed>,
    pub provider: Arc<ProviderFailover>,
    pub max_gas_price_wei: U256,
}

impl ChainLeg {
    pub fn name(&self) -> &str {
        self.feed.chain()
    }
}

/// Time of the last successful execution plus the spacing rule
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    last_execution_at: Option<Instant>,
    min_interval: Duration,
}

impl ExecutionRecord {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_execution_at: None,
            min_interval,
        }
    }

    pub fn last_execution_at(&self) -> Option<Instant> {
        self.last_execution_at
    }

    /// Time left before another execution is allowed, `None` if allowed now
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_execution_at?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.min_interval).then(|| self.min_interval - elapsed)
    }

    pub fn mark_executed(&mut self, at: Instant) {
        self.last_execution_at = Some(at);
    }
}

/// Result of one detection cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "opportunity", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Limiter rejected the cycle before any chain query
    RateLimited,
    /// At least one feed had no valid price
    NoPrice,
    Unprofitable(Opportunity),
    /// Gas prices could not be fetched
    GasUnavailable(Opportunity),
    GasTooHigh(Opportunity),
    /// Passed every gate, ready to execute
    Opportunity(Opportunity),
}

impl CheckOutcome {
    pub fn opportunity(&self) -> Option<&Opportunity> {
        match self {
            CheckOutcome::RateLimited | CheckOutcome::NoPrice => None,
            CheckOutcome::Unprofitable(opp)
            | CheckOutcome::GasUnavailable(opp)
            | CheckOutcome::GasTooHigh(opp)
            | CheckOutcome::Opportunity(opp) => Some(opp),
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, CheckOutcome::Opportunity(_))
    }
}

/// Terminal state of one offered opportunity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded { receipt: TradeReceipt },
    /// Simulation said unprofitable, nothing submitted
    Aborted,
    Failed { reason: String },
    /// Trade breaker open, nothing attempted
    CircuitOpen,
    /// Inside the minimum interval of the last success
    SkippedInterval,
    /// Coordinator shut down before the job ran
    Cancelled,
}

/// Completion handle for an offered opportunity
#[derive(Debug)]
pub struct ExecutionHandle {
    inner: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(ExecutionOutcome),
    Queued(oneshot::Receiver<ExecutionOutcome>),
}

impl ExecutionHandle {
    fn ready(outcome: ExecutionOutcome) -> Self {
        Self {
            inner: HandleState::Ready(outcome),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.inner, HandleState::Queued(_))
    }

    pub async fn outcome(self) -> ExecutionOutcome {
        match self.inner {
            HandleState::Ready(outcome) => outcome,
            HandleState::Queued(rx) => rx.await.unwrap_or(ExecutionOutcome::Cancelled),
        }
    }
}

struct Job {
    opportunity: Opportunity,
    reply: oneshot::Sender<ExecutionOutcome>,
}

enum Attempt {
    Aborted,
    Confirmed(TradeReceipt),
}

pub struct ExecutionCoordinator {
    config: CoordinatorConfig,
    chain_a: ChainLeg,
    chain_b: ChainLeg,
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
    record: Arc<Mutex<ExecutionRecord>>,
    trade_breaker: Arc<Mutex<CircuitBreaker>>,
    pending: Arc<AtomicUsize>,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .field("chain_a", &self.chain_a.name())
            .field("chain_b", &self.chain_b.name())
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    /// Build the coordinator and start its execution worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: CoordinatorConfig,
        chain_a: ChainLeg,
        chain_b: ChainLeg,
        limiter: RateLimiter,
        executor: Arc<dyn TradeExecutor>,
        trade_breaker: CircuitBreakerConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let record = Arc::new(Mutex::new(ExecutionRecord::new(
            config.min_execution_interval,
        )));
        let trade_breaker = Arc::new(Mutex::new(CircuitBreaker::new("trade", trade_breaker)));
        let pending = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            executor,
            breaker: Arc::clone(&trade_breaker),
            record: Arc::clone(&record),
            metrics: Arc::clone(&metrics),
            pending: Arc::clone(&pending),
            confirmations: config.confirmations,
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            config,
            chain_a,
            chain_b,
            limiter,
            metrics,
            record,
            trade_breaker,
            pending,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn chain_a(&self) -> &ChainLeg {
        &self.chain_a
    }

    pub fn chain_b(&self) -> &ChainLeg {
        &self.chain_b
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn trade_breaker_state(&self) -> CircuitState {
        self.trade_breaker.lock().await.state()
    }

    pub async fn last_execution_at(&self) -> Option<Instant> {
        self.record.lock().await.last_execution_at()
    }

    /// Run the detection gates once
    pub async fn check_opportunity(&self) -> CheckOutcome {
        if let Admission::Rejected { retry_in } = self.limiter.try_acquire(1).await {
            debug!(
                retry_in_ms = retry_in.as_millis() as u64,
                "Rate limit exceeded, skipping check"
            );
            return CheckOutcome::RateLimited;
        }

        let (price_a, price_b) = tokio::join!(
            self.chain_a.feed.current_price(),
            self.chain_b.feed.current_price()
        );
        let (Some(price_a), Some(price_b)) = (price_a, price_b) else {
            debug!("Price unavailable on at least one chain, skipping check");
            return CheckOutcome::NoPrice;
        };
        let Some(opportunity) = Opportunity::new(price_a, price_b) else {
            return CheckOutcome::NoPrice;
        };

        self.metrics.set_profitability(opportunity.diff_percent());

        if !opportunity.is_profitable(self.config.min_profit_threshold_pct) {
            debug!(
                diff_pct = opportunity.diff_percent(),
                threshold_pct = self.config.min_profit_threshold_pct,
                "Price difference below threshold"
            );
            return CheckOutcome::Unprofitable(opportunity);
        }

        let gas = tokio::try_join!(
            self.chain_a
                .provider
                .check_gas_price(self.chain_a.max_gas_price_wei),
            self.chain_b
                .provider
                .check_gas_price(self.chain_b.max_gas_price_wei),
        );
        let (gas_a, gas_b) = match gas {
            Ok(checks) => checks,
            Err(e) => {
                warn!("Gas price unavailable, skipping opportunity: {}", e);
                return CheckOutcome::GasUnavailable(opportunity);
            }
        };

        self.metrics
            .set_gas_price(self.chain_a.name(), wei_to_gwei(gas_a.price));
        self.metrics
            .set_gas_price(self.chain_b.name(), wei_to_gwei(gas_b.price));

        if !(gas_a.is_acceptable() && gas_b.is_acceptable()) {
            warn!(
                gas_a_gwei = wei_to_gwei(gas_a.price),
                gas_b_gwei = wei_to_gwei(gas_b.price),
                max_a_gwei = wei_to_gwei(gas_a.max),
                max_b_gwei = wei_to_gwei(gas_b.max),
                "Gas prices too high, skipping opportunity"
            );
            return CheckOutcome::GasTooHigh(opportunity);
        }

        info!(
            price_a = opportunity.price_a(),
            price_b = opportunity.price_b(),
            diff_pct = %format!("{:.4}", opportunity.diff_percent()),
            direction = %opportunity.direction(),
            "Arbitrage opportunity found"
        );
        CheckOutcome::Opportunity(opportunity)
    }

    /// Offer an opportunity for execution.
    ///
    /// Skipped immediately when inside the minimum interval, otherwise
    /// queued behind any trade already in flight.
    pub async fn execute(&self, opportunity: Opportunity) -> ExecutionHandle {
        if let Some(wait) = self.record.lock().await.remaining(Instant::now()) {
            debug!(
                wait_ms = wait.as_millis() as u64,
                "Minimum execution interval not elapsed, skipping"
            );
            return ExecutionHandle::ready(ExecutionOutcome::SkippedInterval);
        }

        let (reply, rx) = oneshot::channel();
        let queue = self.queue.lock().await;
        let Some(sender) = queue.as_ref() else {
            return ExecutionHandle::ready(ExecutionOutcome::Cancelled);
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(Job { opportunity, reply }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return ExecutionHandle::ready(ExecutionOutcome::Cancelled);
        }

        ExecutionHandle {
            inner: HandleState::Queued(rx),
        }
    }

    /// One monitoring tick: detect, and queue without waiting if actionable
    pub async fn run_cycle(&self) -> CheckOutcome {
        let outcome = self.check_opportunity().await;
        if let CheckOutcome::Opportunity(opportunity) = &outcome {
            let handle = self.execute(opportunity.clone()).await;
            if handle.is_queued() {
                debug!(pending = self.pending(), "Opportunity queued for execution");
            }
        }
        outcome
    }

    /// Close the queue and wait for already queued jobs to finish
    pub async fn shutdown(&self) {
        drop(self.queue.lock().await.take());

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!("Execution worker ended abnormally: {}", e);
            }
        }
        info!("Execution queue drained");
    }
}

struct Worker {
    executor: Arc<dyn TradeExecutor>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    record: Arc<Mutex<ExecutionRecord>>,
    metrics: Arc<Metrics>,
    pending: Arc<AtomicUsize>,
    confirmations: u32,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            let outcome = self.execute(&job.opportunity).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
            // Caller may have dropped the handle
            let _ = job.reply.send(outcome);
        }
        debug!("Execution worker stopped");
    }

    async fn execute(&self, opportunity: &Opportunity) -> ExecutionOutcome {
        if let Some(wait) = self.record.lock().await.remaining(Instant::now()) {
            debug!(
                wait_ms = wait.as_millis() as u64,
                "Queued opportunity fell inside execution interval, skipping"
            );
            return ExecutionOutcome::SkippedInterval;
        }

        let result = {
            let mut breaker = self.breaker.lock().await;
            breaker
                .execute(|| trade(self.executor.as_ref(), opportunity, self.confirmations))
                .await
        };

        match result {
            Ok(Attempt::Confirmed(receipt)) => {
                self.record.lock().await.mark_executed(Instant::now());
                self.metrics.record_success();
                info!(
                    hash = ?receipt.hash,
                    gas_used = %receipt.gas_used,
                    "Arbitrage executed successfully"
                );
                ExecutionOutcome::Succeeded { receipt }
            }
            Ok(Attempt::Aborted) => {
                info!("Trade simulation indicates no profit, aborting");
                ExecutionOutcome::Aborted
            }
            Err(BreakerError::Open { retry_in, .. }) => {
                warn!(
                    "Trade circuit open, skipping execution (retry in {}ms)",
                    retry_in.as_millis()
                );
                ExecutionOutcome::CircuitOpen
            }
            Err(BreakerError::Inner(e)) => {
                self.metrics.record_failure();
                error!("Arbitrage execution failed: {}", e);
                ExecutionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Simulate, then submit and wait for confirmations
async fn trade(
    executor: &dyn TradeExecutor,
    opportunity: &Opportunity,
    confirmations: u32,
) -> Result<Attempt, TradeError> {
    let simulation = executor.simulate(opportunity).await?;
    if !simulation.profitable {
        return Ok(Attempt::Aborted);
    }

    let pending = executor.submit(opportunity).await?;
    info!(hash = ?pending.hash, "Transaction submitted");

    let receipt = executor.await_confirmation(&pending, confirmations).await?;
    Ok(Attempt::Confirmed(receipt))
}
