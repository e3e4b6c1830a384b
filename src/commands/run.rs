//! Run command implementation
//!
//! - Detection cycle on a fixed interval; cycle failures never stop the loop
//! - Opportunities are queued, not awaited, so the loop keeps its cadence
//! - Ctrl+C stops the loop, aborts subscriptions and drains the queue

use anyhow::{Context, Result};
use pool_arb::arbitrage::{CheckOutcome, PaperExecutor};
use pool_arb::{ArbitrageSystem, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

pub fn run(config_path: String, interval_ms: Option<u64>) -> Result<()> {
    let mut config = super::load_config(&config_path)?;
    if let Some(ms) = interval_ms {
        info!("Overriding poll interval to: {}ms", ms);
        config.arbitrage.poll_interval_ms = ms;
    }

    let runtime = super::build_runtime()?;
    runtime.block_on(run_async(config))
}

async fn run_async(config: Config) -> Result<()> {
    let poll = Duration::from_millis(config.arbitrage.poll_interval_ms.max(1));

    info!(
        chain_a = %config.chain_a.name,
        chain_b = %config.chain_b.name,
        threshold_pct = config.arbitrage.min_profit_threshold,
        poll_ms = poll.as_millis() as u64,
        "Starting arbitrage monitor (paper execution)"
    );

    let executor = Arc::new(PaperExecutor::new(config.trade_settings()));
    let mut system =
        ArbitrageSystem::build(config, executor).context("Failed to build chain clients")?;
    system.start_background();

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    let mut cycle_interval = interval(poll);
    cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Starting monitoring loop...");

    loop {
        tokio::select! {
            _ = cycle_interval.tick() => {
                match system.coordinator().run_cycle().await {
                    CheckOutcome::Opportunity(opp) => debug!(
                        diff_pct = opp.diff_percent(),
                        pending = system.coordinator().pending(),
                        "Cycle queued an execution"
                    ),
                    other => debug!(outcome = ?other, "Cycle finished"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    system.shutdown().await;

    let snapshot = system.metrics().snapshot();
    info!(
        successful = snapshot.successful_trades,
        failed = snapshot.failed_trades,
        healthy = system.health().is_healthy().await,
        "Monitoring session ended"
    );
    Ok(())
}
