//! Check command implementation
//!
//! Runs the detection gates once against the live pools and prints the
//! outcome as JSON. Nothing is executed.

use anyhow::{Context, Result};
use pool_arb::arbitrage::PaperExecutor;
use pool_arb::ArbitrageSystem;
use serde_json::json;
use std::sync::Arc;

pub fn run(config_path: String) -> Result<()> {
    let config = super::load_config(&config_path)?;
    let runtime = super::build_runtime()?;

    runtime.block_on(async move {
        let executor = Arc::new(PaperExecutor::new(config.trade_settings()));
        let mut system =
            ArbitrageSystem::build(config, executor).context("Failed to build chain clients")?;

        let outcome = system.coordinator().check_opportunity().await;
        let report = json!({
            "check": outcome,
            "metrics": system.metrics().snapshot(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );

        system.shutdown().await;
        Ok(())
    })
}
