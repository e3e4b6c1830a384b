//! Validate-config command implementation

use anyhow::Result;
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    let config = super::load_config(&config_path)?;

    for chain in [&config.chain_a, &config.chain_b] {
        info!(
            chain = %chain.name,
            rpc = %chain.rpc_url,
            backups = chain.backup_rpcs.len(),
            pool = %chain.pool_address,
            max_gas_gwei = %chain.max_gas_price_gwei,
            "Chain OK"
        );
    }
    info!(
        threshold_pct = config.arbitrage.min_profit_threshold,
        position_size = config.arbitrage.max_position_size,
        slippage_pct = config.arbitrage.slippage_tolerance,
        min_interval_ms = config.arbitrage.min_execution_interval_ms,
        rate_limit = %format!(
            "{}/{}ms",
            config.rate_limit.max_points, config.rate_limit.window_ms
        ),
        "Configuration is valid"
    );
    Ok(())
}
