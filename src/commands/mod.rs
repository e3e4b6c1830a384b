//! Command implementations

pub mod check;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use pool_arb::Config;
use tracing::info;

/// Load and validate; a config that fails here is fatal
fn load_config(config_path: &str) -> Result<Config> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", config_path))?;
    info!("Loaded configuration from: {}", config_path);
    Ok(config)
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}
