//! Trade path collaborator
//!
//! Building, signing and submitting the actual swap lives behind
//! [`TradeExecutor`]. The coordinator only drives the simulate -> submit ->
//! confirm protocol through it.

use async_trait::async_trait;
use ethers::types::{TxHash, U256};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use super::opportunity::Opportunity;
use crate::error::TradeError;

/// Explicit outcome of a dry run; `profitable == false` is not an error
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationResult {
    pub profitable: bool,
}

/// Handle of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTrade {
    pub hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeReceipt {
    pub hash: TxHash,
    pub gas_used: U256,
    pub effective_gas_price: U256,
}

/// How big each trade is and what it may give up
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSettings {
    /// Base token amount traded per opportunity
    pub position_size: f64,
    pub min_position_size: f64,
    pub gas_limit: u64,
    /// Percent of the price edge lost to slippage in the worst case
    pub slippage_tolerance_pct: f64,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            position_size: 1.0,
            min_position_size: 0.01,
            gas_limit: 300_000,
            slippage_tolerance_pct: 1.0,
        }
    }
}

#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Evaluate the trade without touching chain state
    async fn simulate(&self, opportunity: &Opportunity) -> Result<SimulationResult, TradeError>;

    async fn submit(&self, opportunity: &Opportunity) -> Result<PendingTrade, TradeError>;

    async fn await_confirmation(
        &self,
        pending: &PendingTrade,
        confirmations: u32,
    ) -> Result<TradeReceipt, TradeError>;
}

/// Executor that never touches a chain.
///
/// A trade simulates profitable when the price edge survives the slippage
/// tolerance. Submissions get sequential pseudo hashes and confirm after an
/// optional delay, charging the configured gas limit at zero price. Lets
/// the monitor run end-to-end without keys.
#[derive(Debug, Default)]
pub struct PaperExecutor {
    settings: TradeSettings,
    nonce: AtomicU64,
    confirmation_delay: Duration,
    in_flight: Mutex<HashSet<TxHash>>,
}

impl PaperExecutor {
    pub fn new(settings: TradeSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    pub fn settings(&self) -> &TradeSettings {
        &self.settings
    }

    pub fn submitted(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn simulate(&self, opportunity: &Opportunity) -> Result<SimulationResult, TradeError> {
        let size = self.settings.position_size;
        if !(size >= self.settings.min_position_size) || !(size > 0.0) {
            return Err(TradeError::Simulation(format!(
                "position size {} below minimum {}",
                size, self.settings.min_position_size
            )));
        }

        Ok(SimulationResult {
            profitable: opportunity.diff_percent() > self.settings.slippage_tolerance_pct,
        })
    }

    async fn submit(&self, opportunity: &Opportunity) -> Result<PendingTrade, TradeError> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let hash = TxHash::from_low_u64_be(nonce);
        self.in_flight.lock().await.insert(hash);
        info!(
            hash = ?hash,
            direction = %opportunity.direction(),
            diff_pct = opportunity.diff_percent(),
            size = self.settings.position_size,
            "Paper trade submitted"
        );
        Ok(PendingTrade { hash })
    }

    async fn await_confirmation(
        &self,
        pending: &PendingTrade,
        _confirmations: u32,
    ) -> Result<TradeReceipt, TradeError> {
        if !self.in_flight.lock().await.remove(&pending.hash) {
            return Err(TradeError::Confirmation {
                hash: pending.hash,
                reason: "not submitted by this executor".to_string(),
            });
        }
        if !self.confirmation_delay.is_zero() {
            tokio::time::sleep(self.confirmation_delay).await;
        }
        Ok(TradeReceipt {
            hash: pending.hash,
            gas_used: U256::from(self.settings.gas_limit),
            effective_gas_price: U256::zero(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_round() {
        let executor = PaperExecutor::new(TradeSettings::default());
        let opp = Opportunity::new(1.05, 1.0).unwrap();

        assert!(executor.simulate(&opp).await.unwrap().profitable);

        let first = executor.submit(&opp).await.unwrap();
        let second = executor.submit(&opp).await.unwrap();
        assert_ne!(first.hash, second.hash);
        assert_eq!(executor.submitted(), 2);

        let receipt = executor.await_confirmation(&second, 2).await.unwrap();
        assert_eq!(receipt.hash, second.hash);
        assert_eq!(receipt.gas_used, U256::from(300_000));
    }

    #[tokio::test]
    async fn test_edge_inside_slippage_is_unprofitable() {
        let executor = PaperExecutor::new(TradeSettings {
            slippage_tolerance_pct: 5.0,
            ..TradeSettings::default()
        });
        // 4.76% edge
        let opp = Opportunity::new(1.05, 1.0).unwrap();
        assert!(!executor.simulate(&opp).await.unwrap().profitable);
    }

    #[tokio::test]
    async fn test_undersized_position_fails_simulation() {
        let executor = PaperExecutor::new(TradeSettings {
            position_size: 0.001,
            ..TradeSettings::default()
        });
        let opp = Opportunity::new(1.05, 1.0).unwrap();
        assert!(matches!(
            executor.simulate(&opp).await,
            Err(TradeError::Simulation(_))
        ));
    }

    #[tokio::test]
    async fn test_confirming_unknown_trade_fails() {
        let executor = PaperExecutor::new(TradeSettings::default());
        let stranger = PendingTrade {
            hash: TxHash::repeat_byte(0x11),
        };
        assert!(matches!(
            executor.await_confirmation(&stranger, 1).await,
            Err(TradeError::Confirmation { .. })
        ));

        // Each submission confirms once
        let opp = Opportunity::new(1.05, 1.0).unwrap();
        let pending = executor.submit(&opp).await.unwrap();
        assert!(executor.await_confirmation(&pending, 1).await.is_ok());
        assert!(executor.await_confirmation(&pending, 1).await.is_err());
    }
}
