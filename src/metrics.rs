//! Process-wide trading metrics
//!
//! Lock-free gauge and counters for the hot path; the per-chain gas gauge
//! sits behind a small mutex. The HTTP surface that exposes these lives
//! outside this crate and reads [`Metrics::snapshot`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Metrics {
    /// Last computed diff percent, stored as `f64` bits
    profitability: AtomicU64,
    successful_trades: AtomicU64,
    failed_trades: AtomicU64,
    gas_price_gwei: Mutex<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub profitability_pct: f64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub gas_price_gwei: BTreeMap<String, f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_profitability(&self, diff_percent: f64) {
        self.profitability
            .store(diff_percent.to_bits(), Ordering::Relaxed);
    }

    pub fn profitability(&self) -> f64 {
        f64::from_bits(self.profitability.load(Ordering::Relaxed))
    }

    pub fn record_success(&self) {
        self.successful_trades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_trades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn successful_trades(&self) -> u64 {
        self.successful_trades.load(Ordering::Relaxed)
    }

    pub fn failed_trades(&self) -> u64 {
        self.failed_trades.load(Ordering::Relaxed)
    }

    pub fn set_gas_price(&self, chain: &str, gwei: f64) {
        let mut gauges = self
            .gas_price_gwei
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        gauges.insert(chain.to_string(), gwei);
    }

    pub fn gas_price(&self, chain: &str) -> Option<f64> {
        self.gas_price_gwei
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(chain)
            .copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            profitability_pct: self.profitability(),
            successful_trades: self.successful_trades(),
            failed_trades: self.failed_trades(),
            gas_price_gwei: self
                .gas_price_gwei
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let metrics = Metrics::new();
        assert_eq!(metrics.profitability(), 0.0);

        metrics.set_profitability(4.76);
        metrics.record_success();
        metrics.record_failure();
        metrics.record_failure();
        metrics.set_gas_price("ethereum", 31.5);
        metrics.set_gas_price("ethereum", 30.0);
        metrics.set_gas_price("blast", 0.2);

        let snapshot = metrics.snapshot();
        approx::assert_relative_eq!(snapshot.profitability_pct, 4.76);
        assert_eq!(snapshot.successful_trades, 1);
        assert_eq!(snapshot.failed_trades, 2);
        assert_eq!(snapshot.gas_price_gwei.len(), 2);
        assert_eq!(metrics.gas_price("ethereum"), Some(30.0));
        assert_eq!(metrics.gas_price("base"), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.set_gas_price("blast", 1.0);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["gas_price_gwei"]["blast"], 1.0);
        assert_eq!(json["successful_trades"], 0);
    }
}
