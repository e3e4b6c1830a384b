use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Which pool is rich relative to the other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Chain A price is above chain B
    AToB,
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => write!(f, "A_TO_B"),
            Direction::BToA => write!(f, "B_TO_A"),
        }
    }
}

/// A detected price divergence between the two pools.
///
/// Fields are private; an opportunity never changes after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    price_a: f64,
    price_b: f64,
    diff_percent: f64,
    direction: Direction,
    detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Build from two prices, `None` unless both are positive and finite
    pub fn new(price_a: f64, price_b: f64) -> Option<Self> {
        if !(price_a.is_finite() && price_b.is_finite() && price_a > 0.0 && price_b > 0.0) {
            return None;
        }

        let diff_percent = (price_a - price_b).abs() / price_a * 100.0;
        let direction = if price_a > price_b {
            Direction::AToB
        } else {
            Direction::BToA
        };

        Some(Self {
            price_a,
            price_b,
            diff_percent,
            direction,
            detected_at: Utc::now(),
        })
    }

    pub fn price_a(&self) -> f64 {
        self.price_a
    }

    pub fn price_b(&self) -> f64 {
        self.price_b
    }

    pub fn diff_percent(&self) -> f64 {
        self.diff_percent
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    /// Strictly above the threshold (percent)
    pub fn is_profitable(&self, min_profit_threshold_pct: f64) -> bool {
        self.diff_percent > min_profit_threshold_pct
    }
}
