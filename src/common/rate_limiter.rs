//! Rate Limiter implementation using a fixed window
//!
//! Caps outbound query volume: at most `max_points` units are admitted per
//! window, and the budget resets in full once the window has elapsed.
//! Rejection is a normal outcome, callers skip the cycle instead of failing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Points available per window
    pub max_points: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_points: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// Set points available per window
    pub fn with_max_points(mut self, max_points: u32) -> Self {
        self.max_points = max_points;
        self
    }

    /// Set the window length
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Outcome of an acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Budget exhausted; the window resets after `retry_in`
    Rejected { retry_in: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    remaining: u32,
}

/// Fixed-window rate limiter
///
/// Cloning shares the underlying budget, so one instance constructed at
/// startup can be handed to every component drawing from the same quota.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use pool_arb::common::{RateLimiter, RateLimiterConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = RateLimiterConfig::default()
///         .with_max_points(2)
///         .with_window(Duration::from_secs(1));
///     let limiter = RateLimiter::new(config);
///
///     assert!(limiter.try_acquire(1).await.is_admitted());
///     assert!(limiter.try_acquire(1).await.is_admitted());
///     assert!(!limiter.try_acquire(1).await.is_admitted());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Arc<Mutex<Window>>,
    max_points: u32,
    window_duration: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter; the first window starts now
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window {
                started_at: Instant::now(),
                remaining: config.max_points,
            })),
            max_points: config.max_points,
            window_duration: config.window,
        }
    }

    /// Create a rate limiter with default configuration (100 points per minute)
    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Try to consume `cost` points without waiting
    pub async fn try_acquire(&self, cost: u32) -> Admission {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        if now.duration_since(window.started_at) >= self.window_duration {
            window.started_at = now;
            window.remaining = self.max_points;
        }

        if window.remaining >= cost {
            window.remaining -= cost;
            Admission::Admitted
        } else {
            let retry_in = self
                .window_duration
                .saturating_sub(now.duration_since(window.started_at));
            Admission::Rejected { retry_in }
        }
    }

    /// Points left in the current window
    pub async fn remaining(&self) -> u32 {
        let window = self.window.lock().await;
        if window.started_at.elapsed() >= self.window_duration {
            self.max_points
        } else {
            window.remaining
        }
    }

    pub fn max_points(&self) -> u32 {
        self.max_points
    }

    pub fn window(&self) -> Duration {
        self.window_duration
    }
}
