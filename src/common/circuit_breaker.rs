//! Failure isolation for chain reads and the trade path
//!
//! After `max_failures` consecutive failures the breaker opens and rejects
//! calls without running them. Once `reset_timeout` has passed since the
//! last failure a single trial call is let through: success closes the
//! breaker, failure opens it again and restarts the timer.
//!
//! One breaker guards one logical resource (a chain's pool reads, or the
//! trade submission path). Never share an instance across resources.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::BreakerError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    #[default]
    Closed,
    /// Resource is failing - calls are rejected immediately
    Open,
    /// Reset timeout elapsed - a single trial call is allowed
    HalfOpen,
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub max_failures: u32,
    /// Duration to stay in Open state before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the consecutive failure threshold
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Set how long the circuit stays open
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Circuit breaker wrapping any fallible async operation
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use pool_arb::common::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// #[tokio::main]
/// async fn main() {
///     let config = CircuitBreakerConfig::default()
///         .with_max_failures(2)
///         .with_reset_timeout(Duration::from_secs(30));
///     let mut cb = CircuitBreaker::new("reserves", config);
///
///     for _ in 0..2 {
///         let _ = cb.execute(|| async { Err::<(), _>("rpc timeout") }).await;
///     }
///     assert_eq!(cb.state(), CircuitState::Open);
///
///     // Rejected without running the operation
///     let res = cb.execute(|| async { Ok::<_, &str>(1) }).await;
///     assert!(res.unwrap_err().is_open());
/// }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            config,
        }
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker.
    ///
    /// While open and inside the reset timeout the operation is never
    /// invoked. Once the timeout has elapsed the breaker moves to HalfOpen
    /// and the operation runs exactly once as the trial call. The
    /// operation's own error is returned after bookkeeping.
    pub async fn execute<F, Fut, T, E>(&mut self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.try_acquire() {
            return Err(BreakerError::Open {
                name: self.name.clone(),
                retry_in,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Check whether a call may proceed, moving Open -> HalfOpen once the
    /// reset timeout has elapsed. On rejection returns the remaining wait.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        if self.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = self
            .last_failure_at
            .map(|at| at.elapsed())
            .unwrap_or(self.config.reset_timeout);

        if elapsed >= self.config.reset_timeout {
            tracing::info!(breaker = %self.name, "Circuit breaker transitioning to HalfOpen state");
            self.state = CircuitState::HalfOpen;
            Ok(())
        } else {
            Err(self.config.reset_timeout - elapsed)
        }
    }

    /// Record a successful operation
    ///
    /// In Closed state: clears the consecutive failure count
    /// In HalfOpen state: closes the circuit
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit breaker closed after successful trial");
                self.reset();
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation
    ///
    /// In Closed state: opens once the failure threshold is reached
    /// In HalfOpen state: immediately re-opens and restarts the timer
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Instant::now());

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.max_failures {
                    tracing::warn!(
                        breaker = %self.name,
                        "Circuit breaker opened after {} failures",
                        self.consecutive_failures
                    );
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "Circuit breaker re-opened due to failed trial");
                self.state = CircuitState::Open;
            }
            CircuitState::Open => {}
        }
    }

    /// Reset the circuit breaker to its initial closed state
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.last_failure_at = None;
    }

    /// Check if the circuit is open
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Check if the circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }
}
