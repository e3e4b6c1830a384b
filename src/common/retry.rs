//! Retry with capped exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry schedule: `attempts` tries, waiting
/// `min(backoff_min * backoff_factor^attempt, backoff_max)` between them
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_min: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration, factor: f64) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self.backoff_factor = factor;
        self
    }

    /// Delay after the failed try number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let scaled = self.backoff_min.as_secs_f64() * self.backoff_factor.powi(exp);
        if !scaled.is_finite() || scaled >= self.backoff_max.as_secs_f64() {
            self.backoff_max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Total tries, at least one
    pub fn max_tries(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Run `operation` until it succeeds or the try budget is spent.
///
/// The closure receives the 0-based attempt number. The last error is
/// returned once every try has failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let tries = config.max_tries();
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= tries => return Err(e),
            Err(e) => {
                let delay = config.delay(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {}ms",
                    label,
                    attempt + 1,
                    tries,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.delay(0), Duration::from_millis(1_000));
        assert_eq!(config.delay(1), Duration::from_millis(2_000));
        assert_eq!(config.delay(2), Duration::from_millis(4_000));
        assert_eq!(config.delay(3), Duration::from_millis(8_000));
        assert_eq!(config.delay(4), Duration::from_millis(10_000));
        assert_eq!(config.delay(60), Duration::from_millis(10_000));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let config = RetryConfig::default().with_attempts(0);
        assert_eq!(config.max_tries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let config = RetryConfig::default().with_attempts(3);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = retry_with_backoff(&config, "fetch", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("timeout")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_millis(3_000));
        assert!(start.elapsed() < Duration::from_millis(3_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let config = RetryConfig::default()
            .with_attempts(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50), 3.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_with_backoff(&config, "fetch", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("failure {}", attempt)) }
        })
        .await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
