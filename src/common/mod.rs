//! Resilience primitives shared across chain clients and the trade path
//!
//! - Circuit breaker for failure isolation
//! - Fixed-window rate limiter for outbound query volume
//! - Retry logic with capped exponential backoff

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{Admission, RateLimiter, RateLimiterConfig};
pub use retry::{retry_with_backoff, RetryConfig};
