//! Circuit breaker + retry, grounded on the original Python
//! `circuit_breaker.py` and the teacher's `DataSourceKillSwitch`-style
//! shared-mutex state singleton (`main.rs`).

mod breaker;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use retry::{retry_with_backoff, RetryConfig};
