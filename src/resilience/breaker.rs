use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// One breaker per upstream dependency (spec §4.1, §5), shared via `Arc` and
/// guarded by a single mutex — mirrors the teacher's kill-switch singleton.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        })
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    fn pre_call(&self) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    tracing::warn!(breaker = %self.name, "circuit entering half-open");
                    Ok(())
                } else {
                    Err(AppError::UpstreamUnavailable)
                }
            }
            CircuitState::HalfOpen => Ok(()),
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "circuit closing after recovery");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(breaker = %self.name, "circuit reopened after half-open failure");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Calls `f`, refusing the call outright while the breaker is open.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        self.pre_call()?;
        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures_not_earlier() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        for i in 0..2 {
            let result: Result<(), AppError> = breaker
                .call(|| async { Err::<(), AppError>(AppError::Timeout) })
                .await;
            assert!(result.is_err());
            assert_eq!(breaker.state(), CircuitState::Closed, "failure {i}");
        }
        let _: Result<(), AppError> = breaker
            .call(|| async { Err::<(), AppError>(AppError::Timeout) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn refuses_calls_while_open() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(60));
        let _: Result<(), AppError> = breaker
            .call(|| async { Err::<(), AppError>(AppError::Timeout) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(|| async { Ok::<(), AppError>(()) }).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable)));
    }

    #[tokio::test]
    async fn half_open_single_success_closes_single_failure_reopens() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        let _: Result<(), AppError> = breaker
            .call(|| async { Err::<(), AppError>(AppError::Timeout) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(|| async { Ok::<(), AppError>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
