//! Circuit breaker around the sandboxed transcoder invocation.
//!
//! The whole decide-and-invoke sequence runs under one mutex so concurrent
//! callers cannot both observe `HalfOpen` and dispatch two trial calls:
//! exactly one trial is in flight at a time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{GwError, GwResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            threshold,
            reset_after,
        }
    }

    /// Execute `operation` under breaker protection.
    ///
    /// While `Open`, calls are rejected with `SandboxUnavailable` without
    /// invoking the operation; once the reset window has elapsed the next
    /// call becomes the single `HalfOpen` trial.
    pub fn call<T>(&self, operation: impl FnOnce() -> GwResult<T>) -> GwResult<T> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed > self.reset_after {
                inner.state = BreakerState::HalfOpen;
                tracing::info!("circuit breaker entering half-open state");
            } else {
                return Err(GwError::SandboxUnavailable {
                    retry_after_secs: self.reset_after.as_secs(),
                });
            }
        }

        match operation() {
            Ok(value) => {
                if inner.state == BreakerState::HalfOpen {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    tracing::info!("circuit breaker closed after successful trial");
                }
                Ok(value)
            }
            Err(error) => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                if inner.failure_count >= self.threshold {
                    inner.state = BreakerState::Open;
                    tracing::error!(
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                }
                Err(error)
            }
        }
    }

    /// Current state, without mutating it.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .failure_count
    }

    /// Force the reset window to be treated as elapsed. Test hook.
    #[cfg(test)]
    fn backdate_last_failure(&self, by: Duration) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if let Some(at) = inner.last_failure {
            inner.last_failure = at.checked_sub(by);
        }
    }
}
