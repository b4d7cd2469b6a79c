//! Circuit breaker guarding blockchain calls.
//!
//! Three states — Closed, Open, HalfOpen — following the same
//! phase-gate shape as the prior-generation withdraw lock, generalized
//! from a binary "allowed in this phase" check into a full breaker with
//! failure counting and timed recovery, in the `Arc<Mutex<_>>`-guarded
//! state-machine style the ghostbridge rollup's optimistic-state code
//! uses for its own phase transitions.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use anchormatch_types::ports::Clock;

use crate::error::GovernorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: chrono::Duration,
    success_threshold: u32,
    clock: std::sync::Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(
        failure_threshold: u32,
        timeout_ms: u64,
        success_threshold: u32,
        clock: std::sync::Arc<dyn Clock>,
    ) -> Self {
        Self {
            failure_threshold,
            timeout: chrono::Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(i64::MAX)),
            success_threshold,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: None,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.admission_state()
    }

    /// Run `op` if the breaker is closed or probing; otherwise return
    /// `GovernorError::BreakerOpen` without invoking it. Records the
    /// outcome of `op` against the breaker's state machine.
    ///
    /// # Errors
    /// Returns `GovernorError::BreakerOpen` while open, or whatever `op`
    /// itself returns.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerOutcome<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match self.admission_state() {
            BreakerState::Open => {
                let next_attempt_at = self
                    .inner
                    .lock()
                    .unwrap()
                    .next_attempt_at
                    .map_or(0, |t| t.timestamp());
                return Err(BreakerOutcome::Open(GovernorError::BreakerOpen {
                    next_attempt_at_unix: next_attempt_at,
                }));
            }
            BreakerState::Closed | BreakerState::HalfOpen => {}
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerOutcome::Inner(err))
            }
        }
    }

    /// Resolve `Open` to `HalfOpen` if the recovery timeout has elapsed,
    /// without mutating failure/success counters.
    fn admission_state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == BreakerState::Open {
            if let Some(next_attempt_at) = inner.next_attempt_at {
                if self.clock.timestamp() >= next_attempt_at {
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                }
            }
        }
        inner.state
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.next_attempt_at = Some(self.clock.timestamp() + self.timeout);
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.success_count = 0;
                inner.next_attempt_at = Some(self.clock.timestamp() + self.timeout);
            }
            BreakerState::Open => {}
        }
    }
}

/// Distinguishes "the breaker itself refused the call" from "the
/// wrapped operation failed," so callers can branch on the former
/// without needing `op`'s error type to encode `BreakerOpen` itself.
#[derive(Debug)]
pub enum BreakerOutcome<E> {
    Open(GovernorError),
    Inner(E),
}
