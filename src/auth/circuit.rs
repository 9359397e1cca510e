// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Circuit breaker around identity service calls.
//!
//! Owned and mutated by the identity service client only. The gateway reads
//! [`CircuitState`] snapshots for telemetry.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Read-only breaker snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitState {
    pub open: bool,
    pub failure_count: u32,
    pub state_name: &'static str,
}

impl CircuitState {
    pub fn new(state: BreakerState, failure_count: u32) -> Self {
        Self {
            open: state == BreakerState::Open,
            failure_count,
            state_name: state.as_str(),
        }
    }

    pub fn closed() -> Self {
        Self::new(BreakerState::Closed, 0)
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit a call, or `None` while the breaker is open. An open breaker
    /// moves to half-open once the recovery timeout has elapsed, and a
    /// half-open breaker admits one trial call at a time.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen if inner.trial_in_flight => return None,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let recovered = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if !recovered {
                    return None;
                }
                inner.state = BreakerState::HalfOpen;
                true
            }
        };
        if trial {
            inner.trial_in_flight = true;
        }
        Some(Permit {
            breaker: self,
            trial,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn status(&self) -> CircuitState {
        let inner = self.lock();
        CircuitState::new(inner.state, inner.consecutive_failures)
    }
}

/// Admission for one identity service call. Dropping a trial permit frees
/// the half-open slot even when the call was cancelled before recording.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
}

impl Permit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.status().open);
        breaker.record_failure();

        let status = breaker.status();
        assert!(status.open);
        assert_eq!(status.failure_count, 3);
        assert_eq!(status.state_name, "open");
        assert!(breaker.try_acquire().is_none());
    }

    #[test]
    fn success_resets_failures() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.status(), CircuitState::new(BreakerState::Closed, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure();
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.status().state_name, "half_open");

        breaker.record_failure();
        drop(trial);
        assert!(breaker.status().open);

        tokio::time::advance(Duration::from_secs(6)).await;
        let trial = breaker.try_acquire().unwrap();
        breaker.record_success();
        drop(trial);
        assert_eq!(breaker.status(), CircuitState::closed());
        assert!(!breaker.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_trial_at_a_time() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(6)).await;

        let trial = breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_none());
        assert!(breaker.try_acquire().is_none());

        // A cancelled trial records nothing but frees the slot.
        drop(trial);
        assert_eq!(breaker.status().state_name, "half_open");
        let retry = breaker.try_acquire().unwrap();
        assert!(retry.is_trial());
    }
}
