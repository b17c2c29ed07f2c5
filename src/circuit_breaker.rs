//! # Circuit Breaker
//!
//! A generic three-state guard (CLOSED / OPEN / HALF_OPEN) protecting a
//! single backend. One instance lives per backend; state transitions are
//! guarded by one mutex so the OPEN -> HALF_OPEN admission check is atomic
//! with the transition itself.

use crate::clock::Clock;
use crate::error::CollectorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables for a single breaker instance.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_window: chrono::Duration,
}

impl BreakerConfig {
    /// Defaults for the free backend: 5 failures / 60s recovery.
    pub fn free_defaults() -> Self {
        Self {
            failure_threshold: 5,
            recovery_window: chrono::Duration::seconds(60),
        }
    }

    /// Defaults for the paid backend: 3 failures / 120s recovery.
    pub fn paid_defaults() -> Self {
        Self {
            failure_threshold: 3,
            recovery_window: chrono::Duration::seconds(120),
        }
    }
}

#[derive(Debug, Clone)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
    transitions: u64,
    /// Set while a HALF_OPEN probe is in flight, so only one probe is ever
    /// admitted concurrently.
    probe_in_flight: bool,
}

/// Snapshot of breaker counters for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub state: State,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub transitions: u64,
    pub failure_rate: f64,
    /// Seconds remaining before a HALF_OPEN probe is admitted, if OPEN.
    pub recovery_in_seconds: Option<i64>,
}

/// One breaker guarding one backend.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

/// Outcome of attempting to call through the breaker.
pub enum Admission {
    /// The call may proceed. If `is_probe` the result must be reported via
    /// `on_success`/`on_failure` promptly — only one probe is in flight.
    Admitted,
    /// The call is rejected without being attempted.
    Rejected,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                last_state_change: now,
                calls: 0,
                successes: 0,
                failures: 0,
                rejections: 0,
                transitions: 0,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a call would currently be admitted, without mutating any
    /// state. Only `call`'s own `admit_locked` invocation performs the real
    /// admission (including the OPEN -> HALF_OPEN transition); this is a
    /// cheap pre-check for callers that want to skip building a request
    /// entirely when the breaker is known to be open (e.g. HybridSource's
    /// cascade), and is advisory only — `call` always re-checks.
    pub async fn is_available(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.state {
            State::Closed => true,
            State::HalfOpen => !inner.probe_in_flight,
            State::Open => {
                let now = self.clock.now();
                let opened_at = inner.opened_at.unwrap_or(now);
                now - opened_at >= self.config.recovery_window
            }
        }
    }

    fn admit_locked(&self, inner: &mut Inner) -> Admission {
        match inner.state {
            State::Closed => Admission::Admitted,
            State::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Admitted
                }
            }
            State::Open => {
                let now = self.clock.now();
                let opened_at = inner.opened_at.unwrap_or(now);
                if now - opened_at >= self.config.recovery_window {
                    self.transition_locked(inner, State::HalfOpen);
                    inner.probe_in_flight = true;
                    Admission::Admitted
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    fn transition_locked(&self, inner: &mut Inner, to: State) {
        if inner.state != to {
            inner.transitions += 1;
            info!("breaker[{}]: {:?} -> {:?}", self.name, inner.state, to);
        }
        inner.state = to;
        inner.last_state_change = self.clock.now();
        if to == State::Open {
            inner.opened_at = Some(self.clock.now());
            inner.consecutive_successes = 0;
        }
        if to == State::Closed {
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.opened_at = None;
        }
    }

    /// Wrap a single attempt. The breaker does not inspect error content;
    /// any `Err` counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, CollectorError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: Into<CollectorError>,
    {
        {
            let mut inner = self.inner.lock().await;
            match self.admit_locked(&mut inner) {
                Admission::Admitted => {
                    inner.calls += 1;
                }
                Admission::Rejected => {
                    inner.rejections += 1;
                    return Err(CollectorError::CircuitOpen {
                        backend: self.name.clone(),
                    });
                }
            }
        }

        match f().await {
            Ok(value) => {
                self.on_outcome(true).await;
                Ok(value)
            }
            Err(e) => {
                self.on_outcome(false).await;
                Err(e.into())
            }
        }
    }

    async fn on_outcome(&self, success: bool) {
        let mut inner = self.inner.lock().await;
        inner.probe_in_flight = false;

        if success {
            inner.successes += 1;
        } else {
            inner.failures += 1;
        }

        match inner.state {
            State::Closed => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        self.transition_locked(&mut inner, State::Open);
                    }
                }
            }
            State::HalfOpen => {
                if success {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= 1 {
                        self.transition_locked(&mut inner, State::Closed);
                    }
                } else {
                    self.transition_locked(&mut inner, State::Open);
                }
            }
            State::Open => {
                // A call should not reach here (admission would have
                // rejected it), but handle defensively.
                warn!(
                    "breaker[{}]: outcome reported while OPEN, ignoring",
                    self.name
                );
            }
        }
    }

    pub async fn statistics(&self) -> Statistics {
        let inner = self.inner.lock().await;
        let failure_rate = if inner.calls > 0 {
            inner.failures as f64 / inner.calls as f64
        } else {
            0.0
        };

        let recovery_in_seconds = match (inner.state, inner.opened_at) {
            (State::Open, Some(opened_at)) => {
                let elapsed = self.clock.now() - opened_at;
                Some((self.config.recovery_window - elapsed).num_seconds().max(0))
            }
            _ => None,
        };

        Statistics {
            state: inner.state,
            calls: inner.calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
            transitions: inner.transitions,
            failure_rate,
            recovery_in_seconds,
        }
    }

    /// Force CLOSED. Diagnostic only.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        self.transition_locked(&mut inner, State::Closed);
        inner.probe_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn breaker(threshold: u32, window_secs: i64) -> (CircuitBreaker, FixedClock) {
        let clock = FixedClock::new(Utc::now());
        let cb = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_window: chrono::Duration::seconds(window_secs),
            },
            Arc::new(clock.clone()),
        );
        (cb, clock)
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb
            .call(|| async { Err::<(), CollectorError>(CollectorError::config("boom")) })
            .await;
    }

    async fn succeed(cb: &CircuitBreaker) {
        let _ = cb.call(|| async { Ok::<(), CollectorError>(()) }).await;
    }

    #[tokio::test]
    async fn test_nth_failure_opens_not_n_plus_one() {
        let (cb, _clock) = breaker(3, 60);

        fail(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Closed);
        fail(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Closed);
        fail(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_until_window_elapses_then_probes() {
        let (cb, clock) = breaker(1, 5);

        fail(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Open);

        // Rejected while within the window.
        let result = cb.call(|| async { Ok::<(), CollectorError>(()) }).await;
        assert!(matches!(result, Err(CollectorError::CircuitOpen { .. })));

        clock.advance(chrono::Duration::seconds(5));

        // Exactly one probe admitted; succeeding closes the breaker.
        succeed(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let (cb, clock) = breaker(1, 5);
        fail(&cb).await;
        clock.advance(chrono::Duration::seconds(5));

        fail(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Open);
    }

    #[tokio::test]
    async fn test_success_in_closed_resets_failure_counter() {
        let (cb, _clock) = breaker(3, 60);
        fail(&cb).await;
        fail(&cb).await;
        succeed(&cb).await;
        fail(&cb).await;
        fail(&cb).await;
        // Two consecutive failures again after the reset: still closed.
        assert_eq!(cb.statistics().await.state, State::Closed);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let (cb, _clock) = breaker(1, 60);
        fail(&cb).await;
        assert_eq!(cb.statistics().await.state, State::Open);
        cb.reset().await;
        assert_eq!(cb.statistics().await.state, State::Closed);
    }
}
