//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: a single probe call is testing recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: first call after cooldown has strictly elapsed (becomes the probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (cooldown restarts)
//! ```
//!
//! Admission and the open → half-open transition happen under one lock, so
//! only one of many racing callers can claim the probe slot. The lock is never
//! held across the wrapped operation.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::clock::{self, SharedClock};
use crate::config::CircuitBreakerConfig;
use crate::observability::events::{EventKind, EventSink, GovernanceEvent};
use crate::observability::metrics;

/// Breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for the state gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Failure returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    Open {
        breaker: String,
        /// Time until a probe may be admitted; `None` while a probe is in flight.
        retry_in: Option<Duration>,
    },
    /// The operation ran and failed with its own error.
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { breaker, .. } => write!(f, "Circuit breaker '{}' is open", breaker),
            BreakerError::Inner(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub max_failures: u32,
    /// Milliseconds until the next probe is admitted (open state only).
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

enum Admission {
    Normal,
    Probe,
}

/// What changed after recording an outcome.
enum Transition {
    Opened { failures: u32 },
    Closed,
}

/// Circuit breaker guarding one downstream category.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: SharedClock,
    events: EventSink,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, events: EventSink) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, CircuitState::Closed.as_gauge());
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            clock: clock::system(),
            events,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state as last recorded. Does not force the open → half-open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        let retry_in_ms = match inner.state {
            CircuitState::Open => Some(
                u64::try_from(self.remaining_cooldown(&inner, now).as_millis()).unwrap_or(u64::MAX),
            ),
            _ => None,
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            max_failures: self.config.max_failures,
            retry_in_ms,
        }
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// Returns [`BreakerError::Open`] without invoking the operation when the
    /// breaker is open, or half-open with a probe already in flight.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Ok(Admission::Normal) => {
                let result = operation().await;
                self.record(result.is_ok(), false);
                result.map_err(BreakerError::Inner)
            }
            Ok(Admission::Probe) => {
                let mut guard = ProbeGuard {
                    breaker: self,
                    armed: true,
                };
                let result = operation().await;
                guard.armed = false;
                self.record(result.is_ok(), true);
                result.map_err(BreakerError::Inner)
            }
            Err(retry_in) => {
                metrics::record_breaker_rejection(&self.name);
                tracing::debug!(breaker = %self.name, retry_in = ?retry_in, "Circuit open, rejecting call");
                Err(BreakerError::Open {
                    breaker: self.name.clone(),
                    retry_in,
                })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remaining_cooldown(&self, inner: &BreakerInner, now: Instant) -> Duration {
        let elapsed = inner
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        self.config.cooldown().saturating_sub(elapsed)
    }

    /// Decide admission. `Err` carries the retry hint for a rejection.
    fn admit(&self) -> Result<Admission, Option<Duration>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown(&inner, now);
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.cooldown() {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    drop(inner);
                    metrics::record_breaker_state(&self.name, CircuitState::HalfOpen.as_gauge());
                    tracing::info!(breaker = %self.name, "Circuit half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    Err(Some(remaining.max(Duration::from_millis(1))))
                }
            }
            CircuitState::HalfOpen => Err(None),
        }
    }

    fn record(&self, success: bool, probe: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();

        let transition = if probe {
            inner.probe_in_flight = false;
            if success {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.last_failure = None;
                Some(Transition::Closed)
            } else {
                inner.state = CircuitState::Open;
                inner.failures = inner.failures.saturating_add(1);
                inner.last_failure = Some(now);
                Some(Transition::Opened {
                    failures: inner.failures,
                })
            }
        } else if inner.state != CircuitState::Closed {
            // Started before the breaker opened; the verdict is already in.
            None
        } else if success {
            inner.failures = 0;
            None
        } else {
            inner.failures = inner.failures.saturating_add(1);
            inner.last_failure = Some(now);
            if inner.failures >= self.config.max_failures {
                inner.state = CircuitState::Open;
                Some(Transition::Opened {
                    failures: inner.failures,
                })
            } else {
                None
            }
        };
        drop(inner);

        match transition {
            Some(Transition::Opened { failures }) => {
                metrics::record_breaker_state(&self.name, CircuitState::Open.as_gauge());
                tracing::warn!(
                    breaker = %self.name,
                    failures,
                    cooldown_ms = self.config.cooldown_ms,
                    "Circuit opened"
                );
                self.events.emit(
                    GovernanceEvent::new(EventKind::CircuitOpened, self.name.as_str())
                        .with_detail("failures", failures)
                        .with_detail("cooldown_ms", self.config.cooldown_ms),
                );
            }
            Some(Transition::Closed) => {
                metrics::record_breaker_state(&self.name, CircuitState::Closed.as_gauge());
                tracing::info!(breaker = %self.name, "Circuit closed");
                self.events
                    .emit(GovernanceEvent::new(EventKind::CircuitClosed, self.name.as_str()));
            }
            None => {}
        }
    }

    /// Probe dropped before a verdict. Back to open with the cooldown already
    /// elapsed, so the next caller becomes the probe.
    fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
            drop(inner);
            metrics::record_breaker_state(&self.name, CircuitState::Open.as_gauge());
            tracing::debug!(breaker = %self.name, "Probe cancelled, slot released");
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failures", &inner.failures)
            .finish()
    }
}

/// RAII guard releasing the probe slot if the probe future is dropped.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_probe();
        }
    }
}
