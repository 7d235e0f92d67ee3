//! Composition root.
//!
//! Builds one limiter per traffic class and one breaker per downstream
//! category from configuration, owns the event sink and the retry executor,
//! and starts the background cleanup sweeps. Handlers receive a shared
//! [`Governance`] through axum state.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::{self, SharedClock};
use crate::config::{Downstream, GovernorConfig, TrafficClass};
use crate::lifecycle::Shutdown;
use crate::observability::events::EventSink;
use crate::resilience::{BreakerError, BreakerSnapshot, CircuitBreaker, RetryExecutor, RetryPolicy};
use crate::security::rate_limit::RateLimiter;

/// One limiter per traffic class.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub api: Arc<RateLimiter>,
    pub auth: Arc<RateLimiter>,
    pub upload: Arc<RateLimiter>,
    pub admin: Arc<RateLimiter>,
    pub diagnosis: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn get(&self, class: TrafficClass) -> &Arc<RateLimiter> {
        match class {
            TrafficClass::Api => &self.api,
            TrafficClass::Auth => &self.auth,
            TrafficClass::Upload => &self.upload,
            TrafficClass::Admin => &self.admin,
            TrafficClass::Diagnosis => &self.diagnosis,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrafficClass, &Arc<RateLimiter>)> {
        TrafficClass::ALL.into_iter().map(move |class| (class, self.get(class)))
    }
}

/// One breaker per downstream category.
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    pub inference: Arc<CircuitBreaker>,
    pub database: Arc<CircuitBreaker>,
    pub storage: Arc<CircuitBreaker>,
}

impl CircuitBreakers {
    pub fn get(&self, downstream: Downstream) -> &Arc<CircuitBreaker> {
        match downstream {
            Downstream::Inference => &self.inference,
            Downstream::Database => &self.database,
            Downstream::Storage => &self.storage,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CircuitBreaker>> {
        Downstream::ALL.into_iter().map(move |d| self.get(d))
    }
}

/// Limiter occupancy for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStatus {
    pub class: TrafficClass,
    pub tracked: usize,
    pub max_requests: u32,
    pub window_ms: u64,
    pub block_ms: u64,
    pub max_violations: u32,
}

/// Aggregate view served at `/governance/status`.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceStatus {
    pub limiters: Vec<LimiterStatus>,
    pub breakers: Vec<BreakerSnapshot>,
}

/// All governance primitives for one process.
#[derive(Debug)]
pub struct Governance {
    pub limiters: RateLimiters,
    pub breakers: CircuitBreakers,
    pub retry: RetryExecutor,
    cleanup_interval: Duration,
}

impl Governance {
    /// Construct every limiter and breaker from configuration.
    pub fn from_config(config: &GovernorConfig, events: EventSink) -> Self {
        Self::with_clock(config, events, clock::system())
    }

    /// Same as [`from_config`](Self::from_config) with an explicit time source.
    pub fn with_clock(config: &GovernorConfig, events: EventSink, clock: SharedClock) -> Self {
        let limiter = |class: TrafficClass| {
            Arc::new(
                RateLimiter::new(class.as_str(), *config.rate_limits.get(class), events.clone())
                    .with_clock(clock.clone()),
            )
        };
        let breaker = |downstream: Downstream| {
            Arc::new(
                CircuitBreaker::new(
                    downstream.as_str(),
                    *config.circuit_breakers.get(downstream),
                    events.clone(),
                )
                .with_clock(clock.clone()),
            )
        };

        let limiters = RateLimiters {
            api: limiter(TrafficClass::Api),
            auth: limiter(TrafficClass::Auth),
            upload: limiter(TrafficClass::Upload),
            admin: limiter(TrafficClass::Admin),
            diagnosis: limiter(TrafficClass::Diagnosis),
        };
        let breakers = CircuitBreakers {
            inference: breaker(Downstream::Inference),
            database: breaker(Downstream::Database),
            storage: breaker(Downstream::Storage),
        };

        tracing::info!(
            classes = TrafficClass::ALL.len(),
            breakers = Downstream::ALL.len(),
            "Governance initialized"
        );

        Self {
            limiters,
            breakers,
            retry: RetryExecutor::new(RetryPolicy::from(&config.retries), events),
            cleanup_interval: config.cleanup.interval(),
        }
    }

    pub fn limiter(&self, class: TrafficClass) -> &Arc<RateLimiter> {
        self.limiters.get(class)
    }

    pub fn breaker(&self, downstream: Downstream) -> &Arc<CircuitBreaker> {
        self.breakers.get(downstream)
    }

    /// Start one cleanup sweep per limiter; each stops on shutdown.
    pub fn start_background(&self, shutdown: &Shutdown) {
        for (class, limiter) in self.limiters.iter() {
            let handle = limiter.clone().spawn_cleanup(self.cleanup_interval, shutdown.subscribe());
            shutdown.track(handle);
            tracing::debug!(class = %class, "Cleanup sweep scheduled");
        }
    }

    /// Run `operation` through the downstream's breaker with the default
    /// retry policy inside it. Exhausted retries count as one breaker failure.
    pub async fn call<F, Fut, T, E>(
        &self,
        downstream: Downstream,
        operation_name: &str,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.breaker(downstream)
            .execute(|| self.retry.execute(operation_name, operation))
            .await
    }

    pub fn status(&self) -> GovernanceStatus {
        let limiters = self
            .limiters
            .iter()
            .map(|(class, limiter)| {
                let config = limiter.config();
                LimiterStatus {
                    class,
                    tracked: limiter.tracked(),
                    max_requests: config.max_requests,
                    window_ms: config.window_ms,
                    block_ms: config.block_ms,
                    max_violations: config.max_violations,
                }
            })
            .collect();
        let breakers = self.breakers.iter().map(|b| b.snapshot()).collect();

        GovernanceStatus { limiters, breakers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CircuitBreakerConfig, RateLimitConfig};
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn governance() -> (Governance, ManualClock) {
        let clock = ManualClock::new();
        let mut config = GovernorConfig::default();
        config.rate_limits.auth = RateLimitConfig::new(2, 1_000, 5_000, 1);
        config.circuit_breakers.inference = CircuitBreakerConfig::new(1, 1_000);
        config.retries.max_attempts = 2;
        config.retries.base_delay_ms = 10;
        config.retries.max_delay_ms = 20;
        (Governance::with_clock(&config, EventSink::disabled(), clock.shared()), clock)
    }

    #[test]
    fn classes_are_independent() {
        let (gov, _clock) = governance();
        let auth = gov.limiter(TrafficClass::Auth);
        assert!(auth.is_allowed("u1", None));
        assert!(auth.is_allowed("u1", None));
        assert!(!auth.is_allowed("u1", None));

        assert!(gov.limiter(TrafficClass::Api).is_allowed("u1", None));
        assert_eq!(auth.name(), "auth");
    }

    #[test]
    fn status_lists_every_limiter_and_breaker() {
        let (gov, _clock) = governance();
        gov.limiter(TrafficClass::Upload).is_allowed("u1", None);

        let status = gov.status();
        assert_eq!(status.limiters.len(), 5);
        assert_eq!(status.breakers.len(), 3);
        let upload = status
            .limiters
            .iter()
            .find(|l| l.class == TrafficClass::Upload)
            .unwrap();
        assert_eq!(upload.tracked, 1);
        assert!(status.breakers.iter().all(|b| b.state == CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_count_as_one_breaker_failure() {
        let (gov, _clock) = governance();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = gov
            .call(Downstream::Inference, "inference.diagnose", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unavailable") }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Inner("unavailable"))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gov.breaker(Downstream::Inference).state(), CircuitState::Open);

        let rejected: Result<(), BreakerError<&str>> = gov
            .call(Downstream::Inference, "inference.diagnose", || async { Ok(()) })
            .await;
        assert!(rejected.is_err_and(|e| e.is_open()));
    }

    #[tokio::test]
    async fn background_sweeps_stop_on_drain() {
        let (gov, _clock) = governance();
        let shutdown = Shutdown::new();
        gov.start_background(&shutdown);

        assert_eq!(shutdown.receiver_count(), 5);
        assert!(shutdown.drain(Duration::from_secs(1)).await);
    }
}
