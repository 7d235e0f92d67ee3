//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke a failing operation with exponential backoff + jitter
//! - Bound the total number of attempts (`max_attempts` retries after the first)
//! - Surface the last attempt's own error, unwrapped
//!
//! The backoff sleeps are the only suspension points; dropping the returned
//! future cancels a pending sleep and no further attempt is made.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::observability::events::{EventKind, EventSink, GovernanceEvent};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Per-call retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to sleep after a failure at zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            duration_ms(self.base_delay),
            duration_ms(self.max_delay),
        )
    }

    /// Total attempts including the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Retry `operation` under `policy` without reporting governance events.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    run("unnamed", policy, &EventSink::disabled(), |_| true, operation).await
}

/// Retry executor carrying a default policy and the event sink.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    events: EventSink,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, events: EventSink) -> Self {
        Self { policy, events }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute with the default policy.
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        run(operation_name, &self.policy, &self.events, |_| true, operation).await
    }

    /// Execute with an explicit policy.
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        operation_name: &str,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        run(operation_name, policy, &self.events, |_| true, operation).await
    }

    /// Execute with the default policy, retrying only errors `retryable` accepts.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        retryable: P,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: FnMut(&E) -> bool,
    {
        run(operation_name, &self.policy, &self.events, retryable, operation).await
    }
}

async fn run<F, Fut, T, E, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    events: &EventSink,
    mut retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: FnMut(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !retryable(&err) => {
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %err,
                    "Error not retryable"
                );
                return Err(err);
            }
            Err(err) if attempt >= policy.max_attempts => {
                let attempts = attempt.saturating_add(1);
                tracing::warn!(operation = operation_name, attempts, error = %err, "Retries exhausted");
                metrics::record_retry_exhausted(operation_name);
                events.emit(
                    GovernanceEvent::new(EventKind::RetryExhausted, operation_name)
                        .with_detail("attempts", attempts)
                        .with_detail("error", err.to_string()),
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                tracing::info!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay = ?delay,
                    error = %err,
                    "Retrying after failure"
                );
                metrics::record_retry(operation_name);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Eq)]
    struct Failed(u32);

    impl Display for Failed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "attempt {} failed", self.0)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::from_millis(1_000))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_three_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    Err(Failed(n))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Failed> = with_retry(&policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(Failed(n)) }
        })
        .await;

        assert_eq!(result, Err(Failed(4)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_means_single_try() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result: Result<(), Failed> = with_retry(&policy(0), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(Failed(n)) }
        })
        .await;

        assert_eq!(result, Err(Failed(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn total_backoff_is_bounded() {
        let start = tokio::time::Instant::now();
        let _: Result<(), Failed> = with_retry(&policy(5), || async { Err(Failed(0)) }).await;
        let elapsed = start.elapsed();

        // 100 + 200 + 400 + 800 + 1000 deterministic, jitter capped by max per sleep.
        assert!(elapsed >= Duration::from_millis(2_500), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(5_000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_emits_event() {
        let (sink, mut rx) = EventSink::channel();
        let executor = RetryExecutor::new(policy(2), sink);

        let result: Result<(), Failed> = executor
            .execute("inference.submit", || async { Err(Failed(7)) })
            .await;

        assert_eq!(result, Err(Failed(7)));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::RetryExhausted);
        assert_eq!(event.subject, "inference.submit");
        assert_eq!(event.detail["attempts"], 3);
        assert_eq!(event.detail["error"], "attempt 7 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn success_emits_nothing() {
        let (sink, mut rx) = EventSink::channel();
        let executor = RetryExecutor::new(policy(2), sink);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("db.read", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err(Failed(n)) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let executor = RetryExecutor::new(policy(5), EventSink::disabled());
        let calls = AtomicU32::new(0);

        let result: Result<(), Failed> = executor
            .execute_if(
                "storage.put",
                |err: &Failed| err.0 < 2,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Err(Failed(n)) }
                },
            )
            .await;

        assert_eq!(result, Err(Failed(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_error_is_not_reported_as_exhaustion() {
        let (sink, mut rx) = EventSink::channel();
        let executor = RetryExecutor::new(policy(0), sink);
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = executor
            .execute_if(
                "auth.verify",
                |_| false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
            )
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_policy_overrides_default() {
        let (sink, mut rx) = EventSink::channel();
        let executor = RetryExecutor::new(policy(5), sink);
        let calls = AtomicU32::new(0);

        let result: Result<(), Failed> = executor
            .execute_with("storage.get", &policy(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(Failed(n)) }
            })
            .await;

        assert_eq!(result, Err(Failed(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.detail["attempts"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_future_cancels_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let slow = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(60));

        let outcome = tokio::time::timeout(Duration::from_secs(1), async move {
            with_retry(&slow, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failed(0)) }
            })
            .await
        })
        .await;

        assert!(outcome.is_err(), "retry loop should have been cancelled");
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_from_config() {
        let p = RetryPolicy::from(&RetryConfig {
            max_attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 500,
        });
        assert_eq!(p.total_attempts(), 5);
        assert_eq!(p.base_delay, Duration::from_millis(50));
        assert!(p.delay_for(10) <= Duration::from_millis(500));
    }
}
