//! Exponential backoff with jitter.
//!
//! `attempt` is zero-based: the delay after the first failed try uses
//! `attempt = 0`, i.e. `base * 2^0 + jitter`.

use std::time::Duration;

use rand::Rng;

/// Deterministic component: `base_ms * 2^attempt`, capped at `max_ms`.
pub fn exponential_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Random jitter in `[0, base_ms)`.
pub fn jitter(base_ms: u64) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
}

/// Calculate exponential backoff delay with jitter, never above `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay = exponential_delay(attempt, base_ms, max_ms) + jitter(base_ms);
    delay.min(Duration::from_millis(max_ms))
}
