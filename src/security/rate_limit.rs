//! Sliding-window rate limiting with progressive lockout.
//!
//! Each identifier keeps the instants of its admitted requests inside the
//! trailing window. Calls over the limit count as violations; enough of them
//! and the identifier is blocked outright for `block_ms`, whatever the window
//! says. A block that is found expired resets the violation count.
//!
//! All per-identifier state lives in one `DashMap` entry, so the whole
//! check-then-act sequence of [`RateLimiter::is_allowed`] runs under that
//! entry's shard lock.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{self, SharedClock};
use crate::config::RateLimitConfig;
use crate::http::response::GovernanceError;
use crate::observability::events::{EventKind, EventSink, GovernanceEvent};
use crate::observability::metrics;

/// Header carrying the authenticated subject, set by the identity layer.
pub const X_SUBJECT_ID: HeaderName = HeaderName::from_static("x-subject-id");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Per-identifier limiter state.
#[derive(Debug, Default)]
struct ClientWindow {
    /// Admission instants, oldest first.
    timestamps: VecDeque<Instant>,
    violations: u32,
    blocked_until: Option<Instant>,
}

impl ClientWindow {
    fn block_active(&self, now: Instant) -> bool {
        matches!(self.blocked_until, Some(until) if now < until)
    }

    /// Clear an expired block. Returns true if one was cleared.
    fn expire_block(&mut self, now: Instant) -> bool {
        match self.blocked_until {
            Some(until) if now >= until => {
                self.blocked_until = None;
                self.violations = 0;
                true
            }
            _ => false,
        }
    }

    /// Drop timestamps at or before `window_start`. Returns how many went.
    fn prune(&mut self, window_start: Option<Instant>) -> usize {
        let Some(start) = window_start else {
            return 0;
        };
        let before = self.timestamps.len();
        while matches!(self.timestamps.front(), Some(ts) if *ts <= start) {
            self.timestamps.pop_front();
        }
        before - self.timestamps.len()
    }

    fn valid(&self, window_start: Option<Instant>) -> impl Iterator<Item = &Instant> {
        self.timestamps
            .iter()
            .filter(move |ts| window_start.map_or(true, |start| **ts > start))
    }
}

/// Point-in-time view of one identifier's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the oldest admission in the window ages out.
    pub reset_in_ms: Option<u64>,
    /// Time left on an active block.
    pub blocked_for_ms: Option<u64>,
    pub violations: u32,
}

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub pruned_timestamps: usize,
    pub expired_blocks: usize,
    pub removed: usize,
    pub remaining: usize,
}

/// Sliding-window limiter for one traffic class.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    clients: DashMap<String, ClientWindow>,
    clock: SharedClock,
    events: EventSink,
}

impl RateLimiter {
    /// Create a limiter using the system clock.
    pub fn new(name: impl Into<String>, config: RateLimitConfig, events: EventSink) -> Self {
        Self {
            name: name.into(),
            config,
            clients: DashMap::new(),
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

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.clients.len()
    }

    fn window_start(&self, now: Instant) -> Option<Instant> {
        now.checked_sub(self.config.window())
    }

    /// Admit or deny one unit of work for `identifier`, optionally scoped to
    /// an endpoint tag.
    pub fn is_allowed(&self, identifier: &str, endpoint: Option<&str>) -> bool {
        if identifier.is_empty() {
            tracing::warn!(limiter = %self.name, "Rejecting request with empty identifier");
            metrics::record_rate_limited(&self.name);
            return false;
        }

        let mut window = self.clients.entry(scoped_key(identifier, endpoint)).or_default();
        // Read time under the entry lock so timestamps stay ordered.
        let now = self.clock.now();

        if window.block_active(now) {
            tracing::trace!(limiter = %self.name, client = %window.key(), "Blocked identifier denied");
            metrics::record_rate_limited(&self.name);
            return false;
        }

        if window.expire_block(now) {
            tracing::info!(limiter = %self.name, client = %window.key(), "Block expired, violations reset");
        }

        window.prune(self.window_start(now));

        if window.timestamps.len() >= self.config.max_requests as usize {
            window.violations += 1;
            let violations = window.violations;

            if violations >= self.config.max_violations {
                let until = now + self.config.block_duration();
                window.blocked_until = Some(until);
                let client = window.key().clone();
                drop(window);

                tracing::warn!(
                    limiter = %self.name,
                    client = %client,
                    violations,
                    block_ms = self.config.block_ms,
                    "Rate limit violations exceeded, blocking"
                );
                metrics::record_block(&self.name);
                self.events.emit(
                    GovernanceEvent::new(EventKind::RateLimitViolationsExceeded, client)
                        .with_detail("limiter", self.name.clone())
                        .with_detail("violations", violations)
                        .with_detail("max_requests", self.config.max_requests)
                        .with_detail("window_ms", self.config.window_ms)
                        .with_detail("block_ms", self.config.block_ms),
                );
            } else {
                tracing::debug!(
                    limiter = %self.name,
                    client = %window.key(),
                    violations,
                    "Rate limit exceeded"
                );
            }

            metrics::record_rate_limited(&self.name);
            return false;
        }

        window.timestamps.push_back(now);
        true
    }

    /// Admissions left in the current window, clamped at zero.
    pub fn remaining_quota(&self, identifier: &str) -> u32 {
        self.status(identifier).remaining
    }

    /// When the oldest admission in the current window ages out, or `None`
    /// if the window is empty.
    pub fn reset_instant(&self, identifier: &str) -> Option<Instant> {
        let now = self.clock.now();
        let start = self.window_start(now);
        let client = self.clients.get(identifier)?;
        let oldest = client.valid(start).next().copied();
        oldest.map(|oldest| oldest + self.config.window())
    }

    /// Whether `identifier` is under an active block.
    pub fn is_blocked(&self, identifier: &str) -> bool {
        let now = self.clock.now();
        self.clients
            .get(identifier)
            .is_some_and(|client| client.block_active(now))
    }

    /// How long a caller should wait before trying again.
    ///
    /// Zero when a call would currently be admitted.
    pub fn retry_after(&self, identifier: &str) -> Duration {
        let status = self.status(identifier);
        if let Some(blocked) = status.blocked_for_ms {
            return Duration::from_millis(blocked);
        }
        if status.remaining == 0 {
            return Duration::from_millis(status.reset_in_ms.unwrap_or(self.config.window_ms));
        }
        Duration::ZERO
    }

    /// Snapshot of an identifier's quota without mutating it.
    pub fn status(&self, identifier: &str) -> QuotaStatus {
        let now = self.clock.now();
        let start = self.window_start(now);
        let limit = self.config.max_requests;

        let Some(client) = self.clients.get(identifier) else {
            return QuotaStatus {
                limit,
                remaining: limit,
                reset_in_ms: None,
                blocked_for_ms: None,
                violations: 0,
            };
        };

        let mut valid = client.valid(start);
        let oldest = valid.next().copied();
        let count = oldest.map_or(0, |_| 1 + valid.count());

        let blocked_for_ms = client
            .blocked_until
            .filter(|until| now < *until)
            .map(|until| millis(until - now));
        // An expired block has not been reset yet but will be on the next call.
        let violations = match client.blocked_until {
            Some(until) if now >= until => 0,
            _ => client.violations,
        };

        QuotaStatus {
            limit,
            remaining: limit.saturating_sub(count as u32),
            reset_in_ms: oldest.map(|ts| millis((ts + self.config.window()).saturating_duration_since(now))),
            blocked_for_ms,
            violations,
        }
    }

    /// Sweep expired timestamps and blocks; drop idle identifiers.
    pub fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let start = self.window_start(now);
        let before = self.clients.len();
        let mut report = CleanupReport::default();

        self.clients.retain(|_, client| {
            if client.expire_block(now) {
                report.expired_blocks += 1;
            }
            report.pruned_timestamps += client.prune(start);
            !client.timestamps.is_empty() || client.blocked_until.is_some()
        });

        report.remaining = self.clients.len();
        report.removed = before.saturating_sub(report.remaining);

        tracing::debug!(
            limiter = %self.name,
            pruned = report.pruned_timestamps,
            expired_blocks = report.expired_blocks,
            removed = report.removed,
            remaining = report.remaining,
            "Rate limiter cleanup"
        );
        metrics::record_tracked(&self.name, report.remaining);
        report
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until shutdown.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(limiter = %self.name, interval = ?interval, "Cleanup sweep starting");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.cleanup();
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!(limiter = %self.name, "Cleanup sweep received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("tracked", &self.clients.len())
            .finish()
    }
}

/// Key under which an identifier is tracked, scoped by endpoint when given.
pub fn scoped_key(identifier: &str, endpoint: Option<&str>) -> String {
    match endpoint {
        Some(endpoint) if !endpoint.is_empty() => format!("{identifier}:{endpoint}"),
        _ => identifier.to_string(),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Middleware state: which limiter guards the route and how callers are keyed.
#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: Arc<RateLimiter>,
    /// Track each path separately instead of one budget per caller.
    pub per_endpoint: bool,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            per_endpoint: false,
        }
    }

    pub fn per_endpoint(mut self) -> Self {
        self.per_endpoint = true;
        self
    }
}

/// Caller identity: the authenticated subject if present, else the peer IP.
pub fn caller_identity(request: &Request<Body>) -> String {
    if let Some(subject) = request
        .headers()
        .get(&X_SUBJECT_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return subject.to_string();
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "anonymous".to_string(),
    }
}

/// Endpoint tag for per-endpoint budgets: the route template when the request
/// matched one, so path parameters never mint new keys.
fn endpoint_tag(request: &Request<Body>) -> String {
    match request.extensions().get::<MatchedPath>() {
        Some(path) => path.as_str().to_string(),
        None => request.uri().path().to_string(),
    }
}

/// Middleware function admitting requests through a traffic-class limiter.
pub async fn rate_limit_middleware(
    State(guard): State<RateLimitGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identity = caller_identity(&request);
    let endpoint = guard.per_endpoint.then(|| endpoint_tag(&request));
    let limiter = &guard.limiter;

    let key = scoped_key(&identity, endpoint.as_deref());
    if !limiter.is_allowed(&identity, endpoint.as_deref()) {
        let status = limiter.status(&key);
        tracing::warn!(
            class = %limiter.name(),
            client = %key,
            blocked = status.blocked_for_ms.is_some(),
            "Rate limit exceeded"
        );
        return GovernanceError::RateLimited {
            class: limiter.name().to_string(),
            limit: status.limit,
            retry_after: limiter.retry_after(&key),
        }
        .into_response();
    }

    let remaining = limiter.remaining_quota(&key);
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limiter.config().max_requests));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    response
}
