//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use request_governor::clock::ManualClock;
use request_governor::config::{CircuitBreakerConfig, GovernorConfig, RateLimitConfig};
use request_governor::observability::{EventReceiver, EventSink};
use request_governor::{Governance, HttpServer, Shutdown};

/// Config with small limits so scenarios stay short.
pub fn test_config() -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config.rate_limits.auth = RateLimitConfig::new(5, 60_000, 900_000, 3);
    config.rate_limits.admin = RateLimitConfig::new(3, 60_000, 300_000, 5);
    config.circuit_breakers.inference = CircuitBreakerConfig::new(2, 1_000);
    config.retries.max_attempts = 3;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 100;
    config
}

/// Governance driven by a manual clock, with its event receiver.
pub fn governed(config: &GovernorConfig) -> (Arc<Governance>, ManualClock, EventReceiver) {
    let clock = ManualClock::new();
    let (sink, rx) = EventSink::channel();
    let governance = Governance::with_clock(config, sink, clock.shared());
    (Arc::new(governance), clock, rx)
}

/// Start the HTTP server on an ephemeral port.
pub async fn start_server(
    config: &GovernorConfig,
    governance: Arc<Governance>,
) -> (SocketAddr, Shutdown, JoinHandle<Result<(), std::io::Error>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, governance);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));
    (addr, shutdown, handle)
}

pub fn request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_as(uri: &str, subject: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-subject-id", subject)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Downstream stub that fails its first `failures` calls.
#[derive(Clone, Default)]
pub struct FlakyDownstream {
    calls: Arc<AtomicU32>,
    failures: u32,
}

impl FlakyDownstream {
    pub fn failing(failures: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub async fn call(&self) -> Result<&'static str, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(format!("downstream failure #{n}"))
        } else {
            Ok("ok")
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
