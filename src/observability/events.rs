//! Governance events.
//!
//! Components report significant transitions (block triggered, breaker opened
//! or closed, retries exhausted) as plain facts. Delivery is fire-and-forget:
//! [`EventSink::emit`] never blocks and never fails the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Kind of governance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RateLimitViolationsExceeded,
    CircuitOpened,
    CircuitClosed,
    RetryExhausted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RateLimitViolationsExceeded => "RATE_LIMIT_VIOLATIONS_EXCEEDED",
            EventKind::CircuitOpened => "CIRCUIT_OPENED",
            EventKind::CircuitClosed => "CIRCUIT_CLOSED",
            EventKind::RetryExhausted => "RETRY_EXHAUSTED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single governance fact destined for the audit/notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceEvent {
    /// Unique event ID.
    pub id: Uuid,
    pub kind: EventKind,
    /// Caller identifier (rate limiter) or operation name (breaker, retry).
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: Map<String, Value>,
}

impl GovernanceEvent {
    pub fn new(kind: EventKind, subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            subject: subject.into(),
            timestamp: Utc::now(),
            detail: Map::new(),
        }
    }

    /// Attach a detail field.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// Receiving half handed to whatever forwards events to the external sink.
pub type EventReceiver = mpsc::UnboundedReceiver<GovernanceEvent>;

/// Cheap, cloneable emitter for governance events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<GovernanceEvent>>,
}

impl EventSink {
    /// Create a connected sink and its receiver.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event. Delivery failures are discarded.
    pub fn emit(&self, event: GovernanceEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(event) {
            tracing::debug!(kind = %err.0.kind, subject = %err.0.subject, "Event sink closed, dropping event");
        }
    }
}

/// Default consumer: writes each event as a structured audit log record.
///
/// Runs until the sender side is gone or shutdown is signalled; events already
/// queued at shutdown are flushed first.
pub async fn run_event_logger(mut rx: EventReceiver, mut shutdown: broadcast::Receiver<()>) {
    tracing::debug!("Event logger started");
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = shutdown.recv() => {
                while let Ok(event) = rx.try_recv() {
                    log_event(&event);
                }
                break;
            }
        }
    }
    tracing::debug!("Event logger stopped");
}

fn log_event(event: &GovernanceEvent) {
    match serde_json::to_string(event) {
        Ok(body) => tracing::info!(
            target: "governor::audit",
            kind = event.kind.as_str(),
            subject = %event.subject,
            event = %body,
            "Governance event"
        ),
        Err(e) => tracing::warn!(kind = event.kind.as_str(), error = %e, "Failed to serialize governance event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_screaming_snake_case() {
        let event = GovernanceEvent::new(EventKind::RateLimitViolationsExceeded, "u1")
            .with_detail("violations", 3);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "RATE_LIMIT_VIOLATIONS_EXCEEDED");
        assert_eq!(json["subject"], "u1");
        assert_eq!(json["detail"]["violations"], 3);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn as_str_matches_serde_name() {
        for kind in [
            EventKind::RateLimitViolationsExceeded,
            EventKind::CircuitOpened,
            EventKind::CircuitClosed,
            EventKind::RetryExhausted,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn emit_delivers_to_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(GovernanceEvent::new(EventKind::CircuitOpened, "inference"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::CircuitOpened);
        assert_eq!(event.subject, "inference");
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(GovernanceEvent::new(EventKind::RetryExhausted, "op"));
        EventSink::disabled().emit(GovernanceEvent::new(EventKind::RetryExhausted, "op"));
    }

    #[tokio::test]
    async fn logger_drains_and_exits_on_shutdown() {
        let (sink, rx) = EventSink::channel();
        let (tx, shutdown) = broadcast::channel(1);

        sink.emit(GovernanceEvent::new(EventKind::CircuitClosed, "database"));
        let handle = tokio::spawn(run_event_logger(rx, shutdown));
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("logger did not stop")
            .unwrap();
    }
}
