//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Limiter / breakers / retry executor produce:
//!     → logging.rs (structured log records via tracing)
//!     → metrics.rs (counters and gauges)
//!     → events.rs  (governance facts for the audit sink)
//!
//! Consumers:
//!     → stdout (compact or JSON)
//!     → Prometheus scrape endpoint
//!     → audit/notification sink (fire-and-forget channel)
//! ```
//!
//! # Design Decisions
//! - Event delivery never influences an admission or execution decision
//! - Metric updates are cheap and lock-free from the caller's view

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventKind, EventReceiver, EventSink, GovernanceEvent};
