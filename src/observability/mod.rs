//! Observability for the revision core
//!
//! This module provides:
//! - Structured JSON logging with a minimum severity
//! - Typed event names
//! - Atomic counters
//!
//! # Usage
//!
//! ```ignore
//! use aerorev::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::BranchSwitch, &[("doc_id", "doc1"), ("remote", "1")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_conflicts_detected();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
