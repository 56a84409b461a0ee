//! Metrics module.
//!
//! In-process counters for worker pools, plugin invocations and
//! deduplication outcomes. Pool occupancy is sampled by the pool monitor.

mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};
