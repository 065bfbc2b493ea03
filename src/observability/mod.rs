//! Observability
//!
//! Registry counters and their Prometheus export.

pub mod metrics;
