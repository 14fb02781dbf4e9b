//! Metrics for metastore connections.
//!
//! Provides Prometheus-compatible counters for connection attempts,
//! failover and event feed health.

pub mod prometheus;

pub use prometheus::ClientMetrics;
