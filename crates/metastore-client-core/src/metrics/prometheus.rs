//! Prometheus metrics for the metastore client.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Client metrics collection.
///
/// One instance can be shared by any number of connectors; the caller
/// decides whether to expose [`ClientMetrics::registry`].
pub struct ClientMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Transport builds attempted, one per endpoint per pass.
    pub connect_attempts: IntCounter,

    /// Failed transport builds by error class.
    pub connect_failures: IntCounterVec,

    /// Connect calls that exhausted every endpoint and pass.
    pub connect_exhausted: IntCounter,

    /// Explicit reconnects.
    pub reconnects: IntCounter,

    /// Connections currently open through connectors using these metrics.
    pub open_connections: IntGauge,

    /// Event pages rejected because ids were missing.
    pub missing_events: IntCounter,

    /// Time from the first attempt until a connection was established.
    pub connect_duration_seconds: Histogram,
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}

impl ClientMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let connect_attempts = IntCounter::new(
            "metastore_client_connect_attempts_total",
            "Total number of transport builds attempted",
        )
        .expect("metric creation should succeed");

        let connect_failures = IntCounterVec::new(
            Opts::new(
                "metastore_client_connect_failures_total",
                "Total number of failed transport builds by error class",
            ),
            &["error_type"],
        )
        .expect("metric creation should succeed");

        let connect_exhausted = IntCounter::new(
            "metastore_client_connect_exhausted_total",
            "Total number of connects that failed on every endpoint",
        )
        .expect("metric creation should succeed");

        let reconnects = IntCounter::new(
            "metastore_client_reconnects_total",
            "Total number of explicit reconnects",
        )
        .expect("metric creation should succeed");

        let open_connections = IntGauge::new(
            "metastore_client_open_connections",
            "Current number of open metastore connections",
        )
        .expect("metric creation should succeed");

        let missing_events = IntCounter::new(
            "metastore_client_missing_events_total",
            "Total number of notification pages with missing event ids",
        )
        .expect("metric creation should succeed");

        let connect_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "metastore_client_connect_duration_seconds",
                "Time to establish a metastore connection in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(connect_attempts.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(connect_failures.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(connect_exhausted.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(reconnects.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(open_connections.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(missing_events.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(connect_duration_seconds.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            connect_attempts,
            connect_failures,
            connect_exhausted,
            reconnects,
            open_connections,
            missing_events,
            connect_duration_seconds,
        }
    }

    pub fn record_attempt(&self) {
        self.connect_attempts.inc();
    }

    pub fn record_failure(&self, error_type: &str) {
        self.connect_failures.with_label_values(&[error_type]).inc();
    }

    pub fn record_exhausted(&self) {
        self.connect_exhausted.inc();
    }

    pub fn record_reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn record_connected(&self, duration_seconds: f64) {
        self.open_connections.inc();
        self.connect_duration_seconds.observe(duration_seconds);
    }

    pub fn record_closed(&self) {
        self.open_connections.dec();
    }

    pub fn record_missing_events(&self) {
        self.missing_events.inc();
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}
