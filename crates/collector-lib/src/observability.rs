//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus metrics (active monitors, sample flow, write failures)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for store write latency (in seconds)
const WRITE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    active_monitors: IntGauge,
    samples_emitted: IntCounter,
    samples_written: IntCounter,
    write_errors: IntCounter,
    databases_created: IntCounter,
    containers_skipped: IntCounter,
    monitor_start_failures: IntCounter,
    write_latency_seconds: Histogram,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            active_monitors: register_int_gauge!(
                "docker_collector_active_monitors",
                "Number of containers currently being monitored"
            )
            .expect("Failed to register active_monitors"),

            samples_emitted: register_int_counter!(
                "docker_collector_samples_emitted_total",
                "Samples produced by monitors after decimation"
            )
            .expect("Failed to register samples_emitted"),

            samples_written: register_int_counter!(
                "docker_collector_samples_written_total",
                "Samples successfully written to the time-series store"
            )
            .expect("Failed to register samples_written"),

            write_errors: register_int_counter!(
                "docker_collector_write_errors_total",
                "Batch writes that failed and were dropped"
            )
            .expect("Failed to register write_errors"),

            databases_created: register_int_counter!(
                "docker_collector_databases_created_total",
                "Databases created after a missing-database write failure"
            )
            .expect("Failed to register databases_created"),

            containers_skipped: register_int_counter!(
                "docker_collector_containers_skipped_total",
                "Containers skipped because they carry no app identity"
            )
            .expect("Failed to register containers_skipped"),

            monitor_start_failures: register_int_counter!(
                "docker_collector_monitor_start_failures_total",
                "Monitor start attempts that failed"
            )
            .expect("Failed to register monitor_start_failures"),

            write_latency_seconds: register_histogram!(
                "docker_collector_write_latency_seconds",
                "Time spent writing one sample batch to the store",
                WRITE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register write_latency_seconds"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    pub fn set_active_monitors(&self, count: usize) {
        self.inner().active_monitors.set(count as i64);
    }

    pub fn inc_samples_emitted(&self) {
        self.inner().samples_emitted.inc();
    }

    pub fn inc_samples_written(&self) {
        self.inner().samples_written.inc();
    }

    pub fn inc_write_errors(&self) {
        self.inner().write_errors.inc();
    }

    pub fn inc_databases_created(&self) {
        self.inner().databases_created.inc();
    }

    pub fn inc_containers_skipped(&self) {
        self.inner().containers_skipped.inc();
    }

    pub fn inc_monitor_start_failures(&self) {
        self.inner().monitor_start_failures.inc();
    }

    pub fn observe_write_latency(&self, duration_secs: f64) {
        self.inner().write_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for collector lifecycle events
///
/// Every event carries an `event` field and the host the collector runs on.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str, endpoint: &str, database: &str, interval: i64) {
        info!(
            event = "collector_started",
            host = %self.host,
            version = %version,
            endpoint = %endpoint,
            database = %database,
            interval = interval,
            "Docker stats collector started"
        );
    }

    pub fn log_monitor_started(&self, container_id: &str, app: &str, task: &str, interval: u64) {
        info!(
            event = "monitor_started",
            host = %self.host,
            container_id = %container_id,
            app = %app,
            task = %task,
            interval = interval,
            "Monitoring {}({}) every {} ticks",
            app,
            task,
            interval
        );
    }

    pub fn log_monitor_skipped(&self, container_id: &str, name: &str) {
        info!(
            event = "monitor_skipped",
            host = %self.host,
            container_id = %container_id,
            name = %name,
            "No need to monitor container"
        );
    }

    pub fn log_monitor_stopped(&self, container_id: &str, reason: &str, emitted: u64) {
        info!(
            event = "monitor_stopped",
            host = %self.host,
            container_id = %container_id,
            reason = %reason,
            emitted = emitted,
            "Monitor stopped"
        );
    }

    pub fn log_database_created(&self, database: &str) {
        info!(
            event = "database_created",
            host = %self.host,
            database = %database,
            "Created missing database"
        );
    }

    pub fn log_database_create_failed(&self, database: &str, error: &str) {
        warn!(
            event = "database_create_failed",
            host = %self.host,
            database = %database,
            error = %error,
            "Failed to create missing database"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            host = %self.host,
            reason = %reason,
            "Docker stats collector shutting down"
        );
    }
}
