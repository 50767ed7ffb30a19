//! Sample writer with lazy database provisioning
//!
//! Each sample becomes one batch of three points (`cpu`, `memory`, `net`).
//! Failed batches are dropped. When the failure says the database is
//! missing, the writer creates it so that later samples succeed.

use super::{Point, TimeSeriesStore};
use crate::error::SinkError;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::Sample;
use crate::observability::{CollectorMetrics, StructuredLogger};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Writes samples to a time-series store
pub struct SinkWriter {
    store: Arc<dyn TimeSeriesStore>,
    database: String,
    logger: StructuredLogger,
    metrics: CollectorMetrics,
    health: Option<HealthRegistry>,
}

impl SinkWriter {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        database: impl Into<String>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            logger,
            metrics: CollectorMetrics::new(),
            health: None,
        }
    }

    /// Report write outcomes to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Write one sample as a single batch
    pub async fn write(&self, sample: &Sample) -> Result<(), SinkError> {
        let points = sample_points(sample);

        let start = Instant::now();
        let result = self.store.write_batch(&self.database, &points).await;
        self.metrics
            .observe_write_latency(start.elapsed().as_secs_f64());

        let err = match result {
            Ok(()) => {
                self.metrics.inc_samples_written();
                self.report(ComponentHealth::healthy()).await;
                return Ok(());
            }
            Err(err) => err,
        };

        self.metrics.inc_write_errors();
        warn!(
            container_id = %sample.container_id,
            database = %self.database,
            measurement_time = %sample.measurement_time,
            error = %err,
            "Failed to write sample batch, dropping it"
        );

        if err.is_database_missing() {
            self.provision().await;
        } else {
            self.report(ComponentHealth::degraded(err.to_string())).await;
        }

        Err(SinkError {
            database: self.database.clone(),
            measurement_time: sample.measurement_time,
            source: err,
        })
    }

    /// Drain the sample channel until every producer has gone away
    pub async fn run(self, mut samples: mpsc::Receiver<Sample>) {
        info!(database = %self.database, "Starting sink writer");

        while let Some(sample) = samples.recv().await {
            if let Err(e) = self.write(&sample).await {
                debug!(error = %e, "Sample dropped");
            }
        }

        info!(database = %self.database, "Sample channel closed, sink writer stopped");
    }

    async fn provision(&self) {
        match self.store.create_database(&self.database).await {
            Ok(()) => {
                self.metrics.inc_databases_created();
                self.logger.log_database_created(&self.database);
            }
            Err(e) => {
                self.logger
                    .log_database_create_failed(&self.database, &e.to_string());
                self.report(ComponentHealth::degraded(e.to_string())).await;
            }
        }
    }

    async fn report(&self, health: ComponentHealth) {
        if let Some(registry) = &self.health {
            registry.update(components::SINK, health).await;
        }
    }
}

/// Convert a sample into its `cpu`, `memory` and `net` points
///
/// Counters are reinterpreted as signed 64-bit integers because the store
/// has no unsigned type; values above `i64::MAX` wrap.
pub fn sample_points(sample: &Sample) -> Vec<Point> {
    let cpu = &sample.cpu.cpu_usage;
    let memory = &sample.memory;
    let breakdown = &memory.stats;

    let mut net = [0u64; 8];
    for interface in sample.networks.values() {
        let counters = [
            interface.rx_bytes,
            interface.rx_dropped,
            interface.rx_errors,
            interface.rx_packets,
            interface.tx_bytes,
            interface.tx_dropped,
            interface.tx_errors,
            interface.tx_packets,
        ];
        for (total, value) in net.iter_mut().zip(counters) {
            *total = total.wrapping_add(value);
        }
    }

    vec![
        point(
            sample,
            "cpu",
            &[
                ("user", cpu.usage_in_usermode),
                ("system", cpu.usage_in_kernelmode),
                ("total", cpu.total_usage),
            ],
        ),
        point(
            sample,
            "memory",
            &[
                ("limit", memory.limit),
                ("max", memory.max_usage),
                ("usage", memory.usage),
                ("active_anon", breakdown.total_active_anon),
                ("active_file", breakdown.total_active_file),
                ("cache", breakdown.total_cache),
                ("inactive_anon", breakdown.total_inactive_anon),
                ("inactive_file", breakdown.total_inactive_file),
                ("mapped_file", breakdown.total_mapped_file),
                ("pg_fault", breakdown.total_pgfault),
                ("pg_in", breakdown.total_pgpgin),
                ("pg_out", breakdown.total_pgpgout),
                ("rss", breakdown.total_rss),
                ("rss_huge", breakdown.total_rss_huge),
                ("unevictable", breakdown.total_unevictable),
                ("writeback", breakdown.total_writeback),
            ],
        ),
        point(
            sample,
            "net",
            &[
                ("rx_bytes", net[0]),
                ("rx_dropped", net[1]),
                ("rx_errors", net[2]),
                ("rx_packets", net[3]),
                ("tx_bytes", net[4]),
                ("tx_dropped", net[5]),
                ("tx_errors", net[6]),
                ("tx_packets", net[7]),
            ],
        ),
    ]
}

fn point(sample: &Sample, measurement: &str, fields: &[(&str, u64)]) -> Point {
    Point {
        measurement: measurement.to_string(),
        tags: sample.tags.clone(),
        fields: fields
            .iter()
            .map(|(name, value)| (name.to_string(), *value as i64))
            .collect::<BTreeMap<_, _>>(),
        time: sample.measurement_time,
    }
}
