//! Per-container sampling
//!
//! A monitor goes through three states, encoded as types:
//! `Monitor` (created) → `StreamingMonitor` (stats stream attached) →
//! `MonitorExit` (stopped). The runtime pushes ticks at its own cadence;
//! only every `interval`-th tick becomes a `Sample`, the rest are dropped.

use crate::error::{ConfigError, RuntimeError};
use crate::models::{Identity, Sample};
use crate::observability::CollectorMetrics;
use crate::runtime::{ContainerRuntime, StatsStream};
use crate::tags::{identity_tags, TagSet};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Keeps tick 0, `interval`, `2 * interval`, ...
#[derive(Debug, Clone)]
pub struct Decimator {
    interval: u64,
    tick: u64,
}

impl Decimator {
    pub fn new(interval: i64) -> Result<Self, ConfigError> {
        if interval <= 0 {
            return Err(ConfigError::InvalidInterval(interval));
        }
        Ok(Self {
            interval: interval as u64,
            tick: 0,
        })
    }

    /// Count one tick, returning whether it should be emitted
    pub fn admit(&mut self) -> bool {
        let emit = self.tick % self.interval == 0;
        self.tick += 1;
        emit
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Ticks seen so far
    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

/// Why a monitor stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The runtime closed the stream (container stopped or removed)
    StreamEnded,
    /// The stream reported an error
    StreamError(String),
    /// Nobody consumes samples anymore
    SinkClosed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StreamEnded => write!(f, "stream ended"),
            StopReason::StreamError(e) => write!(f, "stream error: {e}"),
            StopReason::SinkClosed => write!(f, "sample channel closed"),
        }
    }
}

/// Outcome of a finished monitor
#[derive(Debug, Clone)]
pub struct MonitorExit {
    pub container_id: String,
    pub reason: StopReason,
    pub ticks: u64,
    pub emitted: u64,
}

/// A monitor for one container, not yet attached to its stats stream
#[derive(Debug, Clone)]
pub struct Monitor {
    container_id: String,
    identity: Identity,
    tags: TagSet,
    decimator: Decimator,
}

impl Monitor {
    /// Create a monitor emitting one sample every `interval` ticks
    pub fn new(
        container_id: impl Into<String>,
        identity: Identity,
        interval: i64,
    ) -> Result<Self, ConfigError> {
        let decimator = Decimator::new(interval)?;
        let tags = identity_tags(&identity);

        Ok(Self {
            container_id: container_id.into(),
            identity,
            tags,
            decimator,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn interval(&self) -> u64 {
        self.decimator.interval()
    }

    /// Subscribe to the container's statistics stream
    pub async fn attach(
        self,
        runtime: &dyn ContainerRuntime,
    ) -> Result<StreamingMonitor, RuntimeError> {
        let ticks = runtime.stream_stats(&self.container_id).await?;
        Ok(self.with_stream(ticks))
    }

    /// Use an already established stream
    pub fn with_stream(self, ticks: StatsStream) -> StreamingMonitor {
        debug!(container_id = %self.container_id, "Monitor streaming");
        StreamingMonitor {
            monitor: self,
            ticks,
            metrics: CollectorMetrics::new(),
        }
    }
}

/// A monitor with an open stats stream
pub struct StreamingMonitor {
    monitor: Monitor,
    ticks: StatsStream,
    metrics: CollectorMetrics,
}

impl StreamingMonitor {
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Forward decimated samples into `out` until the stream stops
    pub async fn forward(self, out: mpsc::Sender<Sample>) -> MonitorExit {
        let StreamingMonitor {
            monitor,
            mut ticks,
            metrics,
        } = self;
        let Monitor {
            container_id,
            tags,
            mut decimator,
            ..
        } = monitor;
        let mut emitted = 0u64;

        let reason = loop {
            let tick = match ticks.next().await {
                Some(Ok(tick)) => tick,
                Some(Err(e)) => {
                    warn!(
                        container_id = %container_id,
                        error = %e,
                        "Stats stream failed, stopping monitor"
                    );
                    break StopReason::StreamError(e.to_string());
                }
                None => {
                    info!(container_id = %container_id, "Stats stream ended");
                    break StopReason::StreamEnded;
                }
            };

            if !decimator.admit() {
                continue;
            }

            let sample = Sample::from_tick(&container_id, &tags, tick);
            if out.send(sample).await.is_err() {
                warn!(container_id = %container_id, "Sample channel closed, stopping monitor");
                break StopReason::SinkClosed;
            }

            emitted += 1;
            metrics.inc_samples_emitted();
        };

        MonitorExit {
            container_id,
            reason,
            ticks: decimator.ticks(),
            emitted,
        }
    }
}
