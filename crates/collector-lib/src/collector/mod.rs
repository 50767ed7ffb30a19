//! Container discovery and monitor lifecycle
//!
//! The collector lists the running containers, resolves an identity for
//! each one and starts a `Monitor` for the eligible ones. Start attempts run
//! on a bounded pool; forwarding tasks run until their stats stream ends.
//! The set of active monitors is owned by the `run` loop alone.

#[cfg(test)]
mod tests;

use crate::error::{ConfigError, RuntimeError};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::identity::{resolve, IdentityConfig};
use crate::models::{Identity, Sample};
use crate::monitor::{Decimator, Monitor, MonitorExit, StreamingMonitor};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::runtime::ContainerRuntime;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A running monitor as tracked by the collector
#[derive(Debug)]
pub struct MonitorHandle {
    pub identity: Identity,
    pub interval: u64,
    task: AbortHandle,
}

/// Result of one start attempt
enum StartOutcome {
    Started(StreamingMonitor),
    Skipped {
        container_id: String,
        name: String,
    },
    Failed {
        container_id: String,
        error: RuntimeError,
    },
}

/// Discovers containers and keeps one monitor per eligible container
pub struct Collector {
    runtime: Arc<dyn ContainerRuntime>,
    conventions: Arc<IdentityConfig>,
    interval: i64,
    samples: mpsc::Sender<Sample>,
    rescan_interval: Option<Duration>,
    active: HashMap<String, MonitorHandle>,
    /// Start attempts in flight
    pending: HashSet<String>,
    /// Containers without an app identity
    skipped: HashSet<String>,
    /// Containers whose monitor has stopped; never reattached
    finished: HashSet<String>,
    ready: bool,
    logger: StructuredLogger,
    metrics: CollectorMetrics,
    health: Option<HealthRegistry>,
}

impl Collector {
    /// Create a collector whose monitors emit one sample every `interval`
    /// ticks into `samples`
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        conventions: IdentityConfig,
        interval: i64,
        samples: mpsc::Sender<Sample>,
        logger: StructuredLogger,
    ) -> Result<Self, ConfigError> {
        Decimator::new(interval)?;

        Ok(Self {
            runtime,
            conventions: Arc::new(conventions),
            interval,
            samples,
            rescan_interval: None,
            active: HashMap::new(),
            pending: HashSet::new(),
            skipped: HashSet::new(),
            finished: HashSet::new(),
            ready: false,
            logger,
            metrics: CollectorMetrics::new(),
            health: None,
        })
    }

    /// List running containers again every `period` and start monitors for
    /// the ones not seen before
    ///
    /// A container whose monitor stopped is not monitored again.
    pub fn with_rescan_interval(mut self, period: Duration) -> Self {
        self.rescan_interval = Some(period);
        self
    }

    /// Report state and readiness to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until `shutdown` fires (or its sender goes away)
    ///
    /// At most `concurrency` start attempts are in flight at once. Fails
    /// only when the running containers cannot be listed.
    pub async fn run(
        mut self,
        concurrency: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RuntimeError> {
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(concurrency).into());
        }

        info!(
            concurrency = concurrency,
            interval = self.interval,
            rescan_secs = ?self.rescan_interval.map(|d| d.as_secs()),
            "Starting collector"
        );
        self.report(ComponentHealth::healthy()).await;

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut starts: JoinSet<StartOutcome> = JoinSet::new();
        let mut monitors: JoinSet<MonitorExit> = JoinSet::new();
        let mut rescan = self.rescan_interval.map(|period| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        self.scan(&permits, &mut starts).await?;
        self.mark_ready_if_settled(&starts).await;

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(active = self.active.len(), "Shutdown requested, stopping monitors");
                    break Ok(());
                }
                Some(joined) = starts.join_next(), if !starts.is_empty() => {
                    self.on_start(joined, &mut monitors);
                    self.mark_ready_if_settled(&starts).await;
                }
                Some(joined) = monitors.join_next(), if !monitors.is_empty() => {
                    self.on_exit(joined);
                }
                _ = next_rescan(&mut rescan) => {
                    if let Err(e) = self.scan(&permits, &mut starts).await {
                        break Err(e);
                    }
                }
            }

            self.publish_active().await;
        };

        starts.abort_all();
        monitors.abort_all();
        self.active.clear();
        self.pending.clear();
        self.publish_active().await;

        result
    }

    /// List running containers and schedule a start for every new id
    async fn scan(
        &mut self,
        permits: &Arc<Semaphore>,
        starts: &mut JoinSet<StartOutcome>,
    ) -> Result<(), RuntimeError> {
        let running = match self.runtime.list_running().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list running containers");
                self.report(ComponentHealth::unhealthy(e.to_string())).await;
                return Err(e);
            }
        };

        // forget containers that are gone
        let listed: HashSet<&str> = running.iter().map(String::as_str).collect();
        self.skipped.retain(|id| listed.contains(id.as_str()));
        self.finished.retain(|id| listed.contains(id.as_str()));

        let mut scheduled = 0usize;
        for container_id in running {
            if self.active.contains_key(&container_id)
                || self.pending.contains(&container_id)
                || self.skipped.contains(&container_id)
                || self.finished.contains(&container_id)
            {
                continue;
            }

            self.pending.insert(container_id.clone());
            starts.spawn(start_monitor(
                Arc::clone(&self.runtime),
                Arc::clone(&self.conventions),
                self.interval,
                Arc::clone(permits),
                container_id,
            ));
            scheduled += 1;
        }

        debug!(
            scheduled = scheduled,
            active = self.active.len(),
            skipped = self.skipped.len(),
            "Container scan complete"
        );
        Ok(())
    }

    fn on_start(
        &mut self,
        joined: Result<StartOutcome, JoinError>,
        monitors: &mut JoinSet<MonitorExit>,
    ) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Monitor start task failed");
                self.metrics.inc_monitor_start_failures();
                return;
            }
        };

        match outcome {
            StartOutcome::Started(streaming) => {
                let monitor = streaming.monitor();
                let container_id = monitor.container_id().to_string();
                let identity = monitor.identity().clone();
                let interval = monitor.interval();

                self.pending.remove(&container_id);
                self.logger.log_monitor_started(
                    &container_id,
                    &identity.app,
                    &identity.task,
                    interval,
                );

                let task = monitors.spawn(streaming.forward(self.samples.clone()));
                self.active.insert(
                    container_id,
                    MonitorHandle {
                        identity,
                        interval,
                        task,
                    },
                );
            }
            StartOutcome::Skipped { container_id, name } => {
                self.pending.remove(&container_id);
                self.metrics.inc_containers_skipped();
                self.logger.log_monitor_skipped(&container_id, &name);
                self.skipped.insert(container_id);
            }
            StartOutcome::Failed {
                container_id,
                error,
            } => {
                self.pending.remove(&container_id);
                self.metrics.inc_monitor_start_failures();
                warn!(
                    container_id = %container_id,
                    error = %error,
                    "Failed to start monitor"
                );
            }
        }
    }

    fn on_exit(&mut self, joined: Result<MonitorExit, JoinError>) {
        match joined {
            Ok(exit) => {
                self.active.remove(&exit.container_id);
                self.logger.log_monitor_stopped(
                    &exit.container_id,
                    &exit.reason.to_string(),
                    exit.emitted,
                );
                self.finished.insert(exit.container_id);
            }
            Err(e) => {
                error!(error = %e, "Monitor task failed");
                let stopped: Vec<String> = self
                    .active
                    .iter()
                    .filter(|(_, handle)| handle.task.is_finished())
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in stopped {
                    self.active.remove(&id);
                    self.finished.insert(id);
                }
            }
        }
    }

    async fn mark_ready_if_settled(&mut self, starts: &JoinSet<StartOutcome>) {
        if self.ready || !starts.is_empty() {
            return;
        }

        self.ready = true;
        info!(
            active = self.active.len(),
            skipped = self.skipped.len(),
            "Initial container scan settled"
        );
        if let Some(health) = &self.health {
            health.set_ready(true).await;
        }
    }

    async fn publish_active(&self) {
        self.metrics.set_active_monitors(self.active.len());
        if let Some(health) = &self.health {
            health.set_active_monitors(self.active.len()).await;
        }
    }

    async fn report(&self, health: ComponentHealth) {
        if let Some(registry) = &self.health {
            registry.update(components::COLLECTOR, health).await;
        }
    }
}

/// Inspect, resolve and attach one container, holding a pool permit
async fn start_monitor(
    runtime: Arc<dyn ContainerRuntime>,
    conventions: Arc<IdentityConfig>,
    interval: i64,
    permits: Arc<Semaphore>,
    container_id: String,
) -> StartOutcome {
    let Ok(_permit) = permits.acquire_owned().await else {
        return StartOutcome::Failed {
            container_id,
            error: RuntimeError::Unreachable("monitor start pool closed".to_string()),
        };
    };

    let descriptor = match runtime.inspect(&container_id).await {
        Ok(descriptor) => descriptor,
        Err(error) => {
            return StartOutcome::Failed {
                container_id,
                error,
            }
        }
    };

    let Some(identity) = resolve(&descriptor, &conventions) else {
        return StartOutcome::Skipped {
            container_id,
            name: descriptor.name,
        };
    };

    let monitor = match Monitor::new(container_id.clone(), identity, interval) {
        Ok(monitor) => monitor,
        Err(e) => {
            return StartOutcome::Failed {
                container_id,
                error: e.into(),
            }
        }
    };

    match monitor.attach(runtime.as_ref()).await {
        Ok(streaming) => StartOutcome::Started(streaming),
        Err(error) => StartOutcome::Failed {
            container_id,
            error,
        },
    }
}

async fn next_rescan(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
