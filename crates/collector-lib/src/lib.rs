//! Docker container statistics collector
//!
//! This crate provides the core functionality for:
//! - Resolving an (app, task) identity from container labels and env
//! - Expanding identities into query tags
//! - Decimating per-container stats streams into samples
//! - Writing samples to InfluxDB, creating the database on demand
//! - Health checks and observability

pub mod collector;
pub mod error;
pub mod health;
pub mod identity;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod runtime;
pub mod sink;
pub mod tags;

pub use collector::Collector;
pub use error::{ConfigError, RuntimeError, SinkError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use identity::{resolve, sanitize, IdentityConfig};
pub use models::*;
pub use monitor::{Decimator, Monitor, MonitorExit, StopReason, StreamingMonitor};
pub use observability::{CollectorMetrics, StructuredLogger};
pub use runtime::{ContainerRuntime, DockerClient, Endpoint, StatsStream};
pub use sink::{InfluxClient, Point, SinkWriter, TimeSeriesStore};
pub use tags::{expand_app, expand_task, identity_tags, TagSet};
