//! Container runtime access
//!
//! The collector only needs three capabilities from the runtime: list the
//! running containers, inspect one, and subscribe to its statistics
//! stream. `DockerClient` provides them over the Docker Engine API.

mod docker;
mod tls;

pub use docker::{DockerClient, Endpoint};
pub use tls::load_tls_connector;

use crate::error::RuntimeError;
use crate::models::{ContainerDescriptor, RawStats};
use std::pin::Pin;
use tokio_stream::Stream;

pub use async_trait::async_trait;

/// Continuous statistics for one container, ends when the container stops
pub type StatsStream = Pin<Box<dyn Stream<Item = Result<RawStats, RuntimeError>> + Send>>;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List the ids of all running containers
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError>;

    /// Fetch labels and environment of a container
    async fn inspect(&self, id: &str) -> Result<ContainerDescriptor, RuntimeError>;

    /// Subscribe to the statistics stream of a container
    async fn stream_stats(&self, id: &str) -> Result<StatsStream, RuntimeError>;
}
