//! Error types shared across the collector
//!
//! Skipping a container is not an error: identity resolution returns
//! `None` for containers that should not be monitored.

use thiserror::Error;

/// Invalid or missing configuration, fatal at construction time
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sampling interval must be a positive number of ticks, got {0}")]
    InvalidInterval(i64),

    #[error("concurrency budget must be positive, got {0}")]
    InvalidConcurrency(usize),

    #[error("sample channel capacity must be positive")]
    InvalidChannelCapacity,

    #[error("time-series store address is required")]
    MissingStoreAddress,

    #[error("invalid time-series store address {address}: {reason}")]
    InvalidStoreAddress { address: String, reason: String },

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Failures talking to the container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("container {0} not found")]
    NotFound(String),

    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    #[error("container runtime returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode runtime response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("runtime transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// Failures reported by the time-series store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database {0} does not exist")]
    DatabaseMissing(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_database_missing(&self) -> bool {
        matches!(self, StoreError::DatabaseMissing(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Other(err.to_string())
    }
}

/// A batch write that was dropped
#[derive(Debug, Error)]
#[error("write to database {database} at {measurement_time} failed: {source}")]
pub struct SinkError {
    pub database: String,
    pub measurement_time: chrono::DateTime<chrono::Utc>,
    #[source]
    pub source: StoreError,
}
