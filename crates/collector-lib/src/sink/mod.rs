//! Delivery of samples to the time-series store
//!
//! This module provides:
//! - The store capability the writer depends on
//! - InfluxDB line-protocol encoding and an HTTP client
//! - The sink writer that turns samples into measurement batches and
//!   provisions the database when it is missing

mod influx;
mod line_protocol;
mod writer;

pub use influx::InfluxClient;
pub use line_protocol::{encode_batch, encode_point};
pub use writer::{sample_points, SinkWriter};

use crate::error::StoreError;
use crate::tags::TagSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One measurement record
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: TagSet,
    pub fields: BTreeMap<String, i64>,
    pub time: DateTime<Utc>,
}

/// Trait for time-series store implementations
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Write all points in one request
    async fn write_batch(&self, database: &str, points: &[Point]) -> Result<(), StoreError>;

    /// Create a database
    async fn create_database(&self, name: &str) -> Result<(), StoreError>;
}
