//! Command-line flags

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

/// Collects Docker container stats and writes them to InfluxDB
#[derive(Debug, Parser)]
#[command(name = "influxdb-docker-collector")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Docker endpoint (unix:///path or tcp://host:port)
    #[arg(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    pub endpoint: String,

    /// Directory holding cert.pem, key.pem and ca.pem for TLS
    #[arg(long, env = "DOCKER_CERT_PATH")]
    pub cert: Option<PathBuf>,

    /// InfluxDB server to report to
    #[arg(long, env = "INFLUXDB_URL")]
    pub dburl: Option<String>,

    /// InfluxDB database to report to
    #[arg(long, env = "INFLUXDB_DATABASE", default_value = "")]
    pub db: String,

    /// InfluxDB user
    #[arg(long, env = "INFLUXDB_USERNAME", hide_env_values = true)]
    pub username: Option<String>,

    /// InfluxDB password
    #[arg(long, env = "INFLUXDB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Emit one sample every this many stats updates
    #[arg(long, env = "COLLECT_INTERVAL", default_value_t = 10, allow_negative_numbers = true)]
    pub interval: i64,

    /// Maximum number of monitor start attempts in flight
    #[arg(long, env = "COLLECT_CONCURRENCY", default_value_t = 5)]
    pub concurrency: usize,

    /// Samples buffered between monitors and the writer
    #[arg(long, env = "COLLECT_CHANNEL_CAPACITY", default_value_t = 1000)]
    pub channel_capacity: usize,

    /// Seconds between container rescans (disabled when unset)
    #[arg(long, env = "COLLECT_RESCAN_INTERVAL")]
    pub rescan_interval: Option<u64>,

    /// Port for /healthz, /readyz and /metrics (disabled when unset)
    #[arg(long, env = "COLLECTOR_API_PORT")]
    pub api_port: Option<u16>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}
