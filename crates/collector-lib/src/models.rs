//! Core data models for the collector
//!
//! The raw statistics types mirror the JSON documents emitted by the Docker
//! Engine stats endpoint. Every field defaults to zero because cgroup v2
//! hosts omit most of the v1 memory breakdown.

use crate::tags::TagSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Container metadata as reported by the runtime's inspect call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// `KEY=VALUE` entries in declaration order
    pub env: Vec<String>,
}

impl ContainerDescriptor {
    /// Look up a label by exact key
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Return the remainder of the first env entry starting with `prefix`
    ///
    /// An entry whose remainder is empty counts as absent.
    pub fn env_with_prefix(&self, prefix: &str) -> Option<&str> {
        self.env
            .iter()
            .find_map(|entry| entry.strip_prefix(prefix))
            .filter(|value| !value.is_empty())
    }
}

/// Resolved identity of a monitored container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Sanitized app identifier, never empty
    pub app: String,
    /// Sanitized task identifier, defaults to `default`
    pub task: String,
    /// App identifier as found on the container, after prefix trimming
    pub raw_app: String,
    /// Task identifier as found on the container, after prefix trimming
    pub raw_task: String,
}

/// One raw statistics update from the runtime stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStats {
    #[serde(default = "epoch")]
    pub read: DateTime<Utc>,
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
    /// Per-interface counters keyed by interface name
    #[serde(default)]
    pub networks: Option<BTreeMap<String, NetworkStats>>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub usage_in_kernelmode: u64,
    #[serde(default)]
    pub usage_in_usermode: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub max_usage: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub stats: MemoryBreakdown,
}

/// Memory accounting breakdown (`memory.stat` totals)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    #[serde(default)]
    pub total_active_anon: u64,
    #[serde(default)]
    pub total_active_file: u64,
    #[serde(default)]
    pub total_cache: u64,
    #[serde(default)]
    pub total_inactive_anon: u64,
    #[serde(default)]
    pub total_inactive_file: u64,
    #[serde(default)]
    pub total_mapped_file: u64,
    #[serde(default)]
    pub total_pgfault: u64,
    #[serde(default)]
    pub total_pgpgin: u64,
    #[serde(default)]
    pub total_pgpgout: u64,
    #[serde(default)]
    pub total_rss: u64,
    #[serde(default)]
    pub total_rss_huge: u64,
    #[serde(default)]
    pub total_unevictable: u64,
    #[serde(default)]
    pub total_writeback: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub rx_dropped: u64,
    #[serde(default)]
    pub rx_errors: u64,
    #[serde(default)]
    pub rx_packets: u64,
    #[serde(default)]
    pub tx_bytes: u64,
    #[serde(default)]
    pub tx_dropped: u64,
    #[serde(default)]
    pub tx_errors: u64,
    #[serde(default)]
    pub tx_packets: u64,
}

/// A decimated, tagged statistics snapshot ready for the sink
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub container_id: String,
    pub tags: TagSet,
    pub measurement_time: DateTime<Utc>,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub networks: BTreeMap<String, NetworkStats>,
}

impl Sample {
    /// Build a sample from the tick that triggered emission
    pub fn from_tick(container_id: &str, tags: &TagSet, tick: RawStats) -> Self {
        Self {
            container_id: container_id.to_string(),
            tags: tags.clone(),
            measurement_time: tick.read,
            cpu: tick.cpu_stats,
            memory: tick.memory_stats,
            networks: tick.networks.unwrap_or_default(),
        }
    }
}
