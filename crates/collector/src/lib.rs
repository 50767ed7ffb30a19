//! Process plumbing for the Docker stats collector: flags, configuration
//! and the health/metrics HTTP API.

pub mod api;
pub mod cli;
pub mod config;
