//! Collector configuration
//!
//! Flags come from [`Cli`]; the identity conventions are read once from the
//! process environment with the `config` crate.

use crate::cli::Cli;
use anyhow::{Context, Result};
use collector_lib::{ConfigError, Decimator, IdentityConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Validated collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub endpoint: String,
    pub cert_dir: Option<PathBuf>,
    pub store_url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub interval: i64,
    pub concurrency: usize,
    pub channel_capacity: usize,
    pub rescan_interval: Option<Duration>,
    pub api_port: Option<u16>,
    pub host: String,
    pub identity: IdentityConfig,
}

impl CollectorConfig {
    /// Load the identity conventions and validate everything
    pub fn load(cli: Cli) -> Result<Self> {
        let identity = load_identity_config(config::Environment::default())?;
        Ok(Self::from_parts(cli, identity)?)
    }

    pub fn from_parts(cli: Cli, identity: IdentityConfig) -> Result<Self, ConfigError> {
        Decimator::new(cli.interval)?;

        if cli.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(cli.concurrency));
        }
        if cli.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }

        let store_url = cli
            .dburl
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingStoreAddress)?;

        Ok(Self {
            endpoint: cli.endpoint,
            cert_dir: cli.cert,
            store_url,
            database: cli.db,
            username: cli.username,
            password: cli.password,
            interval: cli.interval,
            concurrency: cli.concurrency,
            channel_capacity: cli.channel_capacity,
            rescan_interval: cli
                .rescan_interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            api_port: cli.api_port,
            host: default_host(),
            identity,
        })
    }
}

/// Read label and env key overrides (`APP_LABEL_KEY`, `TASK_ENV_KEY`, ...)
///
/// An override set to an empty value keeps the default key.
pub fn load_identity_config(source: config::Environment) -> Result<IdentityConfig> {
    let identity: IdentityConfig = config::Config::builder()
        .add_source(source)
        .build()
        .context("Failed to read identity configuration")?
        .try_deserialize()
        .context("Invalid identity configuration")?;

    Ok(identity.with_blank_keys_defaulted())
}

fn default_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["influxdb-docker-collector"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<_, _>>();
        config::Environment::default().source(Some(map))
    }

    #[test]
    fn test_valid_configuration() {
        let config = CollectorConfig::from_parts(
            cli(&[
                "--dburl",
                "http://influx:8086",
                "--db",
                "docker",
                "--interval",
                "2",
                "--concurrency",
                "3",
                "--channel-capacity",
                "10",
            ]),
            IdentityConfig::default(),
        )
        .unwrap();

        assert_eq!(config.store_url, "http://influx:8086");
        assert_eq!(config.database, "docker");
        assert_eq!(config.interval, 2);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.channel_capacity, 10);
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let err = CollectorConfig::from_parts(
            cli(&["--dburl", "http://influx:8086", "--interval", "0"]),
            IdentityConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidInterval(0));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = CollectorConfig::from_parts(
            cli(&["--dburl", "http://influx:8086", "--concurrency", "0"]),
            IdentityConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidConcurrency(0));
    }

    #[test]
    fn test_rejects_zero_channel_capacity() {
        let err = CollectorConfig::from_parts(
            cli(&["--dburl", "http://influx:8086", "--channel-capacity", "0"]),
            IdentityConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidChannelCapacity);
    }

    #[test]
    fn test_rejects_blank_store_address() {
        let err = CollectorConfig::from_parts(cli(&["--dburl", "  "]), IdentityConfig::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingStoreAddress);
    }

    #[test]
    fn test_zero_rescan_interval_disables_rescans() {
        let config = CollectorConfig::from_parts(
            cli(&["--dburl", "http://influx:8086", "--rescan-interval", "0"]),
            IdentityConfig::default(),
        )
        .unwrap();
        assert!(config.rescan_interval.is_none());
    }

    #[test]
    fn test_identity_defaults_without_overrides() {
        let identity = load_identity_config(environment(&[])).unwrap();
        assert_eq!(identity, IdentityConfig::default());
        assert_eq!(identity.app_label_key, "app_id");
        assert_eq!(identity.task_env_key, "MESOS_TASK_ID");
    }

    #[test]
    fn test_identity_overrides_from_environment() {
        let identity = load_identity_config(environment(&[
            ("APP_LABEL_KEY", "com.example.app"),
            ("TASK_ENV_KEY", "TASK"),
            ("TASK_TRIM_ENV_KEY", "STRIP"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(identity.app_label_key, "com.example.app");
        assert_eq!(identity.task_env_key, "TASK");
        assert_eq!(identity.task_trim_env_key, "STRIP");
        assert_eq!(identity.app_env_key, "MARATHON_APP_ID");
    }

    #[test]
    fn test_empty_override_keeps_default_key() {
        let identity = load_identity_config(environment(&[
            ("APP_LABEL_KEY", ""),
            ("TASK_LOCATION_ENV_KEY", ""),
            ("TASK_ENV_KEY", "TASK"),
        ]))
        .unwrap();

        assert_eq!(identity.app_label_key, "app_id");
        assert_eq!(identity.task_location_env_key, "COLLECTD_DOCKER_TASK_ENV");
        assert_eq!(identity.task_env_key, "TASK");
    }
}
