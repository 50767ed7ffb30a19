//! Container identity resolution
//!
//! Containers announce which app and task they belong to through labels or
//! environment variables. Schedulers differ in how they do this, so every
//! lookup goes through the same precedence chain:
//!
//! 1. an indirection label naming the key that holds the value
//! 2. an indirection env entry naming the key that holds the value
//! 3. the direct label
//! 4. the direct env entry
//! 5. the default (`""` for apps, `default` for tasks)
//!
//! An optional trim-prefix env entry is then stripped from the result.

use crate::models::{ContainerDescriptor, Identity};
use serde::Deserialize;

/// Task assigned to containers without any task convention
pub const DEFAULT_TASK: &str = "default";

/// Key names used to locate app and task identifiers on a container
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_app_label_key")]
    pub app_label_key: String,
    #[serde(default = "default_app_location_label_key")]
    pub app_location_label_key: String,
    #[serde(default = "default_app_env_key")]
    pub app_env_key: String,
    #[serde(default = "default_app_location_env_key")]
    pub app_location_env_key: String,
    #[serde(default = "default_app_trim_env_key")]
    pub app_trim_env_key: String,

    #[serde(default = "default_task_label_key")]
    pub task_label_key: String,
    #[serde(default = "default_task_location_label_key")]
    pub task_location_label_key: String,
    #[serde(default = "default_task_env_key")]
    pub task_env_key: String,
    #[serde(default = "default_task_location_env_key")]
    pub task_location_env_key: String,
    #[serde(default = "default_task_trim_env_key")]
    pub task_trim_env_key: String,
}

fn default_app_label_key() -> String {
    "app_id".to_string()
}

fn default_app_location_label_key() -> String {
    "collectd_docker_app_label".to_string()
}

fn default_app_env_key() -> String {
    "MARATHON_APP_ID".to_string()
}

fn default_app_location_env_key() -> String {
    "COLLECTD_DOCKER_APP_ENV".to_string()
}

fn default_app_trim_env_key() -> String {
    "COLLECTD_DOCKER_APP_ENV_TRIM_PREFIX".to_string()
}

fn default_task_label_key() -> String {
    "collectd_docker_task".to_string()
}

fn default_task_location_label_key() -> String {
    "collectd_docker_task_label".to_string()
}

fn default_task_env_key() -> String {
    "MESOS_TASK_ID".to_string()
}

fn default_task_location_env_key() -> String {
    "COLLECTD_DOCKER_TASK_ENV".to_string()
}

fn default_task_trim_env_key() -> String {
    "COLLECTD_DOCKER_TASK_ENV_TRIM_PREFIX".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            app_label_key: default_app_label_key(),
            app_location_label_key: default_app_location_label_key(),
            app_env_key: default_app_env_key(),
            app_location_env_key: default_app_location_env_key(),
            app_trim_env_key: default_app_trim_env_key(),
            task_label_key: default_task_label_key(),
            task_location_label_key: default_task_location_label_key(),
            task_env_key: default_task_env_key(),
            task_location_env_key: default_task_location_env_key(),
            task_trim_env_key: default_task_trim_env_key(),
        }
    }
}

impl IdentityConfig {
    /// Replace blank keys with their defaults
    ///
    /// An override set to an empty value counts as unset.
    pub fn with_blank_keys_defaulted(self) -> Self {
        let defaults = Self::default();
        Self {
            app_label_key: non_blank(self.app_label_key, defaults.app_label_key),
            app_location_label_key: non_blank(
                self.app_location_label_key,
                defaults.app_location_label_key,
            ),
            app_env_key: non_blank(self.app_env_key, defaults.app_env_key),
            app_location_env_key: non_blank(
                self.app_location_env_key,
                defaults.app_location_env_key,
            ),
            app_trim_env_key: non_blank(self.app_trim_env_key, defaults.app_trim_env_key),
            task_label_key: non_blank(self.task_label_key, defaults.task_label_key),
            task_location_label_key: non_blank(
                self.task_location_label_key,
                defaults.task_location_label_key,
            ),
            task_env_key: non_blank(self.task_env_key, defaults.task_env_key),
            task_location_env_key: non_blank(
                self.task_location_env_key,
                defaults.task_location_env_key,
            ),
            task_trim_env_key: non_blank(self.task_trim_env_key, defaults.task_trim_env_key),
        }
    }
}

fn non_blank(value: String, default: String) -> String {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// One lookup chain (app or task)
struct Convention<'a> {
    label: &'a str,
    location_label: &'a str,
    env: &'a str,
    location_env: &'a str,
    trim_env: &'a str,
    missing: &'a str,
}

impl IdentityConfig {
    fn app_convention(&self) -> Convention<'_> {
        Convention {
            label: &self.app_label_key,
            location_label: &self.app_location_label_key,
            env: &self.app_env_key,
            location_env: &self.app_location_env_key,
            trim_env: &self.app_trim_env_key,
            missing: "",
        }
    }

    fn task_convention(&self) -> Convention<'_> {
        Convention {
            label: &self.task_label_key,
            location_label: &self.task_location_label_key,
            env: &self.task_env_key,
            location_env: &self.task_location_env_key,
            trim_env: &self.task_trim_env_key,
            missing: DEFAULT_TASK,
        }
    }
}

/// Resolve the identity of a container
///
/// Returns `None` when the container carries no app identifier and must
/// not be monitored.
pub fn resolve(container: &ContainerDescriptor, config: &IdentityConfig) -> Option<Identity> {
    let raw_app = extract(container, &config.app_convention());
    let app = sanitize(&raw_app);
    if app.is_empty() {
        return None;
    }

    let mut raw_task = extract(container, &config.task_convention());
    let mut task = sanitize(&raw_task);
    if task.is_empty() {
        raw_task = DEFAULT_TASK.to_string();
        task = DEFAULT_TASK.to_string();
    }

    Some(Identity {
        app,
        task,
        raw_app,
        raw_task,
    })
}

/// Make an identifier safe for use as a tag value and a log field
///
/// Dots become underscores, one leading slash is dropped and the remaining
/// slashes become underscores.
pub fn sanitize(s: &str) -> String {
    let dotless = s.replace('.', "_");
    let trimmed = dotless.strip_prefix('/').unwrap_or(&dotless);
    trimmed.replace('/', "_")
}

fn extract(container: &ContainerDescriptor, convention: &Convention<'_>) -> String {
    let location = lookup(
        container,
        convention.location_label,
        &env_prefix(convention.location_env),
    )
    .filter(|location| !location.is_empty());

    let value = match location {
        Some(location) => lookup(container, location, &env_prefix(location)),
        None => lookup(container, convention.label, &env_prefix(convention.env)),
    }
    .unwrap_or(convention.missing);

    match container.env_with_prefix(&env_prefix(convention.trim_env)) {
        Some(prefix) => value.strip_prefix(prefix).unwrap_or(value).to_string(),
        None => value.to_string(),
    }
}

/// Label first, then env entry. A present label wins even when empty.
fn lookup<'c>(
    container: &'c ContainerDescriptor,
    label: &str,
    env_prefix: &str,
) -> Option<&'c str> {
    container
        .label(label)
        .or_else(|| container.env_with_prefix(env_prefix))
}

fn env_prefix(key: &str) -> String {
    format!("{key}=")
}
