//! Configuration for a relay instance.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::{InstanceId, RelayError};

/// Default config file name (without extension) looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "relay";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "RELAY_CONFIG";

/// Prefix for environment overrides, e.g. `RELAY__MAX_CONCURRENT_WORKERS=8`.
pub const CONFIG_ENV_PREFIX: &str = "RELAY";

/// What the dispatch loop does with a payload it cannot decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Move the raw payload to `dead:<key>` and keep consuming.
    #[default]
    DeadLetter,
    /// Stop the dispatch loop with an error.
    Fatal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Namespaces delivery keys; generated when absent.
    pub instance_id: Option<String>,
    pub redis_url: String,
    /// Applied to every key written by the result publisher.
    pub response_ttl_secs: u64,
    pub max_concurrent_workers: usize,
    /// Upper bound of a single blocking pop; the watch set is refreshed after each.
    pub poll_timeout_ms: u64,
    pub on_decode_error: DecodeFailurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            response_ttl_secs: 30,
            max_concurrent_workers: 4,
            poll_timeout_ms: 1000,
            on_decode_error: DecodeFailurePolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `relay.yaml` in the current directory (if it exists)
    /// 2. file given by `path` (required if provided)
    /// 3. file named by `RELAY_CONFIG` (required if set)
    /// 4. `RELAY__*` environment variables
    pub fn load(path: Option<&str>) -> Result<Self, RelayError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        let config: RelayConfig = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_concurrent_workers == 0 {
            return Err(RelayError::Config(
                "max_concurrent_workers must be at least 1".to_string(),
            ));
        }
        if self.response_ttl_secs == 0 {
            return Err(RelayError::Config(
                "response_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.poll_timeout_ms == 0 {
            return Err(RelayError::Config(
                "poll_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.instance_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(RelayError::Config("instance_id must not be empty".to_string()));
        }
        Ok(())
    }

    /// Configured instance id, or a freshly generated one.
    pub fn instance_id(&self) -> InstanceId {
        match &self.instance_id {
            Some(id) => InstanceId::new(id.clone()),
            None => InstanceId::generate(),
        }
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
