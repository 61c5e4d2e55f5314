//! orca.toml configuration parser.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

/// Errors raised while loading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("infrastructure {0:?} is not configured")]
    UnknownInfrastructure(String),

    #[error(
        "missing or invalid mandatory parameter {key} in the {infrastructure:?} infrastructure configuration"
    )]
    MissingProperty { infrastructure: String, key: String },

    #[error("invalid parameter {key} in the {infrastructure:?} infrastructure configuration: {reason}")]
    InvalidProperty {
        infrastructure: String,
        key: String,
        reason: String,
    },

    #[error("invalid duration {value:?} for {field}")]
    InvalidDuration { field: String, value: String },
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub locks: LockConfig,
    /// Infrastructure name → free-form property bag.
    pub infrastructures: HashMap<String, InfrastructureConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8800".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/orca/orca.redb"),
        }
    }
}

/// Deployment lock tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length. A holder that dies releases the lock when this expires.
    pub ttl: String,
    /// Upper bound on waiting for a busy lock.
    pub wait_timeout: String,
    /// Polling interval while waiting.
    pub retry_interval: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: "30s".to_string(),
            wait_timeout: "10s".to_string(),
            retry_interval: "50ms".to_string(),
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Result<Duration, ConfigError> {
        duration_field("locks.ttl", &self.ttl)
    }

    pub fn wait_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("locks.wait_timeout", &self.wait_timeout)
    }

    pub fn retry_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("locks.retry_interval", &self.retry_interval)
    }
}

fn duration_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Property bag for a single infrastructure (e.g. `[infrastructures.kubernetes]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfrastructureConfig(BTreeMap<String, toml::Value>);

impl InfrastructureConfig {
    /// String value of `key`, or an empty string when absent or not a string.
    pub fn get_string(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(toml::Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Boolean value of `key`; absent or malformed values read as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(toml::Value::Boolean(b)) => *b,
            Some(toml::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Non-empty string value of `key`, or a descriptive error naming the
    /// infrastructure.
    pub fn require_string(&self, infrastructure: &str, key: &str) -> Result<String, ConfigError> {
        let value = self.get_string(key);
        if value.is_empty() {
            return Err(ConfigError::MissingProperty {
                infrastructure: infrastructure.to_string(),
                key: key.to_string(),
            });
        }
        Ok(value)
    }

    pub fn set(&mut self, key: &str, value: impl Into<toml::Value>) {
        self.0.insert(key.to_string(), value.into());
    }
}

impl Configuration {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Property bag for `name`, failing when the infrastructure is not configured.
    pub fn infrastructure(&self, name: &str) -> Result<&InfrastructureConfig, ConfigError> {
        self.infrastructures
            .get(name)
            .ok_or_else(|| ConfigError::UnknownInfrastructure(name.to_string()))
    }
}
