//! Database configuration
//!
//! Settings come from defaults, an optional TOML file and `TRACKDB_*`
//! environment variables, in that order.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use trackdb_storage::{EncryptedStorage, JsonStorage, StorageStrategy, DEFAULT_LOCK_TIMEOUT};

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config text is not valid TOML for [`DataBaseConfig`]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Which storage strategy a database uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Plain JSON files
    #[default]
    Json,
    /// AES-GCM files keyed by the hardware fingerprint
    Encrypted,
}

impl StorageKind {
    /// Build the strategy for this kind
    pub fn strategy(&self) -> Arc<dyn StorageStrategy> {
        match self {
            StorageKind::Json => Arc::new(JsonStorage::new()),
            StorageKind::Encrypted => Arc::new(EncryptedStorage::new()),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Json => write!(f, "json"),
            StorageKind::Encrypted => write!(f, "encrypted"),
        }
    }
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(StorageKind::Json),
            "encrypted" => Ok(StorageKind::Encrypted),
            other => Err(ConfigError::Invalid {
                field: "storage".to_string(),
                message: format!("unknown storage kind '{}'", other),
            }),
        }
    }
}

/// Settings for opening a [`DataBase`](crate::DataBase)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataBaseConfig {
    /// Version written with every snapshot
    pub version: u32,
    /// Oldest stored version that loads without a migration callback
    pub min_compatible_version: u32,
    /// Bound on waiting for the cross-process lock
    pub lock_timeout_ms: u64,
    /// Storage strategy used when none is passed to the builder
    pub storage: StorageKind,
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            version: 1,
            min_compatible_version: 1,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            storage: StorageKind::Json,
        }
    }
}

impl DataBaseConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        EnvOverrides::apply(&mut config);
        config
    }

    /// Parse TOML text; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loading database config from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            field: "config".to_string(),
            message: e.to_string(),
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.version == 0 {
            return Err(ConfigError::Invalid {
                field: "version".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.min_compatible_version > self.version {
            return Err(ConfigError::Invalid {
                field: "min_compatible_version".to_string(),
                message: format!(
                    "{} is above the current version {}",
                    self.min_compatible_version, self.version
                ),
            });
        }
        Ok(())
    }

    /// Lock wait bound as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Environment variable overrides
pub struct EnvOverrides;

impl EnvOverrides {
    /// Collect `TRACKDB_*` variables as lowercase config keys
    ///
    /// `TRACKDB_LOCK_TIMEOUT_MS=100` becomes `{"lock_timeout_ms": "100"}`.
    pub fn parse() -> HashMap<String, String> {
        std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix("TRACKDB_")
                    .map(|config_key| (config_key.to_lowercase(), value))
            })
            .collect()
    }

    /// Apply the current environment to a config
    pub fn apply(config: &mut DataBaseConfig) {
        let overrides = Self::parse();
        Self::apply_overrides(config, &overrides);
    }

    /// Apply specific overrides to a config
    ///
    /// Unknown keys and unparsable values are logged and skipped.
    pub fn apply_overrides(config: &mut DataBaseConfig, overrides: &HashMap<String, String>) {
        for (key, value) in overrides {
            if let Err(e) = Self::set_config_value(config, key, value) {
                warn!("Ignoring TRACKDB_{}: {}", key.to_uppercase(), e);
            }
        }
    }

    fn set_config_value(config: &mut DataBaseConfig, key: &str, value: &str) -> ConfigResult<()> {
        let invalid = |message: String| ConfigError::Invalid {
            field: key.to_string(),
            message,
        };
        match key {
            "version" => {
                config.version = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
            }
            "min_compatible_version" => {
                config.min_compatible_version =
                    value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
            }
            "lock_timeout_ms" => {
                config.lock_timeout_ms =
                    value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
            }
            "storage" => config.storage = value.parse()?,
            _ => return Err(invalid("unknown setting".to_string())),
        }
        Ok(())
    }
}
