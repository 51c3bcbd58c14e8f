//! Store configuration via TOML
//!
//! Every field has a default, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// File that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for [`StoreConfig`]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be rendered as TOML
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl From<ConfigError> for memstate_core::Error {
    fn from(e: ConfigError) -> Self {
        memstate_core::Error::Config(e.to_string())
    }
}

/// Store configuration
///
/// # Example
///
/// ```toml
/// # Keys recorded per table per commit before watches fire table-wide
/// watch_key_limit = 4096
///
/// # Reflector calls slower than this many milliseconds are logged
/// slow_reflector_warn_ms = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Touched keys recorded per table per commit; above it every watch of
    /// the table fires
    #[serde(default = "default_watch_key_limit")]
    pub watch_key_limit: usize,
    /// Threshold in milliseconds for the slow reflector warning
    #[serde(default = "default_slow_reflector_warn_ms")]
    pub slow_reflector_warn_ms: u64,
}

fn default_watch_key_limit() -> usize {
    4096
}

fn default_slow_reflector_warn_ms() -> u64 {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            watch_key_limit: default_watch_key_limit(),
            slow_reflector_warn_ms: default_slow_reflector_warn_ms(),
        }
    }
}

impl StoreConfig {
    /// Returns the default config document with comments.
    pub fn default_toml() -> &'static str {
        r#"# memstate store configuration
#
# Keys recorded per table per commit for query invalidation.
# Above this limit every outstanding watch of the table fires.
watch_key_limit = 4096

# Reflector calls slower than this many milliseconds log a warning.
slow_reflector_warn_ms = 100
"#
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_key_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "watch_key_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Slow reflector threshold as a duration
    pub fn slow_reflector_warn(&self) -> Duration {
        Duration::from_millis(self.slow_reflector_warn_ms)
    }
}
