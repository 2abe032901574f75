//! TOML-based configuration file for the broker client.
//!
//! # File layout
//!
//! ```toml
//! [broker]
//! id = "editor-42"
//! url = "http://127.0.0.1:8080/broker"
//! sleep_after_io_error_ms = 1000
//! connect_timeout_ms = 5000
//!
//! [broker.headers]
//! authorization = "Bearer 0123abcd"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so a partial file (or
//! no file at all) still yields a usable configuration.  The `[broker.headers]`
//! table becomes a [`StaticHeaders`] request initializer that is applied to
//! every `GET` and `POST`.
//!
//! Command-line flags in the binary override whatever this file says.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::broker::BrokerSettings;
use crate::infrastructure::transport::StaticHeaders;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// The `[broker]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerSection {
    /// Identifier used in log lines.
    #[serde(default = "default_id")]
    pub id: String,
    /// The single HTTP endpoint used for both `GET` and `POST`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Pause after a failed poll.  `0` retries immediately.
    #[serde(default = "default_sleep_after_io_error_ms")]
    pub sleep_after_io_error_ms: u64,
    /// TCP connect timeout; absent means the HTTP client default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Extra headers added to every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// The `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSection {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_id() -> String {
    "broker".to_string()
}
fn default_url() -> String {
    "http://127.0.0.1:8080/broker".to_string()
}
fn default_sleep_after_io_error_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            id: default_id(),
            url: default_url(),
            sleep_after_io_error_ms: default_sleep_after_io_error_ms(),
            connect_timeout_ms: None,
            headers: BTreeMap::new(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BrokerSection {
    /// Converts the file section into runtime [`BrokerSettings`].
    pub fn to_settings(&self) -> BrokerSettings {
        BrokerSettings {
            id: self.id.clone(),
            url: self.url.clone(),
            sleep_after_io_error: Duration::from_millis(self.sleep_after_io_error_ms),
        }
    }

    /// Builds the request initializer for the `[broker.headers]` table.
    pub fn request_headers(&self) -> StaticHeaders {
        StaticHeaders::new(self.headers.clone())
    }

    /// Returns the connect timeout, if one is configured.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads a [`ClientConfig`] from `path`, returning the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
