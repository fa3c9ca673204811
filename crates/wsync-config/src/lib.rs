// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use wsync_filter::MetadataFilter;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// The embedded `updates-filter` JSON failed to parse.
    #[error("failed to parse updates-filter: {reason}")]
    FilterParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `content_path` does not exist yet; `openOrCreate` will create it.
    ContentPathMissing {
        /// The configured path.
        path: String,
    },
    /// Both `service_config_json` and `service_config_path` were given;
    /// the inline JSON takes precedence.
    ServiceConfigBothGiven,
    /// `download_parallelism` is unusually large.
    LargeDownloadParallelism {
        /// The configured value.
        value: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentPathMissing { path } => {
                write!(f, "content_path '{path}' does not exist yet")
            }
            Self::ServiceConfigBothGiven => {
                write!(f, "both service-config-json and service-config-path were set; using the inline JSON")
            }
            Self::LargeDownloadParallelism { value } => {
                write!(f, "download_parallelism={value} is unusually large")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Retry settings
// ---------------------------------------------------------------------------

/// Batch retry and backoff settings for the sync protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetrySettings {
    /// Maximum number of retry attempts per batch.
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// WsyncConfig
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for wsyncd.
///
/// Mirrors the flat option map a host adapter reads from its own
/// configuration surface (CLI flags, environment, a web framework's
/// settings object) and hands to the core as plain strings; see
/// [`WsyncConfig::from_flat_map`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WsyncConfig {
    /// Filesystem path to the package (metadata) store.
    pub metadata_path: PathBuf,
    /// Filesystem path to the content store.
    pub content_path: PathBuf,
    /// Filter applied when serving metadata to downstream peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates_filter: Option<MetadataFilter>,
    /// Service configuration snapshot echoed to downstream peers, as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_config_json: Option<serde_json::Value>,
    /// URL prefix under which content is served.
    #[serde(default = "default_content_http_root")]
    pub content_http_root: String,
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Batch retry/backoff policy for the sync engine.
    #[serde(default)]
    pub batch_retry: RetrySettings,
    /// Worker pool size for content downloads.
    #[serde(default = "default_download_parallelism")]
    pub download_parallelism: usize,
    /// Per-batch HTTP timeout, in seconds.
    #[serde(default = "default_batch_http_timeout_secs")]
    pub batch_http_timeout_secs: u64,
}

fn default_content_http_root() -> String {
    "/microsoftupdate/content".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_download_parallelism() -> usize {
    4
}

fn default_batch_http_timeout_secs() -> u64 {
    60
}

impl WsyncConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Build configuration from the flat `key -> value` string map a host
    /// adapter reads from its own configuration surface.
    ///
    /// Recognized keys: `metadata-path`, `content-path`, `updates-filter`
    /// (JSON), `service-config-json`, `service-config-path`,
    /// `content-http-root`.
    pub fn from_flat_map(map: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let metadata_path = map
            .get("metadata-path")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::ValidationError {
                reasons: vec!["metadata-path is required".to_string()],
            })?;
        let content_path = map
            .get("content-path")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::ValidationError {
                reasons: vec!["content-path is required".to_string()],
            })?;

        let updates_filter = map
            .get("updates-filter")
            .map(|json| {
                serde_json::from_str(json).map_err(|e| ConfigError::FilterParseError {
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let service_config_json = if let Some(inline) = map.get("service-config-json") {
            Some(serde_json::from_str(inline).map_err(|e| ConfigError::ParseError {
                reason: e.to_string(),
            })?)
        } else if let Some(path) = map.get("service-config-path") {
            let contents =
                std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                    path: path.clone(),
                })?;
            Some(
                serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
                    reason: e.to_string(),
                })?,
            )
        } else {
            None
        };

        let content_http_root = map
            .get("content-http-root")
            .cloned()
            .unwrap_or_else(default_content_http_root);

        Ok(Self {
            metadata_path,
            content_path,
            updates_filter,
            service_config_json,
            content_http_root,
            log_level: default_log_level(),
            batch_retry: RetrySettings::default(),
            download_parallelism: default_download_parallelism(),
            batch_http_timeout_secs: default_batch_http_timeout_secs(),
        })
    }

    /// Produce advisory warnings about this configuration. Never fails;
    /// warnings never block operation.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if !self.content_path.exists() {
            warnings.push(ConfigWarning::ContentPathMissing {
                path: self.content_path.display().to_string(),
            });
        }
        if self.download_parallelism > 64 {
            warnings.push(ConfigWarning::LargeDownloadParallelism {
                value: self.download_parallelism,
            });
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_flat_map_requires_paths() {
        let map = BTreeMap::new();
        let err = WsyncConfig::from_flat_map(&map).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn from_flat_map_parses_filter_json() {
        let mut map = BTreeMap::new();
        map.insert("metadata-path".to_string(), "/tmp/meta".to_string());
        map.insert("content-path".to_string(), "/tmp/content".to_string());
        map.insert(
            "updates-filter".to_string(),
            r#"{"titleFilter":"Surface firmware","firstX":5}"#.to_string(),
        );

        let config = WsyncConfig::from_flat_map(&map).unwrap();
        let filter = config.updates_filter.unwrap();
        assert_eq!(filter.title_filter.as_deref(), Some("Surface firmware"));
        assert_eq!(filter.first_x, 5);
    }

    #[test]
    fn content_path_missing_is_a_warning_not_an_error() {
        let mut map = BTreeMap::new();
        map.insert("metadata-path".to_string(), "/tmp/meta-wsync-test".to_string());
        map.insert(
            "content-path".to_string(),
            "/tmp/does-not-exist-wsync-test".to_string(),
        );
        let config = WsyncConfig::from_flat_map(&map).unwrap();
        assert!(
            config
                .warnings()
                .iter()
                .any(|w| matches!(w, ConfigWarning::ContentPathMissing { .. }))
        );
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wsyncd.toml");
        let config = WsyncConfig {
            metadata_path: PathBuf::from("/tmp/meta"),
            content_path: dir.path().to_path_buf(),
            updates_filter: None,
            service_config_json: None,
            content_http_root: default_content_http_root(),
            log_level: default_log_level(),
            batch_retry: RetrySettings::default(),
            download_parallelism: default_download_parallelism(),
            batch_http_timeout_secs: default_batch_http_timeout_secs(),
        };
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        let loaded = WsyncConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
