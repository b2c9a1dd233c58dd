//! Origin and library configuration types
//!
//! These are embedded in the daemon's YAML configuration file, so keys use
//! the same kebab-case convention.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default mapping from a backend path to `source` and `metric` names
pub const DEFAULT_PATTERN: &str = r"^(?P<source>[^./]+)[./](?P<metric>.+)$";

/// Configuration for one metrics origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Backend connector settings
    pub connector: ConnectorConfig,
}

/// Backend connector settings, selected by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConnectorConfig {
    /// Metrics stored as files below a directory (one file per metric)
    File {
        /// Root directory to scan
        path: PathBuf,

        /// Regex with `source` and `metric` named groups, applied to the path relative to `path`
        #[serde(default = "default_pattern")]
        pattern: String,
    },

    /// Graphite web API
    Graphite {
        /// Base URL, e.g. `http://graphite.example.net`
        url: String,

        /// Regex with `source` and `metric` named groups, applied to the dotted metric path
        #[serde(default = "default_pattern")]
        pattern: String,

        /// HTTP request timeout in milliseconds
        #[serde(rename = "timeout-ms", default = "default_graphite_timeout_ms")]
        timeout_ms: u64,
    },
}

impl ConnectorConfig {
    /// Name of the connector type, as written in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectorConfig::File { .. } => "file",
            ConnectorConfig::Graphite { .. } => "graphite",
        }
    }

    /// The source/metric pattern configured for this connector
    pub fn pattern(&self) -> &str {
        match self {
            ConnectorConfig::File { pattern, .. } => pattern,
            ConnectorConfig::Graphite { pattern, .. } => pattern,
        }
    }
}

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_graphite_timeout_ms() -> u64 {
    10_000
}

/// Library storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding graph and collection definitions (`*.json`)
    pub path: Option<PathBuf>,
}
