//! Control protocol message types
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use metricstore::ItemKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::ServerStats;

/// Requests from an operator or the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRequest {
    /// Check the daemon is alive
    Ping,

    /// Reload the configuration
    Reload,

    /// List origin names
    Origins,

    /// List the sources of one origin
    Sources { origin: String },

    /// Server counters
    Stats,

    /// List library definitions
    Library,
}

/// A source and its metric names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub metrics: Vec<String>,
}

/// A library definition and how many of its series the catalog lacks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryEntry {
    pub id: String,
    pub kind: ItemKind,
    pub name: String,
    #[serde(rename = "missing-series")]
    pub missing_series: usize,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlResponse {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    Origins { origins: Vec<String> },

    Sources { origin: String, sources: Vec<SourceEntry> },

    Stats { stats: ServerStats },

    Library { items: Vec<LibraryEntry> },

    /// Error response
    Error { message: String },
}

/// Errors from the control client
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out talking to the daemon")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Unexpected response: {0:?}")]
    Unexpected(Box<ControlResponse>),
}
