//! Error types for the catalog, its connectors and the library

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from catalog reads and writes
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog is closed")]
    Closed,

    #[error("Catalog is not initialized")]
    NotInitialized,

    #[error("Unknown origin: {0}")]
    UnknownOrigin(String),

    #[error("Origin already attached: {0}")]
    DuplicateOrigin(String),
}

/// Errors raised while listing an origin's sources
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Origin unreachable: {0}")]
    Unreachable(String),

    #[error("Backend error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid connector configuration: {0}")]
    Config(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl ConnectorError {
    /// Check if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::Unreachable(_) => true,
            ConnectorError::Backend { status, .. } => *status >= 500,
            ConnectorError::Network(_) => true,
            ConnectorError::Timeout(_) => true,
            ConnectorError::Pattern(_) => false,
            ConnectorError::Config(_) => false,
        }
    }
}

/// Errors from library refreshes
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Failed to read library path {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate definition id: {0}")]
    DuplicateId(String),
}
