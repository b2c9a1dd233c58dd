//! Server lifecycle states and reports

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use metricstore::CatalogStats;
use serde::{Deserialize, Serialize};

use crate::worker::WorkerStatus;

/// Process lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerState {
    Created,
    ConfigLoaded,
    CatalogInitialized,
    OriginsStarted,
    Serving,
    Reloading,
    Stopping,
    Stopped,
    /// Start aborted
    Failed,
}

impl ServerState {
    /// Whether connections are being served
    pub fn is_serving(self) -> bool {
        matches!(self, ServerState::Serving | ServerState::Reloading)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a graceful stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Connections still open when the drain wait ended
    pub remaining_connections: usize,
    /// Origin workers that had not stopped in time
    pub straggler_workers: Vec<String>,
    pub elapsed: Duration,
}

impl StopReport {
    /// Everything finished within its timeout
    pub fn is_clean(&self) -> bool {
        self.remaining_connections == 0 && self.straggler_workers.is_empty()
    }
}

/// Snapshot of the running server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub state: ServerState,
    pub loading: bool,
    pub uptime_secs: u64,
    pub connections: usize,
    pub catalog: Option<CatalogStats>,
    pub library_items: usize,
    pub workers: BTreeMap<String, WorkerStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_kebab_case() {
        let json = serde_json::to_string(&ServerState::CatalogInitialized).unwrap();
        assert_eq!(json, r#""catalog-initialized""#);
        assert!(ServerState::Reloading.is_serving());
        assert!(!ServerState::Stopping.is_serving());
    }

    #[test]
    fn test_stop_report_clean() {
        let report = StopReport {
            remaining_connections: 0,
            straggler_workers: vec![],
            elapsed: Duration::from_millis(3),
        };
        assert!(report.is_clean());

        let report = StopReport {
            remaining_connections: 2,
            ..report
        };
        assert!(!report.is_clean());
    }
}
