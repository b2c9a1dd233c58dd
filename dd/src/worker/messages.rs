//! Worker event types
//!
//! Events, statuses and errors for the worker actor.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

/// Opaque event payload; `Value::Null` when an event carries nothing
pub type Payload = serde_json::Value;

/// The closed set of events a worker can be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Init,
    Run,
    Refresh,
    Shutdown,
}

impl EventKind {
    /// Kinds every worker must handle before it may be spawned
    pub const LIFECYCLE: [EventKind; 3] = [EventKind::Init, EventKind::Run, EventKind::Shutdown];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Init => "init",
            EventKind::Run => "run",
            EventKind::Refresh => "refresh",
            EventKind::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerStatus {
    Created,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl WorkerStatus {
    /// Whether new events may still be queued
    pub fn is_accepting(self) -> bool {
        !matches!(self, WorkerStatus::Stopping | WorkerStatus::Stopped)
    }

    /// Whether an event of `kind` may run in this status
    pub(crate) fn admits(self, kind: EventKind) -> bool {
        match kind {
            EventKind::Init => self == WorkerStatus::Created,
            EventKind::Run => self == WorkerStatus::Initialized,
            EventKind::Shutdown => true,
            EventKind::Refresh => self == WorkerStatus::Running,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors from worker registration and event delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("Worker {worker} is not accepting events")]
    NotAccepting { worker: String },

    #[error("Worker {worker} already has a handler for {kind}")]
    DuplicateHandler { worker: String, kind: EventKind },

    #[error("Worker {worker} has no handler for {kind}")]
    MissingHandler { worker: String, kind: EventKind },

    #[error("Worker {worker} does not handle {kind} events")]
    Unhandled { worker: String, kind: EventKind },

    #[error("Worker {worker} cannot handle {kind} while {status}")]
    InvalidState {
        worker: String,
        kind: EventKind,
        status: WorkerStatus,
    },

    #[error("Worker {worker} failed handling {kind}: {message}")]
    Handler {
        worker: String,
        kind: EventKind,
        message: String,
    },

    #[error("Worker {worker} panicked handling {kind}")]
    Panicked { worker: String, kind: EventKind },

    #[error("Worker {worker} pool member already exists")]
    DuplicateMember { worker: String },

    #[error("Worker {worker} is not a pool member")]
    UnknownMember { worker: String },

    #[error("Worker {worker} event loop is gone")]
    ChannelError { worker: String },
}

impl WorkerError {
    /// Name of the worker the error is about
    pub fn worker(&self) -> &str {
        match self {
            WorkerError::NotAccepting { worker }
            | WorkerError::DuplicateHandler { worker, .. }
            | WorkerError::MissingHandler { worker, .. }
            | WorkerError::Unhandled { worker, .. }
            | WorkerError::InvalidState { worker, .. }
            | WorkerError::Handler { worker, .. }
            | WorkerError::Panicked { worker, .. }
            | WorkerError::DuplicateMember { worker }
            | WorkerError::UnknownMember { worker }
            | WorkerError::ChannelError { worker } => worker,
        }
    }
}

/// Result of handling one event
pub type WorkerResponse = Result<(), WorkerError>;

/// An event queued on a worker
#[derive(Debug)]
pub(crate) struct Envelope {
    pub kind: EventKind,
    pub payload: Payload,
    /// Present for synchronous sends
    pub reply: Option<oneshot::Sender<WorkerResponse>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_admits_lifecycle_order() {
        assert!(WorkerStatus::Created.admits(EventKind::Init));
        assert!(!WorkerStatus::Created.admits(EventKind::Run));
        assert!(!WorkerStatus::Created.admits(EventKind::Refresh));
        assert!(WorkerStatus::Initialized.admits(EventKind::Run));
        assert!(!WorkerStatus::Initialized.admits(EventKind::Init));
        assert!(WorkerStatus::Running.admits(EventKind::Refresh));
        assert!(WorkerStatus::Created.admits(EventKind::Shutdown));
    }

    #[test]
    fn test_status_accepting() {
        assert!(WorkerStatus::Running.is_accepting());
        assert!(!WorkerStatus::Stopping.is_accepting());
        assert!(!WorkerStatus::Stopped.is_accepting());
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::NotAccepting {
            worker: "origin/A".to_string(),
        };
        assert_eq!(err.to_string(), "Worker origin/A is not accepting events");
        assert_eq!(err.worker(), "origin/A");

        let err = WorkerError::InvalidState {
            worker: "catalog".to_string(),
            kind: EventKind::Refresh,
            status: WorkerStatus::Created,
        };
        assert_eq!(err.to_string(), "Worker catalog cannot handle refresh while Created");
    }
}
