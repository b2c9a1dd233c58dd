//! Worker actors and pools
//!
//! A [`Worker`] owns its state and runs one event at a time; a
//! [`WorkerPool`] addresses a group of them by name.

mod actor;
mod messages;
mod pool;

pub use actor::{HandlerFn, Worker, WorkerHandle};
pub use messages::{EventKind, Payload, WorkerError, WorkerResponse, WorkerStatus};
pub use pool::WorkerPool;
