//! Process orchestration
//!
//! [`Server`] drives start, reload and graceful stop of the catalog, its
//! workers and the listener.

mod orchestrator;
mod state;

pub use orchestrator::{Server, ServerOptions};
pub use state::{ServerState, ServerStats, StopReport};
