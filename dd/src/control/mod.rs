//! Control protocol served on the daemon's listener
//!
//! Line-delimited JSON: one request per line, one response per line. A
//! connection stays open for as many requests as the client sends.

pub mod client;
pub mod messages;
pub mod router;

pub use client::ControlClient;
pub use messages::{ControlError, ControlRequest, ControlResponse, LibraryEntry, SourceEntry};
pub use router::{ControlRouter, Router, handle_request};
