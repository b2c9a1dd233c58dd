//! dashd - dashboard backend daemon
//!
//! Keeps a catalog of metric origins current with one worker per origin,
//! and runs the process lifecycle around it: start, configuration reload
//! and graceful shutdown with connection draining.
//!
//! # Modules
//!
//! - [`worker`] - single-threaded event actors and pools of them
//! - [`catalog`] - the catalog worker and per-origin refresh workers
//! - [`listener`] - stoppable TCP listener with live connection counting
//! - [`server`] - the orchestrator
//! - [`control`] - line-JSON control protocol, router trait and client
//! - [`config`] - configuration types and loading
//! - [`daemon`] - PID file and signalling a running daemon
//! - [`logging`] - log level selection and the switchable log sink
//! - [`cli`] - command-line interface

pub mod catalog;
pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod listener;
pub mod logging;
pub mod server;
pub mod worker;

pub use config::Config;
pub use server::{Server, ServerOptions, ServerState, StopReport};
