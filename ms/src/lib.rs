//! MetricStore - catalog of metric origins for the dashboard daemon
//!
//! # Modules
//!
//! - [`catalog`] - origins, sources and metrics with atomic per-origin snapshots
//! - [`connector`] - backend adapters that list an origin's sources
//! - [`library`] - graph and collection definitions
//! - [`config`] - origin and library configuration types

pub mod catalog;
pub mod config;
pub mod connector;
pub mod error;
pub mod library;

pub use catalog::{Catalog, CatalogStats, CatalogStatus, Metric, Origin, Snapshot, Source};
pub use config::{ConnectorConfig, DEFAULT_PATTERN, LibraryConfig, OriginConfig};
pub use connector::{Connector, FileConnector, GraphiteConnector, SourcePattern, create_connector};
pub use error::{CatalogError, ConnectorError, LibraryError};
pub use library::{Item, ItemKind, Library, SeriesRef};
