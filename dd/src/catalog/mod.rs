//! Catalog workers
//!
//! - [`catalog_worker`] - attaches the configured origins and closes them at shutdown
//! - [`origin_worker`] - one per origin, refreshes its sources with retry

mod origin;
mod retry;
mod worker;

pub use origin::{ConnectorFactory, OriginState, default_connector_factory, origin_pool, origin_worker};
pub use retry::{RefreshPolicy, list_with_retry};
pub use worker::{CATALOG_WORKER, CatalogState, catalog_worker};

#[cfg(test)]
pub(crate) use origin::tests as mock;
