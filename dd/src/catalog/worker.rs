//! Catalog worker - sole owner of the catalog's structure

use std::sync::Arc;

use eyre::Context;
use futures::future::BoxFuture;
use metricstore::Catalog;
use tracing::{debug, info};

use crate::worker::{EventKind, Payload, Worker, WorkerError, WorkerHandle};

/// Name of the catalog worker
pub const CATALOG_WORKER: &str = "catalog";

pub struct CatalogState {
    catalog: Arc<Catalog>,
}

/// Build and spawn the catalog worker; `init` attaches the catalog's configured origins
pub fn catalog_worker(catalog: Arc<Catalog>) -> Result<WorkerHandle, WorkerError> {
    let mut worker = Worker::new(CATALOG_WORKER, CatalogState { catalog });
    worker.register(EventKind::Init, catalog_init)?;
    worker.register(EventKind::Run, catalog_run)?;
    worker.register(EventKind::Shutdown, catalog_shutdown)?;
    worker.spawn()
}

fn catalog_init(state: &mut CatalogState, _payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        let catalog = &state.catalog;
        debug!(origins = catalog.configured().len(), "catalog_init: called");
        for (name, config) in catalog.configured() {
            catalog
                .attach_origin(name, config.clone())
                .context(format!("Failed to attach origin {}", name))?;
        }
        catalog.mark_initialized()?;
        info!(origins = catalog.configured().len(), "Catalog initialized");
        Ok(())
    })
}

fn catalog_run(state: &mut CatalogState, _payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        state.catalog.mark_ready()?;
        info!("Catalog ready");
        Ok(())
    })
}

fn catalog_shutdown(state: &mut CatalogState, _payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        debug!("catalog_shutdown: called");
        state.catalog.release();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::origin::tests::file_config;
    use crate::worker::WorkerStatus;
    use metricstore::{CatalogError, CatalogStatus, OriginConfig};
    use std::collections::BTreeMap;

    fn origins(names: &[&str]) -> BTreeMap<String, OriginConfig> {
        names
            .iter()
            .map(|name| (name.to_string(), file_config(&format!("/{}", name))))
            .collect()
    }

    #[tokio::test]
    async fn test_lifecycle_drives_catalog_status() {
        let catalog = Arc::new(Catalog::new(origins(&["A", "B"]), 0));
        let handle = catalog_worker(catalog.clone()).unwrap();

        handle.send(EventKind::Init, Payload::Null, true).await.unwrap();
        assert_eq!(catalog.status(), CatalogStatus::Initialized);
        assert_eq!(catalog.origin_names().unwrap(), vec!["A".to_string(), "B".to_string()]);
        assert!(catalog.sources("A").unwrap().is_empty());

        handle.send(EventKind::Run, Payload::Null, true).await.unwrap();
        assert_eq!(catalog.status(), CatalogStatus::Ready);

        handle.send(EventKind::Shutdown, Payload::Null, true).await.unwrap();
        assert_eq!(handle.status(), WorkerStatus::Stopped);
        assert_eq!(catalog.status(), CatalogStatus::Closing);
        assert!(matches!(catalog.sources("A"), Err(CatalogError::Closed)));

        catalog.close();
        catalog.close();
        assert!(catalog.is_closed());
    }

    #[tokio::test]
    async fn test_refresh_is_not_handled() {
        let catalog = Arc::new(Catalog::new(origins(&[]), 0));
        let handle = catalog_worker(catalog).unwrap();
        handle.send(EventKind::Init, Payload::Null, true).await.unwrap();
        handle.send(EventKind::Run, Payload::Null, true).await.unwrap();

        let err = handle.send(EventKind::Refresh, Payload::Null, true).await.unwrap_err();
        assert!(matches!(err, WorkerError::Unhandled { .. }));
    }

    #[tokio::test]
    async fn test_init_on_closed_catalog_fails() {
        let catalog = Arc::new(Catalog::new(origins(&["A"]), 0));
        catalog.close();
        let handle = catalog_worker(catalog).unwrap();
        let err = handle.send(EventKind::Init, Payload::Null, true).await.unwrap_err();
        assert!(err.to_string().contains("Failed to attach origin A"));
    }
}
