//! Origin workers - one worker per configured origin
//!
//! Each worker owns its origin's connector. A `refresh` event lists the
//! origin's sources through it and swaps the catalog snapshot only when the
//! listing succeeded. A `refresh` payload may carry a new [`OriginConfig`];
//! the new connector is built before anything is replaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{Context, eyre};
use futures::future::BoxFuture;
use metricstore::{Catalog, Connector, ConnectorConfig, ConnectorError, OriginConfig, create_connector};
use tracing::{debug, info};

use super::retry::{RefreshPolicy, list_with_retry};
use crate::worker::{EventKind, Payload, Worker, WorkerError, WorkerHandle, WorkerPool};

/// Builds a connector for an origin
pub type ConnectorFactory =
    Arc<dyn Fn(&str, &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync>;

/// Factory backed by the connectors shipped with the store
pub fn default_connector_factory() -> ConnectorFactory {
    Arc::new(create_connector)
}

pub struct OriginState {
    name: String,
    catalog: Arc<Catalog>,
    config: OriginConfig,
    policy: RefreshPolicy,
    factory: ConnectorFactory,
    connector: Option<Arc<dyn Connector>>,
}

/// Build and spawn the worker for one origin
pub fn origin_worker(
    name: &str,
    catalog: Arc<Catalog>,
    config: OriginConfig,
    policy: RefreshPolicy,
    factory: ConnectorFactory,
) -> Result<WorkerHandle, WorkerError> {
    let mut worker = Worker::new(
        name,
        OriginState {
            name: name.to_string(),
            catalog,
            config,
            policy,
            factory,
            connector: None,
        },
    );
    worker.register(EventKind::Init, origin_init)?;
    worker.register(EventKind::Run, origin_run)?;
    worker.register(EventKind::Refresh, origin_refresh)?;
    worker.register(EventKind::Shutdown, origin_shutdown)?;
    worker.spawn()
}

/// Spawn one worker per origin into a new pool
pub fn origin_pool(
    origins: &BTreeMap<String, OriginConfig>,
    catalog: Arc<Catalog>,
    policy: &RefreshPolicy,
    factory: &ConnectorFactory,
) -> Result<WorkerPool, WorkerError> {
    let pool = WorkerPool::new();
    for (name, config) in origins {
        pool.add(origin_worker(
            name,
            catalog.clone(),
            config.clone(),
            policy.clone(),
            factory.clone(),
        )?)?;
    }
    Ok(pool)
}

fn origin_init(state: &mut OriginState, _payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        debug!(origin = %state.name, "origin_init: called");
        state
            .catalog
            .origin(&state.name)
            .context(format!("Origin {} is not attached to the catalog", state.name))?;
        let connector = (state.factory)(&state.name, &state.config.connector)
            .context(format!("Failed to build connector for origin {}", state.name))?;
        state.connector = Some(connector);
        Ok(())
    })
}

fn origin_run(state: &mut OriginState, _payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        info!(
            origin = %state.name,
            connector = state.config.connector.kind(),
            "Origin worker running"
        );
        Ok(())
    })
}

fn origin_refresh(state: &mut OriginState, payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        debug!(origin = %state.name, reconfigure = !payload.is_null(), "origin_refresh: called");
        if !payload.is_null() {
            let config: OriginConfig =
                serde_json::from_value(payload).context("Invalid origin configuration in refresh payload")?;
            if config != state.config {
                let connector = (state.factory)(&state.name, &config.connector).context(format!(
                    "Failed to rebuild connector for origin {}, keeping the previous one",
                    state.name
                ))?;
                state.connector = Some(connector);
                state.config = config;
                info!(origin = %state.name, connector = state.config.connector.kind(), "Origin reconfigured");
            }
        }

        let connector = state
            .connector
            .clone()
            .ok_or_else(|| eyre!("Origin {} has no connector", state.name))?;
        let sources = list_with_retry(&state.name, connector.as_ref(), &state.policy)
            .await
            .context(format!("Refresh of origin {} failed, keeping previous sources", state.name))?;

        let snapshot = state.catalog.replace_sources(&state.name, sources)?;
        info!(
            origin = %state.name,
            sources = snapshot.len(),
            metrics = snapshot.metric_count(),
            "Origin refreshed"
        );
        Ok(())
    })
}

fn origin_shutdown(state: &mut OriginState, _payload: Payload) -> BoxFuture<'_, eyre::Result<()>> {
    Box::pin(async move {
        debug!(origin = %state.name, "origin_shutdown: called");
        state.connector = None;
        Ok(())
    })
}
