//! Catalog - in-memory index of origins, their sources and metrics
//!
//! Structural changes (attaching origins, closing) belong to a single owner,
//! the catalog worker. Each origin's content is an immutable [`Snapshot`]
//! behind an `Arc`; a refresh builds a complete new snapshot and swaps the
//! reference, so a reader always sees either the old or the new set of
//! sources, never a mix.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OriginConfig;
use crate::error::CatalogError;

/// A single metric exposed by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metric {
    /// Metric name within its source
    pub name: String,
    /// Path of the metric in the backend it was read from
    pub original: String,
}

/// A named unit (host, instance, ...) under an origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub name: String,
    pub origin: String,
    pub metrics: BTreeMap<String, Metric>,
}

impl Source {
    pub fn new(name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Add a metric, replacing any metric with the same name
    pub fn add_metric(&mut self, name: impl Into<String>, original: impl Into<String>) {
        let name = name.into();
        self.metrics.insert(
            name.clone(),
            Metric {
                name,
                original: original.into(),
            },
        );
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }
}

/// Immutable set of sources for one origin
#[derive(Debug, Default)]
pub struct Snapshot {
    sources: BTreeMap<String, Arc<Source>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// The snapshot of an origin that never refreshed successfully
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from freshly listed sources
    ///
    /// Sources sharing a name are merged.
    pub fn from_sources(sources: Vec<Source>) -> Self {
        let mut merged: BTreeMap<String, Source> = BTreeMap::new();
        for source in sources {
            match merged.get_mut(&source.name) {
                Some(existing) => existing.metrics.extend(source.metrics),
                None => {
                    merged.insert(source.name.clone(), source);
                }
            }
        }

        Self {
            sources: merged.into_iter().map(|(name, source)| (name, Arc::new(source))).collect(),
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn source(&self, name: &str) -> Option<Arc<Source>> {
        self.sources.get(name).cloned()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<Source>> {
        self.sources.values()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn metric_count(&self) -> usize {
        self.sources.values().map(|s| s.metrics.len()).sum()
    }

    /// When this snapshot was built; `None` if the origin never refreshed
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

/// A configured metrics origin and its current snapshot
#[derive(Debug)]
pub struct Origin {
    name: String,
    config: OriginConfig,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Origin {
    fn new(name: String, config: OriginConfig) -> Self {
        Self {
            name,
            config,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    /// Current snapshot; cheap to call, never blocks on a refresh in progress
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn swap(&self, snapshot: Arc<Snapshot>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}

/// Catalog lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogStatus {
    /// Created, origins not attached yet
    Pending,
    /// Configured origins attached
    Initialized,
    /// Accepting refresh triggers
    Ready,
    /// Origin resources released, waiting for close
    Closing,
    Closed,
}

impl CatalogStatus {
    fn is_closed(self) -> bool {
        matches!(self, CatalogStatus::Closing | CatalogStatus::Closed)
    }
}

/// Counters reported by the stats endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub status: CatalogStatus,
    pub origins: usize,
    pub sources: usize,
    pub metrics: usize,
}

#[derive(Debug)]
struct Inner {
    status: CatalogStatus,
    origins: BTreeMap<String, Arc<Origin>>,
}

/// The shared registry of origins
#[derive(Debug)]
pub struct Catalog {
    inner: RwLock<Inner>,
    configured: BTreeMap<String, OriginConfig>,
    debug_level: u8,
}

impl Catalog {
    /// Build an empty catalog for the configured origins
    ///
    /// Nothing is attached yet; the catalog worker attaches the configured
    /// set during its `init`.
    pub fn new(configured: BTreeMap<String, OriginConfig>, debug_level: u8) -> Self {
        debug!(origins = configured.len(), debug_level, "Catalog::new: called");
        Self {
            inner: RwLock::new(Inner {
                status: CatalogStatus::Pending,
                origins: BTreeMap::new(),
            }),
            configured,
            debug_level,
        }
    }

    /// Origins the catalog was built for
    pub fn configured(&self) -> &BTreeMap<String, OriginConfig> {
        &self.configured
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn readable(&self) -> Result<RwLockReadGuard<'_, Inner>, CatalogError> {
        let inner = self.read();
        if inner.status.is_closed() {
            return Err(CatalogError::Closed);
        }
        Ok(inner)
    }

    pub fn debug_level(&self) -> u8 {
        self.debug_level
    }

    pub fn status(&self) -> CatalogStatus {
        self.read().status
    }

    /// Attach a configured origin with an empty snapshot
    pub fn attach_origin(&self, name: &str, config: OriginConfig) -> Result<Arc<Origin>, CatalogError> {
        debug!(%name, connector = config.connector.kind(), "attach_origin: called");
        let mut inner = self.write();
        if inner.status.is_closed() {
            return Err(CatalogError::Closed);
        }
        if inner.origins.contains_key(name) {
            return Err(CatalogError::DuplicateOrigin(name.to_string()));
        }

        let origin = Arc::new(Origin::new(name.to_string(), config));
        inner.origins.insert(name.to_string(), origin.clone());
        Ok(origin)
    }

    /// Mark the configured origin set as attached
    pub fn mark_initialized(&self) -> Result<(), CatalogError> {
        self.transition(CatalogStatus::Pending, CatalogStatus::Initialized)
    }

    /// Start accepting refresh triggers
    pub fn mark_ready(&self) -> Result<(), CatalogError> {
        self.transition(CatalogStatus::Initialized, CatalogStatus::Ready)
    }

    fn transition(&self, from: CatalogStatus, to: CatalogStatus) -> Result<(), CatalogError> {
        let mut inner = self.write();
        match inner.status {
            status if status == from => {
                debug!(?from, ?to, "Catalog status transition");
                inner.status = to;
                Ok(())
            }
            status if status.is_closed() => Err(CatalogError::Closed),
            _ => Err(CatalogError::NotInitialized),
        }
    }

    pub fn origin(&self, name: &str) -> Result<Arc<Origin>, CatalogError> {
        self.readable()?
            .origins
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownOrigin(name.to_string()))
    }

    pub fn origin_names(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.readable()?.origins.keys().cloned().collect())
    }

    pub fn origins(&self) -> Result<Vec<Arc<Origin>>, CatalogError> {
        Ok(self.readable()?.origins.values().cloned().collect())
    }

    /// Current snapshot of an origin's sources
    pub fn sources(&self, origin: &str) -> Result<Arc<Snapshot>, CatalogError> {
        Ok(self.origin(origin)?.snapshot())
    }

    /// Atomically replace an origin's sources with a freshly listed set
    ///
    /// Holds the catalog read lock across the swap so a concurrent close
    /// cannot interleave with it.
    pub fn replace_sources(&self, origin: &str, sources: Vec<Source>) -> Result<Arc<Snapshot>, CatalogError> {
        let inner = self.readable()?;
        if inner.status == CatalogStatus::Pending {
            return Err(CatalogError::NotInitialized);
        }
        let target = inner
            .origins
            .get(origin)
            .ok_or_else(|| CatalogError::UnknownOrigin(origin.to_string()))?;

        let snapshot = Arc::new(Snapshot::from_sources(sources));
        target.swap(snapshot.clone());
        debug!(
            %origin,
            sources = snapshot.len(),
            metrics = snapshot.metric_count(),
            "replace_sources: snapshot swapped"
        );
        Ok(snapshot)
    }

    /// Release every origin's snapshot; reads fail from here on
    pub fn release(&self) {
        let mut inner = self.write();
        if inner.status == CatalogStatus::Closed {
            return;
        }
        for origin in inner.origins.values() {
            origin.swap(Arc::new(Snapshot::empty()));
        }
        inner.status = CatalogStatus::Closing;
        info!(origins = inner.origins.len(), "Catalog origins released");
    }

    /// Close the catalog; idempotent
    pub fn close(&self) {
        let mut inner = self.write();
        if inner.status == CatalogStatus::Closed {
            debug!("close: catalog already closed");
            return;
        }
        inner.origins.clear();
        inner.status = CatalogStatus::Closed;
        info!("Catalog closed");
    }

    pub fn is_closed(&self) -> bool {
        self.status().is_closed()
    }

    pub fn stats(&self) -> CatalogStats {
        let inner = self.read();
        let snapshots: Vec<Arc<Snapshot>> = inner.origins.values().map(|o| o.snapshot()).collect();
        CatalogStats {
            status: inner.status,
            origins: inner.origins.len(),
            sources: snapshots.iter().map(|s| s.len()).sum(),
            metrics: snapshots.iter().map(|s| s.metric_count()).sum(),
        }
    }
}
