//! Library - graph and collection definitions
//!
//! Definitions live as `*.json` files below the configured directory. A
//! refresh loads the whole directory into a new snapshot and swaps it in;
//! if anything fails to load the previous snapshot stays.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::config::LibraryConfig;
use crate::error::LibraryError;

/// Kind of library definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    Graph,
    Collection,
}

/// A metric referenced by a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRef {
    pub origin: String,
    pub source: String,
    pub metric: String,
}

/// A stored graph or collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub name: String,
    #[serde(default)]
    pub series: Vec<SeriesRef>,
    /// Graph ids, for collections
    #[serde(default)]
    pub entries: Vec<String>,
}

#[derive(Debug, Default)]
struct LibrarySnapshot {
    items: BTreeMap<String, Arc<Item>>,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct Library {
    config: RwLock<LibraryConfig>,
    catalog: Arc<Catalog>,
    snapshot: RwLock<Arc<LibrarySnapshot>>,
    refresh_lock: Mutex<()>,
    debug_level: u8,
}

impl Library {
    pub fn new(config: LibraryConfig, catalog: Arc<Catalog>, debug_level: u8) -> Self {
        debug!(path = ?config.path, debug_level, "Library::new: called");
        Self {
            config: RwLock::new(config),
            catalog,
            snapshot: RwLock::new(Arc::new(LibrarySnapshot::default())),
            refresh_lock: Mutex::new(()),
            debug_level,
        }
    }

    pub fn debug_level(&self) -> u8 {
        self.debug_level
    }

    /// Point the library at a new configuration; takes effect on the next refresh
    pub fn reconfigure(&self, config: LibraryConfig) {
        debug!(path = ?config.path, "Library::reconfigure: called");
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Reload every definition from disk
    ///
    /// Concurrent refreshes run one after the other. Readers keep seeing the
    /// previous snapshot until the new one is complete.
    pub async fn refresh(&self) -> Result<usize, LibraryError> {
        let _guard = self.refresh_lock.lock().await;
        let path = self.config.read().unwrap_or_else(|e| e.into_inner()).path.clone();
        debug!(?path, "Library::refresh: called");

        let items = match path {
            Some(path) => {
                let loaded = tokio::task::spawn_blocking(move || load_items(&path)).await.map_err(|e| {
                    LibraryError::Read {
                        path: PathBuf::new(),
                        source: std::io::Error::other(e.to_string()),
                    }
                })?;
                match loaded {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(error = %e, "Library refresh failed, keeping previous definitions");
                        return Err(e);
                    }
                }
            }
            None => BTreeMap::new(),
        };

        let count = items.len();
        let snapshot = LibrarySnapshot {
            items,
            refreshed_at: Some(Utc::now()),
        };
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
        info!(items = count, "Library refreshed");
        Ok(count)
    }

    fn current(&self) -> Arc<LibrarySnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Item>> {
        self.current().items.get(id).cloned()
    }

    pub fn items(&self) -> Vec<Arc<Item>> {
        self.current().items.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.current().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.current().refreshed_at
    }

    /// Series of a graph that the catalog does not currently know about
    pub fn missing_series(&self, id: &str) -> Option<Vec<SeriesRef>> {
        let item = self.get(id)?;
        let missing = item
            .series
            .iter()
            .filter(|series| {
                self.catalog
                    .sources(&series.origin)
                    .ok()
                    .and_then(|snapshot| snapshot.source(&series.source))
                    .is_none_or(|source| !source.metrics.contains_key(&series.metric))
            })
            .cloned()
            .collect();
        Some(missing)
    }
}

fn load_items(root: &Path) -> Result<BTreeMap<String, Arc<Item>>, LibraryError> {
    let mut items = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| LibraryError::Read {
            path: root.to_path_buf(),
            source: e.into(),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        let content = std::fs::read_to_string(path).map_err(|source| LibraryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let item: Item = serde_json::from_str(&content).map_err(|source| LibraryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if items.contains_key(&item.id) {
            return Err(LibraryError::DuplicateId(item.id));
        }
        items.insert(item.id.clone(), Arc::new(item));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Source;
    use crate::config::{ConnectorConfig, DEFAULT_PATTERN, OriginConfig};
    use tempfile::TempDir;

    fn write_item(dir: &Path, file: &str, json: &str) {
        std::fs::write(dir.join(file), json).unwrap();
    }

    fn catalog_with_web1() -> Arc<Catalog> {
        let catalog = Catalog::new(BTreeMap::new(), 0);
        catalog
            .attach_origin(
                "A",
                OriginConfig {
                    connector: ConnectorConfig::File {
                        path: PathBuf::from("/nonexistent"),
                        pattern: DEFAULT_PATTERN.to_string(),
                    },
                },
            )
            .unwrap();
        catalog.mark_initialized().unwrap();
        let mut web1 = Source::new("web1", "A");
        web1.add_metric("cpu", "web1.cpu");
        catalog.replace_sources("A", vec![web1]).unwrap();
        Arc::new(catalog)
    }

    fn library_at(dir: &Path) -> Library {
        Library::new(
            LibraryConfig {
                path: Some(dir.to_path_buf()),
            },
            catalog_with_web1(),
            0,
        )
    }

    #[tokio::test]
    async fn test_refresh_loads_definitions() {
        let temp = TempDir::new().unwrap();
        write_item(
            temp.path(),
            "cpu.json",
            r#"{"id": "g1", "type": "graph", "name": "CPU", "series": [{"origin": "A", "source": "web1", "metric": "cpu"}]}"#,
        );
        write_item(
            temp.path(),
            "hosts.json",
            r#"{"id": "c1", "type": "collection", "name": "Hosts", "entries": ["g1"]}"#,
        );
        write_item(temp.path(), "notes.txt", "ignored");

        let library = library_at(temp.path());
        assert!(library.is_empty());
        assert_eq!(library.refresh().await.unwrap(), 2);
        assert_eq!(library.get("g1").unwrap().kind, ItemKind::Graph);
        assert_eq!(library.get("c1").unwrap().entries, vec!["g1".to_string()]);
        assert!(library.refreshed_at().is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_definitions() {
        let temp = TempDir::new().unwrap();
        write_item(temp.path(), "cpu.json", r#"{"id": "g1", "type": "graph", "name": "CPU"}"#);

        let library = library_at(temp.path());
        library.refresh().await.unwrap();

        write_item(temp.path(), "broken.json", "{not json");
        let err = library.refresh().await.unwrap_err();
        assert!(matches!(err, LibraryError::Parse { .. }));
        assert_eq!(library.len(), 1);
        assert!(library.get("g1").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let temp = TempDir::new().unwrap();
        write_item(temp.path(), "a.json", r#"{"id": "g1", "type": "graph", "name": "A"}"#);
        write_item(temp.path(), "b.json", r#"{"id": "g1", "type": "graph", "name": "B"}"#);

        let library = library_at(temp.path());
        assert!(matches!(library.refresh().await, Err(LibraryError::DuplicateId(id)) if id == "g1"));
    }

    #[tokio::test]
    async fn test_unconfigured_library_is_empty() {
        let library = Library::new(LibraryConfig::default(), catalog_with_web1(), 0);
        assert_eq!(library.refresh().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconfigure_takes_effect_on_refresh() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_item(second.path(), "a.json", r#"{"id": "g2", "type": "graph", "name": "A"}"#);

        let library = library_at(first.path());
        library.refresh().await.unwrap();
        assert!(library.is_empty());

        library.reconfigure(LibraryConfig {
            path: Some(second.path().to_path_buf()),
        });
        library.refresh().await.unwrap();
        assert!(library.get("g2").is_some());
    }

    #[tokio::test]
    async fn test_missing_series_checks_catalog() {
        let temp = TempDir::new().unwrap();
        write_item(
            temp.path(),
            "g.json",
            r#"{"id": "g1", "type": "graph", "name": "G", "series": [
                {"origin": "A", "source": "web1", "metric": "cpu"},
                {"origin": "A", "source": "web1", "metric": "load"},
                {"origin": "B", "source": "db1", "metric": "qps"}
            ]}"#,
        );
        let library = library_at(temp.path());
        library.refresh().await.unwrap();

        let missing = library.missing_series("g1").unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].metric, "load");
        assert_eq!(missing[1].origin, "B");
        assert!(library.missing_series("nope").is_none());
    }
}
