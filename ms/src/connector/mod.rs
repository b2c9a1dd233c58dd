//! Connectors - backend adapters that list an origin's sources
//!
//! A connector only reads: it enumerates the metric paths its backend knows
//! about and maps each one to a `(source, metric)` pair through the origin's
//! pattern. Swapping the result into the catalog is the caller's job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

mod file;
mod graphite;
mod pattern;

pub use file::FileConnector;
pub use graphite::GraphiteConnector;
pub use pattern::SourcePattern;

use crate::catalog::Source;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;

/// Lists the sources currently available from one origin's backend
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector type name, for logs
    fn kind(&self) -> &'static str;

    /// Enumerate every source and metric the backend exposes
    async fn list(&self) -> Result<Vec<Source>, ConnectorError>;
}

/// Create a connector for the named origin from its configuration
///
/// Fails only on invalid configuration (bad pattern, bad URL); backend
/// reachability is checked by [`Connector::list`].
pub fn create_connector(origin: &str, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> {
    debug!(%origin, kind = config.kind(), "create_connector: called");
    match config {
        ConnectorConfig::File { path, pattern } => {
            let pattern = SourcePattern::new(pattern)?;
            Ok(Arc::new(FileConnector::new(origin, path.clone(), pattern)))
        }
        ConnectorConfig::Graphite {
            url,
            pattern,
            timeout_ms,
        } => {
            let pattern = SourcePattern::new(pattern)?;
            Ok(Arc::new(GraphiteConnector::new(origin, url, pattern, *timeout_ms)?))
        }
    }
}

/// Group matched metric paths into sources
fn collect_sources<'a>(
    origin: &str,
    pattern: &SourcePattern,
    paths: impl IntoIterator<Item = &'a str>,
) -> Vec<Source> {
    let mut sources: std::collections::BTreeMap<String, Source> = std::collections::BTreeMap::new();
    for path in paths {
        match pattern.split(path) {
            Some((source, metric)) => {
                sources
                    .entry(source.clone())
                    .or_insert_with(|| Source::new(source, origin))
                    .add_metric(metric, path);
            }
            None => debug!(%origin, %path, "collect_sources: path does not match pattern, skipping"),
        }
    }
    sources.into_values().collect()
}
