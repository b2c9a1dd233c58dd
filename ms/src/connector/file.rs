//! File connector - one file per metric below a root directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::{Connector, SourcePattern, collect_sources};
use crate::catalog::Source;
use crate::error::ConnectorError;

/// Lists metrics by walking a directory tree
///
/// Each regular file's path relative to the root, with `/` separators, is
/// matched against the pattern.
pub struct FileConnector {
    origin: String,
    root: PathBuf,
    pattern: SourcePattern,
}

impl FileConnector {
    pub fn new(origin: &str, root: PathBuf, pattern: SourcePattern) -> Self {
        Self {
            origin: origin.to_string(),
            root,
            pattern,
        }
    }
}

fn scan(root: &Path) -> Result<Vec<String>, ConnectorError> {
    if !root.is_dir() {
        return Err(ConnectorError::Unreachable(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| ConnectorError::Unreachable(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;
        let parts: Vec<String> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        paths.push(parts.join("/"));
    }
    Ok(paths)
}

#[async_trait]
impl Connector for FileConnector {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn list(&self) -> Result<Vec<Source>, ConnectorError> {
        debug!(origin = %self.origin, root = %self.root.display(), "FileConnector::list: called");
        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| ConnectorError::Unreachable(format!("scan task failed: {}", e)))??;

        let sources = collect_sources(&self.origin, &self.pattern, paths.iter().map(String::as_str));
        debug!(origin = %self.origin, files = paths.len(), sources = sources.len(), "FileConnector::list: done");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PATTERN;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[tokio::test]
    async fn test_lists_sources_from_directory_tree() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "web1/cpu.rrd");
        touch(temp.path(), "web1/load.rrd");
        touch(temp.path(), "web2/cpu.rrd");
        touch(temp.path(), "README");

        let connector = FileConnector::new(
            "rrd",
            temp.path().to_path_buf(),
            SourcePattern::new(DEFAULT_PATTERN).unwrap(),
        );
        let mut sources = connector.list().await.unwrap();
        sources.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "web1");
        assert_eq!(sources[0].metric_names(), vec!["cpu.rrd", "load.rrd"]);
        assert_eq!(sources[1].metrics["cpu.rrd"].original, "web2/cpu.rrd");
    }

    #[tokio::test]
    async fn test_missing_directory_is_unreachable() {
        let temp = TempDir::new().unwrap();
        let connector = FileConnector::new(
            "rrd",
            temp.path().join("missing"),
            SourcePattern::new(DEFAULT_PATTERN).unwrap(),
        );
        let err = connector.list().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Unreachable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_directory_yields_no_sources() {
        let temp = TempDir::new().unwrap();
        let connector = FileConnector::new(
            "rrd",
            temp.path().to_path_buf(),
            SourcePattern::new(DEFAULT_PATTERN).unwrap(),
        );
        assert!(connector.list().await.unwrap().is_empty());
    }
}
