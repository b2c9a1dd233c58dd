//! Graphite connector - reads the metric index of a Graphite web API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{Connector, SourcePattern, collect_sources};
use crate::catalog::Source;
use crate::error::ConnectorError;

const INDEX_PATH: &str = "/metrics/index.json";

pub struct GraphiteConnector {
    origin: String,
    index_url: String,
    pattern: SourcePattern,
    http: Client,
    timeout: Duration,
}

impl GraphiteConnector {
    pub fn new(origin: &str, url: &str, pattern: SourcePattern, timeout_ms: u64) -> Result<Self, ConnectorError> {
        debug!(%origin, %url, timeout_ms, "GraphiteConnector::new: called");
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConnectorError::Config(format!("invalid graphite url '{}'", url)));
        }

        let timeout = Duration::from_millis(timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(ConnectorError::Network)?;

        Ok(Self {
            origin: origin.to_string(),
            index_url: format!("{}{}", url.trim_end_matches('/'), INDEX_PATH),
            pattern,
            http,
            timeout,
        })
    }
}

#[async_trait]
impl Connector for GraphiteConnector {
    fn kind(&self) -> &'static str {
        "graphite"
    }

    async fn list(&self) -> Result<Vec<Source>, ConnectorError> {
        debug!(origin = %self.origin, url = %self.index_url, "GraphiteConnector::list: called");
        let response = self.http.get(&self.index_url).send().await.map_err(|e| {
            if e.is_timeout() {
                ConnectorError::Timeout(self.timeout)
            } else if e.is_connect() {
                ConnectorError::Unreachable(e.to_string())
            } else {
                ConnectorError::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Backend { status, message });
        }

        let metrics: Vec<String> = response.json().await?;
        let sources = collect_sources(&self.origin, &self.pattern, metrics.iter().map(String::as_str));
        debug!(origin = %self.origin, metrics = metrics.len(), sources = sources.len(), "GraphiteConnector::list: done");
        Ok(sources)
    }
}
