//! Control client for the CLI and tests
//!
//! One connection per request, like a short-lived operator session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::messages::{ControlError, ControlRequest, ControlResponse, LibraryEntry, SourceEntry};
use super::router::MAX_MESSAGE_SIZE;
use crate::server::ServerStats;

/// Default timeout for control operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check the daemon is alive and get its version
    pub async fn ping(&self) -> Result<String, ControlError> {
        match self.request(ControlRequest::Ping).await? {
            ControlResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    pub async fn reload(&self) -> Result<(), ControlError> {
        match self.request(ControlRequest::Reload).await? {
            ControlResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn origins(&self) -> Result<Vec<String>, ControlError> {
        match self.request(ControlRequest::Origins).await? {
            ControlResponse::Origins { origins } => Ok(origins),
            other => Err(unexpected(other)),
        }
    }

    pub async fn sources(&self, origin: &str) -> Result<Vec<SourceEntry>, ControlError> {
        let request = ControlRequest::Sources {
            origin: origin.to_string(),
        };
        match self.request(request).await? {
            ControlResponse::Sources { sources, .. } => Ok(sources),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stats(&self) -> Result<ServerStats, ControlError> {
        match self.request(ControlRequest::Stats).await? {
            ControlResponse::Stats { stats } => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    pub async fn library(&self) -> Result<Vec<LibraryEntry>, ControlError> {
        match self.request(ControlRequest::Library).await? {
            ControlResponse::Library { items } => Ok(items),
            other => Err(unexpected(other)),
        }
    }

    /// Send one request and wait for its response
    ///
    /// An `error` response is turned into [`ControlError::Daemon`].
    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
        debug!(addr = %self.addr, ?request, "ControlClient: sending request");
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ControlError::Timeout)??;

        let response = tokio::time::timeout(self.timeout, exchange(stream, &request))
            .await
            .map_err(|_| ControlError::Timeout)??;

        debug!(?response, "ControlClient: received response");
        match response {
            ControlResponse::Error { message } => Err(ControlError::Daemon(message)),
            response => Ok(response),
        }
    }
}

async fn exchange(mut stream: TcpStream, request: &ControlRequest) -> Result<ControlResponse, ControlError> {
    let request_json = serde_json::to_string(request).map_err(|e| ControlError::Protocol(e.to_string()))?;
    stream.write_all(request_json.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;

    let mut reader = BufReader::new(&mut stream);
    let mut response_line = String::new();
    let bytes_read = reader.read_line(&mut response_line).await?;
    if bytes_read == 0 {
        return Err(ControlError::Protocol("Connection closed before response".to_string()));
    }
    // Stats and source listings can be long; only guard against runaway lines
    if bytes_read > MAX_MESSAGE_SIZE * 1024 {
        return Err(ControlError::Protocol(format!("Response too large: {} bytes", bytes_read)));
    }

    serde_json::from_str(response_line.trim()).map_err(|e| ControlError::Protocol(e.to_string()))
}

fn unexpected(response: ControlResponse) -> ControlError {
    ControlError::Unexpected(Box::new(response))
}
