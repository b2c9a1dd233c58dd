//! Connection routing
//!
//! Every accepted connection is handed to a [`Router`]. The daemon ships
//! [`ControlRouter`], which answers the line-JSON control protocol; an HTTP
//! front end plugs in through the same trait.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::debug;

use super::messages::{ControlRequest, ControlResponse, LibraryEntry, SourceEntry};
use crate::server::Server;

/// Maximum request line size
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Serves one accepted connection until it ends
#[async_trait]
pub trait Router: Send + Sync + 'static {
    async fn serve(&self, server: Arc<Server>, stream: TcpStream, peer: SocketAddr) -> Result<()>;
}

/// Line-delimited JSON control protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlRouter;

#[async_trait]
impl Router for ControlRouter {
    async fn serve(&self, server: Arc<Server>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!(%peer, "ControlRouter::serve: called");
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .context("Failed to read control request")?;
            if bytes_read == 0 {
                debug!(%peer, "ControlRouter::serve: peer closed");
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = if bytes_read > MAX_MESSAGE_SIZE {
                ControlResponse::Error {
                    message: format!("Message too large: {} bytes", bytes_read),
                }
            } else {
                match serde_json::from_str::<ControlRequest>(line.trim()) {
                    Ok(request) => handle_request(&server, request).await,
                    Err(e) => ControlResponse::Error {
                        message: format!("Invalid request: {}", e),
                    },
                }
            };
            send_response(&mut write, &response).await?;
        }
    }
}

/// Answer one request
pub async fn handle_request(server: &Server, request: ControlRequest) -> ControlResponse {
    debug!(?request, "handle_request: called");
    match request {
        ControlRequest::Ping => ControlResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        ControlRequest::Reload => match server.reload().await {
            Ok(()) => ControlResponse::Ok,
            Err(e) => error_response(e),
        },
        ControlRequest::Origins => match server.catalog().map(|c| c.origin_names()) {
            Some(Ok(origins)) => ControlResponse::Origins { origins },
            Some(Err(e)) => error_response(e),
            None => not_running(),
        },
        ControlRequest::Sources { origin } => match server.catalog().map(|c| c.sources(&origin)) {
            Some(Ok(snapshot)) => ControlResponse::Sources {
                origin,
                sources: snapshot
                    .sources()
                    .map(|source| SourceEntry {
                        name: source.name.clone(),
                        metrics: source.metric_names().into_iter().map(str::to_string).collect(),
                    })
                    .collect(),
            },
            Some(Err(e)) => error_response(e),
            None => not_running(),
        },
        ControlRequest::Stats => ControlResponse::Stats { stats: server.stats() },
        ControlRequest::Library => match server.library() {
            Some(library) => ControlResponse::Library {
                items: library
                    .items()
                    .iter()
                    .map(|item| LibraryEntry {
                        id: item.id.clone(),
                        kind: item.kind,
                        name: item.name.clone(),
                        missing_series: library.missing_series(&item.id).map_or(0, |missing| missing.len()),
                    })
                    .collect(),
            },
            None => not_running(),
        },
    }
}

fn error_response(e: impl std::fmt::Display) -> ControlResponse {
    ControlResponse::Error {
        message: format!("{:#}", e),
    }
}

fn not_running() -> ControlResponse {
    ControlResponse::Error {
        message: "Server is not running".to_string(),
    }
}

async fn send_response(stream: &mut OwnedWriteHalf, response: &ControlResponse) -> Result<()> {
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerOptions, ServerState};

    #[tokio::test]
    async fn test_requests_before_start() {
        let server = Server::new(ServerOptions::default());
        assert_eq!(server.state(), ServerState::Created);

        let pong = handle_request(&server, ControlRequest::Ping).await;
        assert!(matches!(pong, ControlResponse::Pong { .. }));

        let origins = handle_request(&server, ControlRequest::Origins).await;
        assert_eq!(origins, not_running());

        let library = handle_request(&server, ControlRequest::Library).await;
        assert_eq!(library, not_running());

        let reload = handle_request(&server, ControlRequest::Reload).await;
        assert!(matches!(reload, ControlResponse::Error { message } if message.contains("cannot reload")));

        match handle_request(&server, ControlRequest::Stats).await {
            ControlResponse::Stats { stats } => {
                assert_eq!(stats.state, ServerState::Created);
                assert!(stats.catalog.is_none());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
