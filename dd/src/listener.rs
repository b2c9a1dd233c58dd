//! Stoppable TCP listener with live connection counting
//!
//! Stopping closes the listening socket (new connections are refused) while
//! accepted connections keep running. A countdown latch tracks them so the
//! shutdown path can wait for the count to reach zero, bounded by a timeout.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Countdown latch over live connections
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    count: Arc<watch::Sender<usize>>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self {
            count: Arc::new(watch::Sender::new(0)),
        }
    }
}

impl ConnectionTracker {
    /// Count one connection until the guard is dropped
    pub fn acquire(&self) -> ConnectionGuard {
        self.count.send_modify(|count| *count += 1);
        ConnectionGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait for the count to reach zero; returns what is left at the deadline
    pub async fn wait_idle(&self, timeout: Duration) -> usize {
        let mut rx = self.count.subscribe();
        let idle = tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0))
            .await
            .map(|result| result.map(|_| ()));
        match idle {
            Ok(_) => 0,
            Err(_) => *rx.borrow(),
        }
    }
}

/// Decrements the tracker when dropped
#[derive(Debug)]
pub struct ConnectionGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    tracker: ConnectionTracker,
    stop: watch::Sender<bool>,
    /// Held until the accept loop takes it over
    socket: Mutex<Option<TcpListener>>,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        debug!(%addr, "Listener::bind: called");
        let socket = TcpListener::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "Listener bound");
        Ok(Self {
            local_addr,
            tracker: ConnectionTracker::default(),
            stop: watch::Sender::new(false),
            socket: Mutex::new(Some(socket)),
            accept_task: tokio::sync::Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connections
    pub fn connections(&self) -> usize {
        self.tracker.count()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Start accepting; each connection runs `handler` on its own task
    ///
    /// Has no effect when already started or stopped.
    pub async fn start<F, Fut>(&self, handler: F)
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(socket) = self.socket.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            debug!("Listener::start: already started or stopped");
            return;
        };
        let task = tokio::spawn(accept_loop(socket, self.tracker.clone(), self.stop.subscribe(), handler));
        *self.accept_task.lock().await = Some(task);
        info!(addr = %self.local_addr, "Listener accepting connections");
    }

    /// Stop accepting and wait for the accept loop to exit
    ///
    /// Once this returns the socket is closed. Connections already accepted
    /// are left alone.
    pub async fn stop(&self) {
        debug!(addr = %self.local_addr, "Listener::stop: called");
        self.stop.send_replace(true);
        // Never started: just close the socket
        self.socket.lock().unwrap_or_else(|e| e.into_inner()).take();

        let task = self.accept_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }
        info!(addr = %self.local_addr, live = self.connections(), "Listener stopped");
    }

    /// Wait up to `timeout` for live connections to finish
    pub async fn wait_drained(&self, timeout: Duration) -> usize {
        debug!(live = self.connections(), ?timeout, "Listener::wait_drained: called");
        self.tracker.wait_idle(timeout).await
    }
}

async fn accept_loop<F, Fut>(socket: TcpListener, tracker: ConnectionTracker, mut stop: watch::Receiver<bool>, handler: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            accepted = socket.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accept_loop: connection accepted");
                    let guard = tracker.acquire();
                    let connection = handler(stream, peer);
                    tokio::spawn(async move {
                        let _guard = guard;
                        connection.await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
    drop(socket);
    debug!("accept_loop: exited");
}
