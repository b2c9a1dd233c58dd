//! Worker - a named actor with a fixed event handler table
//!
//! Handlers are registered on the [`Worker`] builder. [`Worker::spawn`]
//! consumes it, starts the event loop on a tokio task and hands back a
//! type-erased [`WorkerHandle`]. Events run one at a time in FIFO order and
//! handlers get exclusive `&mut` access to the worker's state.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::messages::{Envelope, EventKind, Payload, WorkerError, WorkerResponse, WorkerStatus};

/// Handler signature for a worker with state `S`
pub type HandlerFn<S> =
    Box<dyn for<'a> Fn(&'a mut S, Payload) -> BoxFuture<'a, eyre::Result<()>> + Send + Sync + 'static>;

/// Builder for a worker; registration ends when it is spawned
pub struct Worker<S> {
    name: String,
    state: S,
    handlers: BTreeMap<EventKind, HandlerFn<S>>,
}

impl<S: Send + 'static> Worker<S> {
    pub fn new(name: impl Into<String>, state: S) -> Self {
        let name = name.into();
        debug!(%name, "Worker::new: called");
        Self {
            name,
            state,
            handlers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the handler for one event kind
    pub fn register<F>(&mut self, kind: EventKind, handler: F) -> Result<(), WorkerError>
    where
        F: for<'a> Fn(&'a mut S, Payload) -> BoxFuture<'a, eyre::Result<()>> + Send + Sync + 'static,
    {
        debug!(worker = %self.name, %kind, "register: called");
        if self.handlers.contains_key(&kind) {
            return Err(WorkerError::DuplicateHandler {
                worker: self.name.clone(),
                kind,
            });
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    /// Start the event loop
    ///
    /// Fails if any of the lifecycle handlers is missing. Must be called from
    /// within a tokio runtime.
    pub fn spawn(self) -> Result<WorkerHandle, WorkerError> {
        debug!(worker = %self.name, handlers = self.handlers.len(), "spawn: called");
        for kind in EventKind::LIFECYCLE {
            if !self.handlers.contains_key(&kind) {
                return Err(WorkerError::MissingHandler {
                    worker: self.name.clone(),
                    kind,
                });
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(watch::Sender::new(WorkerStatus::Created));
        let kinds = self.handlers.keys().copied().collect();

        tokio::spawn(event_loop(self.name.clone(), self.state, self.handlers, rx, status.clone()));
        info!(worker = %self.name, "Worker spawned");

        Ok(WorkerHandle {
            shared: Arc::new(Shared {
                name: self.name,
                kinds,
                gate: Mutex::new(Some(tx)),
                status,
            }),
        })
    }
}

struct Shared {
    name: String,
    kinds: BTreeSet<EventKind>,
    /// Queue sender; taken once `Shutdown` has been queued
    gate: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    status: Arc<watch::Sender<WorkerStatus>>,
}

/// Cloneable handle to a running worker
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .finish()
    }
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn status(&self) -> WorkerStatus {
        *self.shared.status.borrow()
    }

    /// Whether the worker has a handler for `kind`
    pub fn handles(&self, kind: EventKind) -> bool {
        self.shared.kinds.contains(&kind)
    }

    /// Queue an event
    ///
    /// With `sync` the call resolves once the handler has run and carries
    /// its result. Without it the call returns as soon as the event is queued
    /// and handler failures are only logged.
    pub async fn send(&self, kind: EventKind, payload: Payload, sync: bool) -> WorkerResponse {
        debug!(worker = %self.shared.name, %kind, sync, "send: called");
        let (reply, response) = if sync {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.enqueue(Envelope { kind, payload, reply })?;

        match response {
            Some(rx) => rx.await.map_err(|_| WorkerError::ChannelError {
                worker: self.shared.name.clone(),
            })?,
            None => Ok(()),
        }
    }

    fn enqueue(&self, envelope: Envelope) -> WorkerResponse {
        let kind = envelope.kind;
        let mut gate = self.shared.gate.lock().unwrap_or_else(|e| e.into_inner());

        let Some(tx) = gate.as_ref() else {
            return Err(WorkerError::NotAccepting {
                worker: self.shared.name.clone(),
            });
        };
        if !self.status().is_accepting() {
            return Err(WorkerError::NotAccepting {
                worker: self.shared.name.clone(),
            });
        }
        if !self.handles(kind) {
            return Err(WorkerError::Unhandled {
                worker: self.shared.name.clone(),
                kind,
            });
        }

        tx.send(envelope).map_err(|_| WorkerError::ChannelError {
            worker: self.shared.name.clone(),
        })?;

        if kind == EventKind::Shutdown {
            // Nothing may be queued behind the shutdown event
            gate.take();
            self.shared.status.send_modify(|status| *status = WorkerStatus::Stopping);
            debug!(worker = %self.shared.name, "enqueue: worker stopping");
        }
        Ok(())
    }

    /// Resolve once the worker has reached `Stopped`
    pub async fn wait_stopped(&self) {
        let mut rx = self.shared.status.subscribe();
        // The sender lives in `shared`, so the channel cannot close under us
        let _ = rx.wait_for(|status| *status == WorkerStatus::Stopped).await;
    }
}

async fn event_loop<S: Send + 'static>(
    name: String,
    mut state: S,
    handlers: BTreeMap<EventKind, HandlerFn<S>>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    status: Arc<watch::Sender<WorkerStatus>>,
) {
    debug!(worker = %name, "event_loop: started");
    // Lifecycle position; the published status may already say Stopping
    let mut phase = WorkerStatus::Created;

    while let Some(Envelope { kind, payload, reply }) = rx.recv().await {
        debug!(worker = %name, %kind, ?phase, "event_loop: handling event");
        let result = if !phase.admits(kind) {
            Err(WorkerError::InvalidState {
                worker: name.clone(),
                kind,
                status: phase,
            })
        } else {
            match handlers.get(&kind) {
                Some(handler) => run_handler(&name, kind, handler, &mut state, payload).await,
                None => Err(WorkerError::Unhandled {
                    worker: name.clone(),
                    kind,
                }),
            }
        };

        if result.is_ok() {
            let next = match kind {
                EventKind::Init => Some(WorkerStatus::Initialized),
                EventKind::Run => Some(WorkerStatus::Running),
                _ => None,
            };
            if let Some(next) = next {
                phase = next;
                status.send_if_modified(|current| {
                    if current.is_accepting() {
                        *current = next;
                        true
                    } else {
                        false
                    }
                });
            }
        }

        if let (Err(e), None) = (&result, &reply) {
            warn!(worker = %name, %kind, error = %e, "Event handling failed");
        }

        if kind == EventKind::Shutdown {
            status.send_replace(WorkerStatus::Stopped);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            info!(worker = %name, "Worker stopped");
            return;
        }

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    // Every handle was dropped without a shutdown
    status.send_replace(WorkerStatus::Stopped);
    debug!(worker = %name, "event_loop: channel closed");
}

async fn run_handler<S>(
    name: &str,
    kind: EventKind,
    handler: &HandlerFn<S>,
    state: &mut S,
    payload: Payload,
) -> WorkerResponse {
    match AssertUnwindSafe(handler(state, payload)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WorkerError::Handler {
            worker: name.to_string(),
            kind,
            message: format!("{:#}", e),
        }),
        Err(_) => {
            error!(worker = %name, %kind, "Handler panicked");
            Err(WorkerError::Panicked {
                worker: name.to_string(),
                kind,
            })
        }
    }
}
