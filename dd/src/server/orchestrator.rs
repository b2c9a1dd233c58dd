//! Server - start, reload and stop of the whole process
//!
//! Owns the catalog, its workers, the library and the listener. Lifecycle
//! operations are serialized; reads (`catalog()`, `stats()`, ...) never wait
//! on them.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use eyre::{Context, Result, bail};
use metricstore::{Catalog, Library};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{ServerState, ServerStats, StopReport};
use crate::catalog::{
    ConnectorFactory, RefreshPolicy, catalog_worker, default_connector_factory, origin_pool,
};
use crate::config::Config;
use crate::control::{ControlRouter, Router};
use crate::daemon::PidFile;
use crate::listener::Listener;
use crate::logging::LogSink;
use crate::worker::{EventKind, Payload, WorkerHandle, WorkerPool, WorkerStatus};

/// How a server is built
pub struct ServerOptions {
    /// Configuration file; `None` runs on defaults
    pub config_path: Option<PathBuf>,
    /// Passed to the catalog and library
    pub debug_level: u8,
    /// Redirected when the configuration names a log file
    pub log_sink: LogSink,
    /// Receives every accepted connection
    pub router: Arc<dyn Router>,
    pub connector_factory: ConnectorFactory,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            debug_level: 0,
            log_sink: LogSink::default(),
            router: Arc::new(ControlRouter),
            connector_factory: default_connector_factory(),
        }
    }
}

impl ServerOptions {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            ..Self::default()
        }
    }
}

/// Everything built by a successful start
#[derive(Clone)]
struct Components {
    catalog: Arc<Catalog>,
    catalog_worker: WorkerHandle,
    origins: Arc<WorkerPool>,
    library: Arc<Library>,
    listener: Arc<Listener>,
    pid_file: Option<PidFile>,
}

/// Periodic refresh of every origin
struct Ticker {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Ticker {
    fn spawn(origins: Arc<WorkerPool>, interval: Duration) -> Self {
        debug!(?interval, "Ticker::spawn: called");
        let (stop, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires at once; start already triggered a refresh
            ticks.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticks.tick() => {
                        debug!("Ticker: refreshing origins");
                        for e in origins.broadcast(EventKind::Refresh, Payload::Null, false).await {
                            debug!(error = %e, "Ticker: refresh not queued");
                        }
                    }
                }
            }
        });
        Self { stop, task }
    }

    async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Refresh ticker ended abnormally");
        }
    }
}

/// Pieces built so far by a start that may still fail
#[derive(Default)]
struct Partial {
    pid_file: Option<PidFile>,
    catalog: Option<Arc<Catalog>>,
    catalog_worker: Option<WorkerHandle>,
    origins: Option<Arc<WorkerPool>>,
    ticker: Option<Ticker>,
}

impl Partial {
    /// Best-effort teardown after a failed start
    async fn rollback(self, worker_timeout: Duration) {
        debug!("Partial::rollback: called");
        if let Some(ticker) = self.ticker {
            ticker.stop().await;
        }
        if let Some(origins) = self.origins {
            origins.stop_all(worker_timeout).await;
        }
        if let Some(worker) = self.catalog_worker {
            if let Err(e) = worker.send(EventKind::Shutdown, Payload::Null, true).await {
                debug!(error = %e, "rollback: catalog worker shutdown failed");
            }
        }
        if let Some(catalog) = self.catalog {
            catalog.close();
        }
        if let Some(pid_file) = self.pid_file {
            if let Err(e) = pid_file.remove() {
                warn!(error = %e, "Failed to remove PID file");
            }
        }
    }
}

pub struct Server {
    options: ServerOptions,
    state: watch::Sender<ServerState>,
    loading: AtomicBool,
    config: RwLock<Arc<Config>>,
    components: RwLock<Option<Components>>,
    ticker: tokio::sync::Mutex<Option<Ticker>>,
    started_at: Mutex<Option<Instant>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Arc<Self> {
        debug!(config_path = ?options.config_path, "Server::new: called");
        Arc::new(Self {
            options,
            state: watch::Sender::new(ServerState::Created),
            loading: AtomicBool::new(false),
            config: RwLock::new(Arc::new(Config::default())),
            components: RwLock::new(None),
            ticker: tokio::sync::Mutex::new(None),
            started_at: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ServerState) {
        let previous = self.state.send_replace(state);
        debug!(from = %previous, to = %state, "Server state transition");
    }

    /// Whether a reload is in progress
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Configuration currently in effect
    pub fn config(&self) -> Arc<Config> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn components(&self) -> Option<Components> {
        self.components.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn catalog(&self) -> Option<Arc<Catalog>> {
        self.components().map(|c| c.catalog)
    }

    pub fn library(&self) -> Option<Arc<Library>> {
        self.components().map(|c| c.library)
    }

    pub fn origins(&self) -> Option<Arc<WorkerPool>> {
        self.components().map(|c| c.origins)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.components().map(|c| c.listener.local_addr())
    }

    /// Live connections on the listener
    pub fn connections(&self) -> usize {
        self.components().map_or(0, |c| c.listener.connections())
    }

    pub fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map_or(Duration::ZERO, |started| started.elapsed())
    }

    pub fn stats(&self) -> ServerStats {
        let components = self.components();
        ServerStats {
            state: self.state(),
            loading: self.is_loading(),
            uptime_secs: self.uptime().as_secs(),
            connections: self.connections(),
            catalog: components.as_ref().map(|c| c.catalog.stats()),
            library_items: self.library().map_or(0, |library| library.len()),
            workers: components
                .map(|c| worker_statuses(&c.origins))
                .unwrap_or_default(),
        }
    }

    /// Bring the server up; returns once it is serving
    ///
    /// On failure everything started so far is torn down and the state is
    /// `Failed`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Starting server");
        if self.state() != ServerState::Created {
            bail!("Server cannot start while {}", self.state());
        }

        let mut partial = Partial::default();
        match self.start_inner(&mut partial).await {
            Ok(components) => {
                let addr = components.listener.local_addr();
                *self.components.write().unwrap_or_else(|e| e.into_inner()) = Some(components);
                *self.ticker.lock().await = partial.ticker.take();
                *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                self.set_state(ServerState::Serving);
                info!(%addr, "Server serving");
                Ok(())
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Server start failed");
                partial.rollback(self.config().shutdown.worker_timeout()).await;
                self.set_state(ServerState::Failed);
                Err(e)
            }
        }
    }

    async fn start_inner(self: &Arc<Self>, partial: &mut Partial) -> Result<Components> {
        let config = Config::load(self.options.config_path.as_deref())?;
        config.validate().context("Invalid configuration")?;
        let config = Arc::new(config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config.clone();
        self.set_state(ServerState::ConfigLoaded);

        if let Some(path) = &config.server_log {
            self.options.log_sink.redirect(path)?;
        }

        if let Some(path) = &config.pid_file {
            let pid_file = PidFile::new(path);
            pid_file.create()?;
            partial.pid_file = Some(pid_file);
        }

        let catalog = Arc::new(Catalog::new(config.origins.clone(), self.options.debug_level));
        partial.catalog = Some(catalog.clone());

        let policy = RefreshPolicy::from(&config.refresh);
        let origins = Arc::new(origin_pool(
            &config.origins,
            catalog.clone(),
            &policy,
            &self.options.connector_factory,
        )?);
        partial.origins = Some(origins.clone());

        let worker = catalog_worker(catalog.clone())?;
        partial.catalog_worker = Some(worker.clone());
        worker
            .send(EventKind::Init, Payload::Null, true)
            .await
            .context("Catalog initialization failed")?;
        worker.send(EventKind::Run, Payload::Null, false).await?;
        self.set_state(ServerState::CatalogInitialized);

        for kind in [EventKind::Init, EventKind::Run] {
            let errors = origins.broadcast(kind, Payload::Null, true).await;
            if let Some(first) = errors.into_iter().next() {
                return Err(first).context(format!("Failed to {} origin workers", kind));
            }
        }
        self.set_state(ServerState::OriginsStarted);

        for e in origins.broadcast(EventKind::Refresh, Payload::Null, false).await {
            warn!(error = %e, "Initial refresh not queued");
        }

        let library = Arc::new(Library::new(
            config.library.clone(),
            catalog.clone(),
            self.options.debug_level,
        ));
        spawn_library_refresh(library.clone());

        if let Some(interval) = config.refresh.interval() {
            partial.ticker = Some(Ticker::spawn(origins.clone(), interval));
        }

        let addr = config.bind_addr()?;
        let listener = Arc::new(
            Listener::bind(addr)
                .await
                .context(format!("Failed to bind {}", addr))?,
        );
        let server = self.clone();
        let router = self.options.router.clone();
        listener
            .start(move |stream, peer| {
                let server = server.clone();
                let router = router.clone();
                async move {
                    if let Err(e) = router.serve(server, stream, peer).await {
                        debug!(%peer, error = %e, "Connection ended with error");
                    }
                }
            })
            .await;

        Ok(Components {
            catalog,
            catalog_worker: worker,
            origins,
            library,
            listener,
            pid_file: partial.pid_file.clone(),
        })
    }

    /// Re-read the configuration and refresh every origin
    ///
    /// The new configuration is validated as a whole first; if it fails
    /// nothing live changes. The origin set is fixed for the process
    /// lifetime: added or removed origins are reported and ignored. Origin
    /// and library refreshes run in the background and report their own
    /// failures.
    ///
    /// Never waits for a start or stop in progress: the request is rejected
    /// at once, so a reload sent over a control connection cannot hold that
    /// connection open through the drain.
    pub async fn reload(&self) -> Result<()> {
        let state = self.state();
        if state == ServerState::Reloading {
            bail!("A reload is already in progress");
        }
        if !state.is_serving() {
            bail!("Server cannot reload while {}", state);
        }
        let Ok(_lifecycle) = self.lifecycle.try_lock() else {
            bail!("Server is busy, cannot reload while {}", self.state());
        };
        if self.state() != ServerState::Serving {
            bail!("Server cannot reload while {}", self.state());
        }

        info!("Reloading configuration");
        self.loading.store(true, Ordering::SeqCst);
        self.set_state(ServerState::Reloading);

        let result = self.reload_inner().await;
        if let Err(e) = &result {
            error!(error = %format!("{:#}", e), "Reload failed, keeping current configuration");
        }

        self.set_state(ServerState::Serving);
        self.loading.store(false, Ordering::SeqCst);
        result
    }

    async fn reload_inner(&self) -> Result<()> {
        let components = self.components().ok_or_else(|| eyre::eyre!("Server is not running"))?;
        let current = self.config();

        let config = Config::load(self.options.config_path.as_deref())?;
        config.validate().context("Invalid configuration")?;

        if config.server_log != current.server_log {
            match &config.server_log {
                Some(path) => self.options.log_sink.redirect(path)?,
                None => self.options.log_sink.reset(),
            }
        }

        warn_fixed_settings(&current, &config);
        let config = Arc::new(config);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config.clone();

        for name in components.origins.names() {
            let Some(origin) = config.origins.get(&name) else {
                continue;
            };
            let payload = serde_json::to_value(origin).context("Failed to encode origin configuration")?;
            if let Err(e) = components.origins.send(&name, EventKind::Refresh, payload, false).await {
                warn!(origin = %name, error = %e, "Refresh not queued");
            }
        }

        components.library.reconfigure(config.library.clone());
        spawn_library_refresh(components.library.clone());

        info!(origins = components.origins.len(), "Configuration reloaded");
        Ok(())
    }

    /// Stop gracefully
    ///
    /// Order: listener, refresh ticker, origin workers (bounded), catalog
    /// worker, catalog close, connection drain (bounded), PID file.
    pub async fn stop(&self) -> Result<StopReport> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != ServerState::Serving {
            bail!("Server cannot stop while {}", self.state());
        }
        let components = self.components().ok_or_else(|| eyre::eyre!("Server is not running"))?;

        info!("Stopping server");
        self.set_state(ServerState::Stopping);
        let started = Instant::now();
        let config = self.config();

        components.listener.stop().await;

        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.stop().await;
        }

        let straggler_workers = components.origins.stop_all(config.shutdown.worker_timeout()).await;

        if let Err(e) = components
            .catalog_worker
            .send(EventKind::Shutdown, Payload::Null, true)
            .await
        {
            warn!(error = %e, "Catalog worker shutdown failed");
        }
        components.catalog.close();

        let remaining_connections = components.listener.wait_drained(config.shutdown.drain_timeout()).await;
        if remaining_connections > 0 {
            warn!(remaining = remaining_connections, "Connections still open after drain timeout");
        }

        if let Some(pid_file) = &components.pid_file {
            if let Err(e) = pid_file.remove() {
                warn!(error = %e, "Failed to remove PID file");
            }
        }

        self.set_state(ServerState::Stopped);
        let report = StopReport {
            remaining_connections,
            straggler_workers,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed = ?report.elapsed,
            remaining = report.remaining_connections,
            stragglers = report.straggler_workers.len(),
            "Server stopped"
        );
        Ok(report)
    }

    /// Start, then reload on SIGHUP and stop on SIGINT/SIGTERM
    pub async fn run(self: &Arc<Self>) -> Result<StopReport> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        self.start().await?;
        info!("Server running. SIGHUP reloads, SIGINT/SIGTERM stops.");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("SIGHUP received - reloading configuration");
                    // Failures are logged by reload and leave the server as it was
                    let _ = self.reload().await;
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }

        self.stop().await
    }
}

fn spawn_library_refresh(library: Arc<Library>) {
    tokio::spawn(async move {
        if let Err(e) = library.refresh().await {
            warn!(error = %e, "Library refresh failed");
        }
    });
}

/// Report settings a reload cannot change
fn warn_fixed_settings(current: &Config, next: &Config) {
    let before: BTreeSet<&String> = current.origins.keys().collect();
    let after: BTreeSet<&String> = next.origins.keys().collect();
    for name in after.difference(&before) {
        warn!(origin = %name, "Origin added in configuration; restart to enable it");
    }
    for name in before.difference(&after) {
        warn!(origin = %name, "Origin removed from configuration; it keeps running until restart");
    }

    if next.bind != current.bind {
        warn!(current = %current.bind, requested = %next.bind, "Bind address changes need a restart");
    }
    if next.pid_file != current.pid_file {
        warn!("PID file location changes need a restart");
    }
    if next.refresh != current.refresh {
        warn!("Refresh settings change on restart");
    }
}

fn worker_statuses(pool: &WorkerPool) -> BTreeMap<String, WorkerStatus> {
    pool.names()
        .into_iter()
        .filter_map(|name| pool.get(&name).map(|h| (name, h.status())))
        .collect()
}
